//! Bib tags: the (photo, bib number) links this pipeline exists to produce.
//! Also holds the imported start-list rows used as an OCR allow-list.

use anyhow::Result;
use rusqlite::params;
use std::collections::HashSet;

use super::{now_timestamp, Database};

/// How a bib tag was first established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BibSource {
    Ocr,
    FacePropagation,
    Manual,
}

impl BibSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BibSource::Ocr => "ocr",
            BibSource::FacePropagation => "face_propagation",
            BibSource::Manual => "manual",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ocr" => Some(BibSource::Ocr),
            "face_propagation" => Some(BibSource::FacePropagation),
            "manual" => Some(BibSource::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BibTag {
    pub id: i64,
    pub photo_id: i64,
    pub bib_number: String,
    pub confidence: f32,
    pub source: BibSource,
    pub created_at: String,
}

impl Database {
    /// Insert the (photo, bib) pair unless it already exists.
    ///
    /// Returns true if a row was written. An existing pair is left untouched,
    /// including its confidence and source: the row records how the tag was
    /// first established, so the first writer wins and a duplicate insert
    /// (or a write race) is a successful no-op.
    pub fn insert_bib_tag_if_absent(
        &self,
        photo_id: i64,
        bib_number: &str,
        confidence: f32,
        source: BibSource,
    ) -> Result<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO bib_tags (photo_id, bib_number, confidence, source, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![photo_id, bib_number, confidence, source.as_str(), now_timestamp()],
        )?;
        Ok(inserted > 0)
    }

    /// Tags on a photo, in insertion order. A row whose source string does
    /// not decode is skipped with a warning rather than misattributed.
    pub fn get_bib_tags_for_photo(&self, photo_id: i64) -> Result<Vec<BibTag>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, photo_id, bib_number, confidence, source, created_at
            FROM bib_tags
            WHERE photo_id = ?
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([photo_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f32>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut tags = Vec::new();
        for row in rows {
            let (id, photo_id, bib_number, confidence, source, created_at) = row?;
            let Some(source) = BibSource::from_str(&source) else {
                tracing::warn!(tag = id, source = %source, "skipping bib tag with unknown source");
                continue;
            };
            tags.push(BibTag {
                id,
                photo_id,
                bib_number,
                confidence,
                source,
                created_at,
            });
        }
        Ok(tags)
    }

    /// Just the bib numbers on a photo, in insertion order.
    pub fn get_bib_numbers_for_photo(&self, photo_id: i64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT bib_number FROM bib_tags WHERE photo_id = ? ORDER BY id")?;
        let numbers = stmt
            .query_map([photo_id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(numbers)
    }

    // ========================================================================
    // Start list
    // ========================================================================

    pub fn upsert_start_list_entry(
        &self,
        event_id: &str,
        bib_number: &str,
        runner_name: Option<&str>,
    ) -> Result<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO start_list (event_id, bib_number, runner_name, created_at)
            VALUES (?, ?, ?, ?)
            "#,
            params![event_id, bib_number, runner_name, now_timestamp()],
        )?;
        Ok(inserted > 0)
    }

    /// The event's imported bib numbers, empty when no start list was loaded.
    pub fn get_valid_bibs(&self, event_id: &str) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT bib_number FROM start_list WHERE event_id = ?")?;
        let bibs = stmt
            .query_map([event_id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(bibs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        db.initialize().unwrap();
        db.ensure_event("e1").unwrap();
        (dir, db)
    }

    #[test]
    fn test_insert_if_absent_is_idempotent() {
        let (_dir, db) = test_db();
        let photo = db.insert_photo("e1", "/a.jpg", "a.jpg", 1, None, None).unwrap();

        assert!(db.insert_bib_tag_if_absent(photo, "101", 0.95, BibSource::Ocr).unwrap());
        assert!(!db.insert_bib_tag_if_absent(photo, "101", 0.42, BibSource::FacePropagation).unwrap());

        let tags = db.get_bib_tags_for_photo(photo).unwrap();
        assert_eq!(tags.len(), 1);
        // First writer wins: the re-assert must not touch source or confidence
        assert_eq!(tags[0].source, BibSource::Ocr);
        assert!((tags[0].confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_distinct_bibs_on_same_photo() {
        let (_dir, db) = test_db();
        let photo = db.insert_photo("e1", "/a.jpg", "a.jpg", 1, None, None).unwrap();

        assert!(db.insert_bib_tag_if_absent(photo, "101", 0.9, BibSource::Ocr).unwrap());
        assert!(db.insert_bib_tag_if_absent(photo, "202", 0.8, BibSource::Ocr).unwrap());

        assert_eq!(
            db.get_bib_numbers_for_photo(photo).unwrap(),
            vec!["101".to_string(), "202".to_string()]
        );
    }

    #[test]
    fn test_unknown_source_row_is_skipped() {
        let (_dir, db) = test_db();
        let photo = db.insert_photo("e1", "/a.jpg", "a.jpg", 1, None, None).unwrap();

        db.insert_bib_tag_if_absent(photo, "101", 0.9, BibSource::Ocr).unwrap();
        db.conn
            .execute(
                "INSERT INTO bib_tags (photo_id, bib_number, confidence, source, created_at)
                 VALUES (?, '202', 0.5, 'telepathy', '2026-05-01 10:00:00.000')",
                [photo],
            )
            .unwrap();

        // The corrupt row must not surface as some other provenance
        let tags = db.get_bib_tags_for_photo(photo).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].bib_number, "101");
        assert_eq!(tags[0].source, BibSource::Ocr);
    }

    #[test]
    fn test_start_list_round_trip() {
        let (_dir, db) = test_db();
        assert!(db.upsert_start_list_entry("e1", "101", Some("Asha")).unwrap());
        assert!(!db.upsert_start_list_entry("e1", "101", None).unwrap());
        assert!(db.upsert_start_list_entry("e1", "102", None).unwrap());

        let bibs = db.get_valid_bibs("e1").unwrap();
        assert!(bibs.contains("101"));
        assert!(bibs.contains("102"));
        assert_eq!(bibs.len(), 2);
    }
}

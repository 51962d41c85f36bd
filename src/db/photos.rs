//! Photo rows and the anchor/orphan predicate queries.

use anyhow::Result;
use rusqlite::params;

use super::{now_timestamp, Database};

#[derive(Debug, Clone)]
pub struct Photo {
    pub id: i64,
    pub event_id: String,
    pub path: String,
    pub filename: String,
    pub taken_at: Option<String>,
    pub created_at: String,
}

const PHOTO_COLUMNS: &str = "id, event_id, path, filename, taken_at, created_at";

fn photo_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Photo> {
    Ok(Photo {
        id: row.get(0)?,
        event_id: row.get(1)?,
        path: row.get(2)?,
        filename: row.get(3)?,
        taken_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl Database {
    pub fn insert_photo(
        &self,
        event_id: &str,
        path: &str,
        filename: &str,
        size_bytes: i64,
        sha256_hash: Option<&str>,
        taken_at: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO photos (event_id, path, filename, size_bytes, sha256_hash, taken_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![event_id, path, filename, size_bytes, sha256_hash, taken_at, now_timestamp()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn photo_exists_by_path(&self, path: &str) -> bool {
        self.conn
            .query_row("SELECT 1 FROM photos WHERE path = ?", [path], |_| Ok(true))
            .unwrap_or(false)
    }

    pub fn get_photo(&self, photo_id: i64) -> Result<Option<Photo>> {
        let result = self.conn.query_row(
            &format!("SELECT {} FROM photos WHERE id = ?", PHOTO_COLUMNS),
            [photo_id],
            photo_from_row,
        );
        match result {
            Ok(photo) => Ok(Some(photo)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_photo_ocr_result(
        &self,
        photo_id: i64,
        provider: &str,
        confidence: f32,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE photos SET ocr_provider = ?, ocr_confidence = ?, ocr_processed_at = ? WHERE id = ?",
            params![provider, confidence, now_timestamp(), photo_id],
        )?;
        Ok(())
    }

    pub fn mark_photo_faces_indexed(&self, photo_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE photos SET faces_indexed_at = ? WHERE id = ?",
            params![now_timestamp(), photo_id],
        )?;
        Ok(())
    }

    /// Creation time of the newest photo in the event, if any.
    pub fn most_recent_photo_created_at(&self, event_id: &str) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT MAX(created_at) FROM photos WHERE event_id = ?",
            [event_id],
            |row| row.get::<_, Option<String>>(0),
        );
        match result {
            Ok(ts) => Ok(ts),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Photos with at least one bib tag and at least one enrolled face.
    pub fn get_anchor_photos(&self, event_id: &str) -> Result<Vec<Photo>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {}
            FROM photos p
            WHERE p.event_id = ?
              AND EXISTS (SELECT 1 FROM bib_tags b WHERE b.photo_id = p.id)
              AND EXISTS (SELECT 1 FROM faces f WHERE f.photo_id = p.id)
            ORDER BY p.id
            "#,
            PHOTO_COLUMNS
        ))?;
        let photos = stmt
            .query_map([event_id], photo_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(photos)
    }

    /// Photos with no bib tag but at least one enrolled face.
    pub fn get_orphan_photos(&self, event_id: &str) -> Result<Vec<Photo>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {}
            FROM photos p
            WHERE p.event_id = ?
              AND NOT EXISTS (SELECT 1 FROM bib_tags b WHERE b.photo_id = p.id)
              AND EXISTS (SELECT 1 FROM faces f WHERE f.photo_id = p.id)
            ORDER BY p.id
            "#,
            PHOTO_COLUMNS
        ))?;
        let photos = stmt
            .query_map([event_id], photo_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(photos)
    }

    /// Count of orphan photos, for the needs-clustering predicate.
    pub fn count_orphan_photos(&self, event_id: &str) -> Result<i64> {
        let count = self.conn.query_row(
            r#"
            SELECT COUNT(*)
            FROM photos p
            WHERE p.event_id = ?
              AND NOT EXISTS (SELECT 1 FROM bib_tags b WHERE b.photo_id = p.id)
              AND EXISTS (SELECT 1 FROM faces f WHERE f.photo_id = p.id)
            "#,
            [event_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

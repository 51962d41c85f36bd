//! Anchor/orphan partitioning of an event's photos.
//!
//! An anchor carries at least one bib tag and at least one enrolled face,
//! so its identity can be lent out. An orphan has faces but no bib, so it
//! is the target of propagation. Photos with no faces fall in neither set
//! and never participate in clustering; photos with a bib but no faces are
//! already resolved and have nothing to lend.

use anyhow::Result;

use crate::db::{Database, Photo};

#[derive(Debug)]
pub struct EventPartition {
    pub anchors: Vec<Photo>,
    pub orphans: Vec<Photo>,
}

/// Partition the event's photos by what the database says right now.
///
/// Classification is recomputed from scratch on every run rather than
/// maintained incrementally: a propagated bib turns an orphan into an
/// anchor for the next run without any state to migrate.
pub fn classify(db: &Database, event_id: &str) -> Result<EventPartition> {
    Ok(EventPartition {
        anchors: db.get_anchor_photos(event_id)?,
        orphans: db.get_orphan_photos(event_id)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BibSource, BoundingBox};

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        db.initialize().unwrap();
        db.ensure_event("e1").unwrap();
        (dir, db)
    }

    fn add_face(db: &Database, photo_id: i64) {
        let bbox = BoundingBox { x: 0, y: 0, width: 10, height: 10 };
        db.store_face(photo_id, "e1", &format!("e1/{photo_id}"), &bbox, Some(&[1.0, 0.0]), None)
            .unwrap();
    }

    #[test]
    fn test_partition_covers_all_four_cases() {
        let (_dir, db) = test_db();

        // bib + face: anchor
        let anchor = db.insert_photo("e1", "/1.jpg", "1.jpg", 1, None, None).unwrap();
        add_face(&db, anchor);
        db.insert_bib_tag_if_absent(anchor, "101", 0.9, BibSource::Ocr).unwrap();

        // face only: orphan
        let orphan = db.insert_photo("e1", "/2.jpg", "2.jpg", 1, None, None).unwrap();
        add_face(&db, orphan);

        // bib only: resolved, in neither set
        let bib_only = db.insert_photo("e1", "/3.jpg", "3.jpg", 1, None, None).unwrap();
        db.insert_bib_tag_if_absent(bib_only, "102", 0.9, BibSource::Ocr).unwrap();

        // nothing: in neither set
        db.insert_photo("e1", "/4.jpg", "4.jpg", 1, None, None).unwrap();

        let partition = classify(&db, "e1").unwrap();
        assert_eq!(partition.anchors.len(), 1);
        assert_eq!(partition.anchors[0].id, anchor);
        assert_eq!(partition.orphans.len(), 1);
        assert_eq!(partition.orphans[0].id, orphan);
    }

    #[test]
    fn test_partition_is_event_scoped() {
        let (_dir, db) = test_db();
        db.ensure_event("e2").unwrap();

        let other = db.insert_photo("e2", "/x.jpg", "x.jpg", 1, None, None).unwrap();
        add_face(&db, other);

        let partition = classify(&db, "e1").unwrap();
        assert!(partition.anchors.is_empty());
        assert!(partition.orphans.is_empty());
    }
}

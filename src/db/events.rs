//! Event rows and the last-clustered watermark.

use anyhow::Result;
use rusqlite::params;

use super::{now_timestamp, Database};

/// An event (a race) that owns photos.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: String,
    pub name: Option<String>,
    pub created_at: String,
    pub last_clustered_at: Option<String>,
}

impl Database {
    /// Create the event row if it does not exist yet.
    pub fn ensure_event(&self, event_id: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO events (id, created_at) VALUES (?, ?)",
            params![event_id, now_timestamp()],
        )?;
        Ok(())
    }

    pub fn get_event(&self, event_id: &str) -> Result<Option<Event>> {
        let result = self.conn.query_row(
            "SELECT id, name, created_at, last_clustered_at FROM events WHERE id = ?",
            [event_id],
            |row| {
                Ok(Event {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                    last_clustered_at: row.get(3)?,
                })
            },
        );
        match result {
            Ok(event) => Ok(Some(event)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_events(&self) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, created_at, last_clustered_at FROM events ORDER BY id",
        )?;
        let events = stmt
            .query_map([], |row| {
                Ok(Event {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                    last_clustered_at: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(events)
    }

    pub fn get_last_clustered_at(&self, event_id: &str) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT last_clustered_at FROM events WHERE id = ?",
            [event_id],
            |row| row.get::<_, Option<String>>(0),
        );
        match result {
            Ok(ts) => Ok(ts),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Stamp the event's clustering watermark.
    pub fn set_last_clustered_at(&self, event_id: &str, timestamp: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE events SET last_clustered_at = ? WHERE id = ?",
            params![timestamp, event_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        db.initialize().unwrap();
        (dir, db)
    }

    #[test]
    fn test_ensure_event_is_idempotent() {
        let (_dir, db) = test_db();
        db.ensure_event("spring-10k").unwrap();
        db.ensure_event("spring-10k").unwrap();

        let event = db.get_event("spring-10k").unwrap().unwrap();
        assert_eq!(event.id, "spring-10k");
        assert!(event.last_clustered_at.is_none());

        assert_eq!(db.list_events().unwrap().len(), 1);
    }

    #[test]
    fn test_watermark_round_trip() {
        let (_dir, db) = test_db();
        db.ensure_event("e1").unwrap();

        assert!(db.get_last_clustered_at("e1").unwrap().is_none());
        db.set_last_clustered_at("e1", "2026-05-01 10:00:00.000").unwrap();
        assert_eq!(
            db.get_last_clustered_at("e1").unwrap().as_deref(),
            Some("2026-05-01 10:00:00.000")
        );
    }

    #[test]
    fn test_missing_event_reads_as_none() {
        let (_dir, db) = test_db();
        assert!(db.get_event("nope").unwrap().is_none());
        assert!(db.get_last_clustered_at("nope").unwrap().is_none());
    }
}

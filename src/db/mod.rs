//! SQLite-backed storage for the identity resolution pipeline.
//!
//! `Database` wraps a single `rusqlite` connection; the typed operations are
//! split per concern (`events`, `photos`, `bibs`, `faces`, `runs`) in their
//! own `impl Database` blocks.

pub mod bibs;
pub mod events;
pub mod faces;
pub mod photos;
pub mod runs;
mod schema;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;

pub use bibs::{BibSource, BibTag};
pub use events::Event;
pub use faces::{BoundingBox, FaceRecord};
pub use photos::Photo;
pub use runs::ClusteringRun;

use schema::{MIGRATIONS, SCHEMA};

pub struct Database {
    pub(crate) conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        self.run_migrations()?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        // Statements that already apply are ignored.
        for migration in MIGRATIONS {
            let _ = self.conn.execute(migration, []);
        }
        Ok(())
    }
}

/// Timestamp string used for every row this crate writes.
///
/// Millisecond precision keeps watermark comparisons meaningful when several
/// photos land within the same second; the format sorts lexically.
pub fn now_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        db.initialize().unwrap();
        // Running initialize twice must be harmless
        db.initialize().unwrap();
    }

    #[test]
    fn test_now_timestamp_sorts() {
        let a = now_timestamp();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = now_timestamp();
        assert!(b > a);
    }
}

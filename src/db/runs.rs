//! Clustering run history, the operator-facing record of what each run did.

use anyhow::Result;
use rusqlite::params;

use super::Database;
use crate::cluster::ClusteringStats;

#[derive(Debug, Clone)]
pub struct ClusteringRun {
    pub id: i64,
    pub event_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub anchors: i64,
    pub orphans: i64,
    pub faces_searched: i64,
    pub bibs_assigned: i64,
    pub photos_linked: i64,
    pub errors: Vec<String>,
}

impl Database {
    pub fn record_clustering_run(
        &self,
        event_id: &str,
        started_at: &str,
        finished_at: &str,
        stats: &ClusteringStats,
    ) -> Result<i64> {
        let errors_json = if stats.errors.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&stats.errors)?)
        };
        self.conn.execute(
            r#"
            INSERT INTO clustering_runs
                (event_id, started_at, finished_at, anchors, orphans, faces_searched,
                 bibs_assigned, photos_linked, errors)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                event_id,
                started_at,
                finished_at,
                stats.anchors as i64,
                stats.orphans as i64,
                stats.faces_searched as i64,
                stats.bibs_assigned as i64,
                stats.photos_linked as i64,
                errors_json,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent runs for an event, newest first.
    pub fn get_clustering_runs(&self, event_id: &str, limit: usize) -> Result<Vec<ClusteringRun>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, event_id, started_at, finished_at, anchors, orphans,
                   faces_searched, bibs_assigned, photos_linked, errors
            FROM clustering_runs
            WHERE event_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )?;
        let runs = stmt
            .query_map(params![event_id, limit as i64], |row| {
                let errors_json: Option<String> = row.get(9)?;
                Ok(ClusteringRun {
                    id: row.get(0)?,
                    event_id: row.get(1)?,
                    started_at: row.get(2)?,
                    finished_at: row.get(3)?,
                    anchors: row.get(4)?,
                    orphans: row.get(5)?,
                    faces_searched: row.get(6)?,
                    bibs_assigned: row.get(7)?,
                    photos_linked: row.get(8)?,
                    errors: errors_json
                        .and_then(|j| serde_json::from_str(&j).ok())
                        .unwrap_or_default(),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_read_run() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        db.initialize().unwrap();
        db.ensure_event("e1").unwrap();

        let stats = ClusteringStats {
            anchors: 3,
            orphans: 2,
            faces_searched: 5,
            bibs_assigned: 4,
            photos_linked: 2,
            errors: vec!["face 7: search timed out".to_string()],
        };
        db.record_clustering_run("e1", "2026-05-01 10:00:00.000", "2026-05-01 10:00:04.200", &stats)
            .unwrap();

        let runs = db.get_clustering_runs("e1", 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].anchors, 3);
        assert_eq!(runs[0].photos_linked, 2);
        assert_eq!(runs[0].errors, stats.errors);

        assert!(db.get_clustering_runs("other", 10).unwrap().is_empty());
    }
}

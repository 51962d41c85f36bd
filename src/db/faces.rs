//! Enrolled-face rows backing the local similarity collection.

use anyhow::Result;
use rusqlite::params;

use super::{now_timestamp, Database};

/// Bounding box for a detected face
#[derive(Debug, Clone)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// One enrolled face in the similarity collection.
#[derive(Debug, Clone)]
pub struct FaceRecord {
    pub id: i64,
    pub photo_id: i64,
    pub event_id: String,
    pub external_id: String,
    pub bbox: BoundingBox,
    pub confidence: Option<f32>,
    pub embedding: Option<Vec<f32>>,
}

impl Database {
    /// Store an enrolled face. The external id encodes (event, photo) so a
    /// similarity match can be resolved without a secondary lookup.
    pub fn store_face(
        &self,
        photo_id: i64,
        event_id: &str,
        external_id: &str,
        bbox: &BoundingBox,
        embedding: Option<&[f32]>,
        confidence: Option<f32>,
    ) -> Result<i64> {
        let embedding_bytes = embedding.map(embedding_to_bytes);
        self.conn.execute(
            r#"
            INSERT INTO faces (photo_id, event_id, external_id, x, y, width, height, confidence, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                photo_id,
                event_id,
                external_id,
                bbox.x,
                bbox.y,
                bbox.width,
                bbox.height,
                confidence,
                embedding_bytes,
                now_timestamp()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_faces_for_photo(&self, photo_id: i64) -> Result<Vec<FaceRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, photo_id, event_id, external_id, x, y, width, height, confidence, embedding
            FROM faces
            WHERE photo_id = ?
            ORDER BY id
            "#,
        )?;
        let faces = stmt
            .query_map([photo_id], face_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(faces)
    }

    /// Embedding for one face, if it was stored with one.
    pub fn get_face_embedding(&self, face_id: i64) -> Result<Option<Vec<f32>>> {
        let result = self.conn.query_row(
            "SELECT embedding FROM faces WHERE id = ?",
            [face_id],
            |row| row.get::<_, Option<Vec<u8>>>(0),
        );
        match result {
            Ok(bytes) => Ok(bytes.map(|b| bytes_to_embedding(&b))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every embedded face in the collection: (face id, external id, embedding).
    /// The collection is system-wide; event scoping happens at match time.
    pub fn get_all_face_embeddings(&self) -> Result<Vec<(i64, String, Vec<f32>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, external_id, embedding FROM faces WHERE embedding IS NOT NULL",
        )?;
        let embeddings = stmt
            .query_map([], |row| {
                let bytes: Vec<u8> = row.get(2)?;
                Ok((row.get(0)?, row.get(1)?, bytes_to_embedding(&bytes)))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(embeddings)
    }

    pub fn count_faces(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM faces", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn face_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FaceRecord> {
    let embedding_bytes: Option<Vec<u8>> = row.get(9)?;
    Ok(FaceRecord {
        id: row.get(0)?,
        photo_id: row.get(1)?,
        event_id: row.get(2)?,
        external_id: row.get(3)?,
        bbox: BoundingBox {
            x: row.get(4)?,
            y: row.get(5)?,
            width: row.get(6)?,
            height: row.get(7)?,
        },
        confidence: row.get(8)?,
        embedding: embedding_bytes.map(|b| bytes_to_embedding(&b)),
    })
}

// ============================================================================
// Helper functions
// ============================================================================

/// Convert f32 slice to bytes for storage
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to f32 vector
fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap();
            f32::from_le_bytes(arr)
        })
        .collect()
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
    fn test_embedding_bytes_round_trip() {
        let embedding = vec![0.25f32, -1.5, 3.75];
        let bytes = embedding_to_bytes(&embedding);
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes_to_embedding(&bytes), embedding);
    }

    #[test]
    fn test_store_and_read_face() {
        let (_dir, db) = test_db();
        let photo = db.insert_photo("e1", "/a.jpg", "a.jpg", 1, None, None).unwrap();
        let bbox = BoundingBox { x: 10, y: 20, width: 30, height: 40 };
        let embedding = vec![1.0f32, 0.0, 0.0];

        let face_id = db
            .store_face(photo, "e1", "e1/1", &bbox, Some(&embedding), Some(0.9))
            .unwrap();

        let faces = db.get_faces_for_photo(photo).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].id, face_id);
        assert_eq!(faces[0].external_id, "e1/1");
        assert_eq!(faces[0].embedding.as_deref(), Some(&embedding[..]));

        assert_eq!(db.get_face_embedding(face_id).unwrap(), Some(embedding));
        assert_eq!(db.count_faces().unwrap(), 1);
    }

    #[test]
    fn test_all_embeddings_skips_faces_without_one() {
        let (_dir, db) = test_db();
        let photo = db.insert_photo("e1", "/a.jpg", "a.jpg", 1, None, None).unwrap();
        let bbox = BoundingBox { x: 0, y: 0, width: 1, height: 1 };

        db.store_face(photo, "e1", "e1/1", &bbox, Some(&[0.5, 0.5]), None).unwrap();
        db.store_face(photo, "e1", "e1/1", &bbox, None, None).unwrap();

        assert_eq!(db.get_all_face_embeddings().unwrap().len(), 1);
        assert_eq!(db.count_faces().unwrap(), 2);
    }
}

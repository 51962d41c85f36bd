//! Face index abstraction: enrollment plus similarity search.
//!
//! The pipeline only ever talks to the [`FaceIndex`] trait, so the local
//! embedding scan can be swapped for a hosted face-search service without
//! touching the clustering engine. External ids carry (event, photo) so a
//! match resolves back to a photo without a secondary lookup.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use rayon::prelude::*;

use crate::db::{BoundingBox, Database};
use crate::faces::detector;

/// Identifier a face carries through the index, encoding which event and
/// photo it came from. Wire form is `<event_id>/<photo_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalImageId {
    pub event_id: String,
    pub photo_id: i64,
}

impl ExternalImageId {
    pub fn new(event_id: &str, photo_id: i64) -> Self {
        Self {
            event_id: event_id.to_string(),
            photo_id,
        }
    }
}

impl fmt::Display for ExternalImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.event_id, self.photo_id)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("malformed external image id: {0:?}")]
pub struct ParseExternalIdError(String);

impl FromStr for ExternalImageId {
    type Err = ParseExternalIdError;

    /// The event id may itself contain `/`; the photo id is everything after
    /// the last separator.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (event_id, photo_part) = s
            .rsplit_once('/')
            .ok_or_else(|| ParseExternalIdError(s.to_string()))?;
        if event_id.is_empty() {
            return Err(ParseExternalIdError(s.to_string()));
        }
        let photo_id = photo_part
            .parse::<i64>()
            .map_err(|_| ParseExternalIdError(s.to_string()))?;
        Ok(Self {
            event_id: event_id.to_string(),
            photo_id,
        })
    }
}

/// A face accepted into the index during enrollment.
#[derive(Debug, Clone)]
pub struct EnrolledFace {
    pub face_id: i64,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// One similarity hit from a search.
#[derive(Debug, Clone)]
pub struct FaceMatch {
    pub external_id: ExternalImageId,
    pub face_id: i64,
    /// Similarity as a percentage, 0-100.
    pub similarity: f32,
}

/// Enrollment and similarity search over the face collection.
pub trait FaceIndex {
    /// Detect faces in the photo and enroll each one under `external_id`.
    fn index_faces(
        &self,
        photo_path: &std::path::Path,
        external_id: &ExternalImageId,
    ) -> Result<Vec<EnrolledFace>>;

    /// Faces similar to the given enrolled face, best first, excluding the
    /// query face itself. `threshold_percent` is a hard floor: no match below
    /// it is returned regardless of `max_results`.
    fn search_similar_by_face_id(
        &self,
        face_id: i64,
        max_results: usize,
        threshold_percent: f32,
    ) -> Result<Vec<FaceMatch>>;
}

/// Face index backed by the local database and on-device models.
pub struct LocalFaceIndex<'a> {
    db: &'a Database,
    min_face_confidence: f32,
}

impl<'a> LocalFaceIndex<'a> {
    pub fn new(db: &'a Database, min_face_confidence: f32) -> Self {
        Self {
            db,
            min_face_confidence,
        }
    }
}

impl FaceIndex for LocalFaceIndex<'_> {
    fn index_faces(
        &self,
        photo_path: &std::path::Path,
        external_id: &ExternalImageId,
    ) -> Result<Vec<EnrolledFace>> {
        let detected = detector::detect_and_embed(photo_path, self.min_face_confidence)?;

        let mut enrolled = Vec::with_capacity(detected.len());
        for face in detected {
            let face_id = self.db.store_face(
                external_id.photo_id,
                &external_id.event_id,
                &external_id.to_string(),
                &face.bbox,
                Some(&face.embedding),
                Some(face.confidence),
            )?;
            enrolled.push(EnrolledFace {
                face_id,
                confidence: face.confidence,
                bbox: face.bbox,
            });
        }
        Ok(enrolled)
    }

    fn search_similar_by_face_id(
        &self,
        face_id: i64,
        max_results: usize,
        threshold_percent: f32,
    ) -> Result<Vec<FaceMatch>> {
        let query = match self.db.get_face_embedding(face_id)? {
            Some(embedding) => embedding,
            None => return Ok(Vec::new()),
        };

        let candidates = self.db.get_all_face_embeddings()?;

        let mut matches: Vec<FaceMatch> = candidates
            .par_iter()
            .filter(|(id, _, _)| *id != face_id)
            .filter_map(|(id, external_id, embedding)| {
                let similarity = cosine_similarity(&query, embedding) * 100.0;
                if similarity < threshold_percent {
                    return None;
                }
                let external_id = external_id.parse::<ExternalImageId>().ok()?;
                Some(FaceMatch {
                    external_id,
                    face_id: *id,
                    similarity,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(max_results);
        Ok(matches)
    }
}

/// Cosine similarity in [-1, 1]. Zero for mismatched or empty vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
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

    fn store(db: &Database, photo_id: i64, event_id: &str, embedding: &[f32]) -> i64 {
        let bbox = BoundingBox { x: 0, y: 0, width: 10, height: 10 };
        let ext = ExternalImageId::new(event_id, photo_id);
        db.store_face(photo_id, event_id, &ext.to_string(), &bbox, Some(embedding), Some(0.9))
            .unwrap()
    }

    #[test]
    fn test_external_id_round_trip() {
        let id = ExternalImageId::new("spring-10k", 42);
        assert_eq!(id.to_string(), "spring-10k/42");
        assert_eq!("spring-10k/42".parse::<ExternalImageId>().unwrap(), id);

        // Event ids containing the separator still parse
        let nested = "2026/spring-10k/42".parse::<ExternalImageId>().unwrap();
        assert_eq!(nested.event_id, "2026/spring-10k");
        assert_eq!(nested.photo_id, 42);

        assert!("no-separator".parse::<ExternalImageId>().is_err());
        assert!("/42".parse::<ExternalImageId>().is_err());
        assert!("e1/not-a-number".parse::<ExternalImageId>().is_err());
    }

    #[test]
    fn test_cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_search_excludes_query_face_and_applies_threshold() {
        let (_dir, db) = test_db();
        let p1 = db.insert_photo("e1", "/a.jpg", "a.jpg", 1, None, None).unwrap();
        let p2 = db.insert_photo("e1", "/b.jpg", "b.jpg", 1, None, None).unwrap();
        let p3 = db.insert_photo("e1", "/c.jpg", "c.jpg", 1, None, None).unwrap();

        let query = store(&db, p1, "e1", &[1.0, 0.0, 0.0]);
        let near = store(&db, p2, "e1", &[0.95, 0.05, 0.0]);
        let _far = store(&db, p3, "e1", &[0.0, 1.0, 0.0]);

        let index = LocalFaceIndex::new(&db, 0.7);
        let matches = index.search_similar_by_face_id(query, 50, 90.0).unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].face_id, near);
        assert_eq!(matches[0].external_id.photo_id, p2);
        assert!(matches[0].similarity >= 90.0);
    }

    #[test]
    fn test_search_orders_best_first_and_truncates() {
        let (_dir, db) = test_db();
        let p1 = db.insert_photo("e1", "/a.jpg", "a.jpg", 1, None, None).unwrap();
        let p2 = db.insert_photo("e1", "/b.jpg", "b.jpg", 1, None, None).unwrap();
        let p3 = db.insert_photo("e1", "/c.jpg", "c.jpg", 1, None, None).unwrap();

        let query = store(&db, p1, "e1", &[1.0, 0.0]);
        let close = store(&db, p2, "e1", &[0.99, 0.01]);
        let _less_close = store(&db, p3, "e1", &[0.9, 0.1]);

        let index = LocalFaceIndex::new(&db, 0.7);
        let matches = index.search_similar_by_face_id(query, 1, 50.0).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].face_id, close);
    }

    #[test]
    fn test_search_unknown_face_is_empty() {
        let (_dir, db) = test_db();
        let index = LocalFaceIndex::new(&db, 0.7);
        assert!(index.search_similar_by_face_id(999, 10, 0.0).unwrap().is_empty());
    }
}

//! Propagation engine: lends anchor identities to orphan photos.
//!
//! Search runs outward from anchor faces: the anchors are the smaller,
//! already-confirmed side, so index calls scale with anchor faces rather
//! than with the orphan backlog. A hit that resolves to an orphan photo in
//! the same event copies the anchor's bib numbers onto it with
//! `face_propagation` provenance. Each run is idempotent: re-tagging an
//! existing (photo, bib) pair is a no-op.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::cluster::classifier;
use crate::config::FaceIndexConfig;
use crate::db::{BibSource, Database};
use crate::faces::FaceIndex;

/// Outcome of one clustering run, persisted to the run history.
#[derive(Debug, Clone, Default)]
pub struct ClusteringStats {
    pub anchors: usize,
    pub orphans: usize,
    /// Anchor faces a similarity search was issued for, failures included.
    pub faces_searched: usize,
    pub bibs_assigned: usize,
    /// Orphan photos that received at least one bib this run.
    pub photos_linked: usize,
    /// Per-face failures. A failed search skips that face, never the run.
    pub errors: Vec<String>,
}

/// Whether the event has clustering work outstanding.
///
/// True when at least one orphan exists and photos arrived since the last
/// run (or no run has happened). Comparing the watermark against the newest
/// photo's creation time keeps repeated runs over a stable set of
/// unmatchable orphans from burning searches forever, while any new photo
/// makes the event eligible again.
pub fn needs_clustering(db: &Database, event_id: &str) -> Result<bool> {
    if db.count_orphan_photos(event_id)? == 0 {
        return Ok(false);
    }
    let watermark = match db.get_last_clustered_at(event_id)? {
        Some(ts) => ts,
        None => return Ok(true),
    };
    match db.most_recent_photo_created_at(event_id)? {
        Some(newest) => Ok(watermark < newest),
        None => Ok(false),
    }
}

/// Run one clustering pass over the event.
///
/// The watermark is stamped on every completed pass, including the
/// zero-orphan case, so an event with nothing to do goes quiet until new
/// photos arrive.
pub fn cluster_faces_by_event(
    db: &Database,
    index: &dyn FaceIndex,
    event_id: &str,
    config: &FaceIndexConfig,
) -> Result<ClusteringStats> {
    let partition = classifier::classify(db, event_id)?;

    let mut stats = ClusteringStats {
        anchors: partition.anchors.len(),
        orphans: partition.orphans.len(),
        ..Default::default()
    };

    if partition.orphans.is_empty() {
        debug!(event = %event_id, "no orphan photos, nothing to cluster");
        db.set_last_clustered_at(event_id, &crate::db::now_timestamp())?;
        return Ok(stats);
    }

    // Where each orphan face lives. A hit whose face id is not in here is
    // either stale or landed on something that is not an orphan
    let mut orphan_photo_by_face: HashMap<i64, i64> = HashMap::new();
    for orphan in &partition.orphans {
        for face in db.get_faces_for_photo(orphan.id)? {
            orphan_photo_by_face.insert(face.id, orphan.id);
        }
    }

    // One propagation per (orphan photo, anchor photo) pair: several faces
    // matching between the same two photos must not re-lend the same bibs
    let mut propagated: HashSet<(i64, i64)> = HashSet::new();
    let mut linked_photos: HashSet<i64> = HashSet::new();

    for anchor in &partition.anchors {
        let bibs = db.get_bib_numbers_for_photo(anchor.id)?;

        for face in db.get_faces_for_photo(anchor.id)? {
            stats.faces_searched += 1;
            let matches = match index.search_similar_by_face_id(
                face.id,
                config.max_matches,
                config.similarity_threshold,
            ) {
                Ok(matches) => matches,
                Err(e) => {
                    warn!(event = %event_id, face = face.id, "similarity search failed: {e:#}");
                    stats.errors.push(format!("face {}: {e:#}", face.id));
                    continue;
                }
            };

            for m in matches {
                // The collection is system-wide; never lend across events
                if m.external_id.event_id != event_id {
                    continue;
                }
                // A photo cannot resolve itself
                if m.external_id.photo_id == anchor.id {
                    continue;
                }
                // The hit must land on a current orphan face; anything else
                // (another anchor, a face removed since the run started) has
                // nothing to receive
                let orphan_photo_id = match orphan_photo_by_face.get(&m.face_id) {
                    Some(photo_id) => *photo_id,
                    None => continue,
                };
                if !propagated.insert((orphan_photo_id, anchor.id)) {
                    continue;
                }

                let confidence = m.similarity / 100.0;
                for bib in &bibs {
                    if db.insert_bib_tag_if_absent(
                        orphan_photo_id,
                        bib,
                        confidence,
                        BibSource::FacePropagation,
                    )? {
                        stats.bibs_assigned += 1;
                        linked_photos.insert(orphan_photo_id);
                        debug!(
                            event = %event_id,
                            photo = orphan_photo_id,
                            anchor = anchor.id,
                            bib = %bib,
                            similarity = m.similarity,
                            "propagated bib"
                        );
                    }
                }
            }
        }
    }

    stats.photos_linked = linked_photos.len();
    db.set_last_clustered_at(event_id, &crate::db::now_timestamp())?;

    info!(
        event = %event_id,
        anchors = stats.anchors,
        orphans = stats.orphans,
        faces_searched = stats.faces_searched,
        bibs_assigned = stats.bibs_assigned,
        photos_linked = stats.photos_linked,
        errors = stats.errors.len(),
        "clustering run complete"
    );

    Ok(stats)
}

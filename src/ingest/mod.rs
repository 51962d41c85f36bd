//! Ingestion: discover new uploads and run them through the per-photo
//! pipeline (hash, EXIF, bib OCR, face enrollment).
//!
//! Layout on disk is `events_root/<event_id>/...`; everything below an
//! event directory belongs to that event. A photo that fails any pipeline
//! stage is logged and skipped, it never stops the scan.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::db::{BibSource, Database};
use crate::faces::{ExternalImageId, FaceIndex};
use crate::ocr::BibExtractor;

/// What one scan of the events root produced.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Event id of each newly ingested photo, in processing order. Feeds
    /// the clustering scheduler one debounce bump per photo.
    pub processed_events: Vec<String>,
    pub skipped: usize,
}

/// Scan the events root and ingest every photo not yet in the database.
pub fn ingest_new_photos(
    db: &Database,
    extractor: &BibExtractor,
    index: &dyn FaceIndex,
    config: &IngestConfig,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();

    if !config.events_root.is_dir() {
        return Ok(report);
    }

    for (event_id, path) in discover_event_images(&config.events_root, &config.image_extensions) {
        let path_str = path.to_string_lossy().to_string();
        if db.photo_exists_by_path(&path_str) {
            continue;
        }

        match ingest_photo(db, extractor, index, &event_id, &path) {
            Ok(()) => report.processed_events.push(event_id),
            Err(e) => {
                warn!(photo = %path.display(), event = %event_id, "ingest failed: {e:#}");
                report.skipped += 1;
            }
        }
    }

    if !report.processed_events.is_empty() || report.skipped > 0 {
        info!(
            ingested = report.processed_events.len(),
            skipped = report.skipped,
            "ingest scan complete"
        );
    }

    Ok(report)
}

/// Image files under the events root, paired with the event id taken from
/// the first path component below the root. Sorted for stable ordering.
fn discover_event_images(events_root: &Path, extensions: &[String]) -> Vec<(String, PathBuf)> {
    let mut images = Vec::new();

    for entry in WalkDir::new(events_root)
        .follow_links(false)
        .min_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(ext) = path.extension() else {
            continue;
        };
        let ext_lower = ext.to_string_lossy().to_lowercase();
        if !extensions.iter().any(|e| e.to_lowercase() == ext_lower) {
            continue;
        }
        let Ok(relative) = path.strip_prefix(events_root) else {
            continue;
        };
        let Some(event_id) = relative
            .components()
            .next()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
        else {
            continue;
        };
        images.push((event_id, path.to_path_buf()));
    }

    images.sort();
    images
}

/// Run one photo through the full pipeline.
fn ingest_photo(
    db: &Database,
    extractor: &BibExtractor,
    index: &dyn FaceIndex,
    event_id: &str,
    path: &Path,
) -> Result<()> {
    db.ensure_event(event_id)?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| anyhow!("path has no filename: {}", path.display()))?;
    let size_bytes = std::fs::metadata(path)?.len() as i64;
    let sha256 = compute_sha256(path)?;
    let taken_at = read_taken_at(path);

    let photo_id = db.insert_photo(
        event_id,
        &path.to_string_lossy(),
        &filename,
        size_bytes,
        Some(&sha256),
        taken_at.as_deref(),
    )?;

    // Bib OCR. Provider failure comes back as an empty extraction, so the
    // photo simply stays an orphan candidate.
    let valid_bibs = db.get_valid_bibs(event_id)?;
    let extraction = extractor.extract_bib_numbers(path, Some(&valid_bibs));
    for bib in &extraction.bib_numbers {
        db.insert_bib_tag_if_absent(photo_id, bib, extraction.confidence, BibSource::Ocr)?;
    }
    db.set_photo_ocr_result(photo_id, &extraction.provider, extraction.confidence)?;

    // Face enrollment. A failure here leaves the photo without faces,
    // which excludes it from clustering entirely.
    let external_id = ExternalImageId::new(event_id, photo_id);
    match index.index_faces(path, &external_id) {
        Ok(faces) => {
            db.mark_photo_faces_indexed(photo_id)?;
            info!(
                photo = %path.display(),
                event = %event_id,
                bibs = extraction.bib_numbers.len(),
                faces = faces.len(),
                "photo ingested"
            );
        }
        Err(e) => {
            warn!(photo = %path.display(), "face enrollment failed: {e:#}");
        }
    }

    Ok(())
}

fn compute_sha256(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();

    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// EXIF capture time, if the file carries one.
fn read_taken_at(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut bufreader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut bufreader).ok()?;
    let field = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)?;
    Some(field.display_value().to_string().trim_matches('"').to_string())
}

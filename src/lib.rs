//! Startline: bib-number identity resolution for race photography.
//!
//! Photographers drop event photos into per-event directories; each photo is
//! OCR'd for bib numbers and its faces are enrolled into a similarity index.
//! A debounced per-event scheduler then propagates bib numbers from photos
//! where a bib was found ("anchors") to photos that only have faces
//! ("orphans") on the strength of face-similarity evidence.

pub mod cluster;
pub mod config;
pub mod db;
pub mod faces;
pub mod ingest;
pub mod logging;
pub mod ocr;
pub mod startlist;

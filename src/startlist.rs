//! Start-list import. Organizers hand over registration exports in CSV with
//! no agreed column layout, so the importer finds the bib and name columns
//! by header when there is one and falls back to positions otherwise.

use std::path::Path;

use anyhow::{anyhow, Result};
use tracing::info;

use crate::db::Database;

const BIB_HEADERS: &[&str] = &["bib", "bib_number", "bibnumber", "number", "race_no", "race no"];
const NAME_HEADERS: &[&str] = &["name", "runner", "runner_name", "participant", "full_name"];

/// Import a start-list CSV for the event. Returns the number of new entries;
/// re-importing the same file is a no-op.
pub fn import_start_list(db: &Database, event_id: &str, csv_path: &Path) -> Result<usize> {
    db.ensure_event(event_id)?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(csv_path)
        .map_err(|e| anyhow!("Failed to open start list {}: {}", csv_path.display(), e))?;

    let headers = reader.headers()?.clone();
    let (bib_col, name_col) = locate_columns(&headers);

    // No recognizable bib header: treat the header row as data, first
    // column is the bib
    let header_is_data = bib_col.is_none();
    let bib_col = bib_col.unwrap_or(0);

    let mut imported = 0;

    if header_is_data {
        if let Some(bib) = clean_bib(headers.get(bib_col)) {
            let name = name_col.and_then(|c| clean_name(headers.get(c)));
            if db.upsert_start_list_entry(event_id, &bib, name.as_deref())? {
                imported += 1;
            }
        }
    }

    for record in reader.records() {
        let record = record?;
        let Some(bib) = clean_bib(record.get(bib_col)) else {
            continue;
        };
        let name = name_col.and_then(|c| clean_name(record.get(c)));
        if db.upsert_start_list_entry(event_id, &bib, name.as_deref())? {
            imported += 1;
        }
    }

    info!(event = %event_id, file = %csv_path.display(), imported, "start list imported");
    Ok(imported)
}

fn locate_columns(headers: &csv::StringRecord) -> (Option<usize>, Option<usize>) {
    let mut bib_col = None;
    let mut name_col = None;
    for (i, header) in headers.iter().enumerate() {
        let normalized = header.trim().to_lowercase();
        if bib_col.is_none() && BIB_HEADERS.contains(&normalized.as_str()) {
            bib_col = Some(i);
        }
        if name_col.is_none() && NAME_HEADERS.contains(&normalized.as_str()) {
            name_col = Some(i);
        }
    }
    (bib_col, name_col)
}

/// A usable bib value is a nonempty run of digits.
fn clean_bib(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(trimmed.to_string())
}

fn clean_name(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

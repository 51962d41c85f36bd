pub const SCHEMA: &str = r#"
-- Events: one row per race; owns photos and the clustering watermark
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    name TEXT,
    created_at TEXT NOT NULL,

    -- Set when a clustering run finishes; photos created after this
    -- timestamp make the event eligible for clustering again
    last_clustered_at TEXT
);

-- Photos: uploaded images, each belonging to exactly one event
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id TEXT NOT NULL REFERENCES events(id),
    path TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    sha256_hash TEXT,
    taken_at TEXT,
    created_at TEXT NOT NULL,

    -- OCR bookkeeping
    ocr_provider TEXT,
    ocr_confidence REAL,
    ocr_processed_at TEXT,

    -- Face enrollment bookkeeping
    faces_indexed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_photos_event ON photos(event_id);
CREATE INDEX IF NOT EXISTS idx_photos_event_created ON photos(event_id, created_at);

-- Bib tags: unique per (photo, bib number); re-asserting a pair is a no-op
CREATE TABLE IF NOT EXISTS bib_tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_id INTEGER NOT NULL REFERENCES photos(id),
    bib_number TEXT NOT NULL,
    confidence REAL NOT NULL,
    source TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(photo_id, bib_number)
);

CREATE INDEX IF NOT EXISTS idx_bib_tags_photo ON bib_tags(photo_id);
CREATE INDEX IF NOT EXISTS idx_bib_tags_number ON bib_tags(bib_number);

-- Enrolled faces: one row per face in the similarity collection
CREATE TABLE IF NOT EXISTS faces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_id INTEGER NOT NULL REFERENCES photos(id),
    event_id TEXT NOT NULL,
    external_id TEXT NOT NULL,
    x INTEGER NOT NULL,
    y INTEGER NOT NULL,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,
    confidence REAL,
    embedding BLOB,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_faces_photo ON faces(photo_id);
CREATE INDEX IF NOT EXISTS idx_faces_event ON faces(event_id);

-- Imported start lists: allow-list used to validate OCR candidates
CREATE TABLE IF NOT EXISTS start_list (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id TEXT NOT NULL REFERENCES events(id),
    bib_number TEXT NOT NULL,
    runner_name TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(event_id, bib_number)
);

-- Clustering run history, surfaced to operators
CREATE TABLE IF NOT EXISTS clustering_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id TEXT NOT NULL REFERENCES events(id),
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    anchors INTEGER NOT NULL,
    orphans INTEGER NOT NULL,
    faces_searched INTEGER NOT NULL,
    bibs_assigned INTEGER NOT NULL,
    photos_linked INTEGER NOT NULL,
    errors TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_event ON clustering_runs(event_id);
"#;

/// Applied leniently on startup; statements for columns that already exist
/// simply fail and are skipped.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE photos ADD COLUMN faces_indexed_at TEXT",
    "ALTER TABLE start_list ADD COLUMN runner_name TEXT",
];

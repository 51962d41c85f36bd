//! Startline daemon: watches the events root for uploads and resolves
//! runner identities in the background.
//!
//! Each tick ingests new photos (bib OCR plus face enrollment) and feeds the
//! debounced clustering scheduler; when an event's quiet period elapses, a
//! propagation run lends anchor bibs to orphan photos.
//!
//! ## Usage
//!
//! ```bash
//! startline-daemon                                 # Run in foreground
//! startline-daemon --once                          # One ingest + cluster pass, then exit
//! startline-daemon import-startlist EVENT CSV      # Load a registration export
//! ```
//!
//! ## systemd Service
//!
//! ```bash
//! sudo cp startline.service /etc/systemd/system/
//! sudo systemctl enable --now startline
//! ```

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{error, info};

use startline::cluster::{self, ClusterScheduler};
use startline::config::Config;
use startline::db::{now_timestamp, Database};
use startline::faces::LocalFaceIndex;
use startline::ingest;
use startline::logging;
use startline::ocr::BibExtractor;
use startline::startlist;

struct DaemonArgs {
    /// Seconds between ingest scans.
    poll_interval: u64,
    /// Run one ingest and clustering pass, then exit.
    once: bool,
    /// Config path override.
    config_path: Option<PathBuf>,
    /// Import a start list and exit: (event id, csv path).
    import_startlist: Option<(String, PathBuf)>,
}

impl Default for DaemonArgs {
    fn default() -> Self {
        Self {
            poll_interval: 5,
            once: false,
            config_path: None,
            import_startlist: None,
        }
    }
}

fn main() -> Result<()> {
    let args = parse_args();

    logging::init(None)?;
    info!("Startline daemon starting...");

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::load().context("Failed to load config")?,
    };

    let db = Database::open(&config.database.sqlite_path)
        .with_context(|| format!("Failed to open database at {:?}", config.database.sqlite_path))?;
    db.initialize()?;
    info!("Database opened at {:?}", config.database.sqlite_path);

    if let Some((event_id, csv_path)) = args.import_startlist {
        let imported = startlist::import_start_list(&db, &event_id, &csv_path)?;
        println!("Imported {imported} start-list entries for {event_id}");
        return Ok(());
    }

    let extractor = BibExtractor::from_config(&config.ocr);
    let index = LocalFaceIndex::new(&db, config.face_index.min_face_confidence);

    if args.once {
        info!("Running in single-shot mode");
        run_once(&db, &extractor, &index, &config)?;
    } else {
        info!(
            "Running in daemon mode, scanning every {} seconds",
            args.poll_interval
        );
        run_loop(&db, &extractor, &index, &config, args.poll_interval);
    }

    info!("Startline daemon stopped");
    Ok(())
}

/// One ingest pass, then cluster every event with outstanding work,
/// skipping the debounce entirely.
fn run_once(
    db: &Database,
    extractor: &BibExtractor,
    index: &LocalFaceIndex,
    config: &Config,
) -> Result<()> {
    ingest::ingest_new_photos(db, extractor, index, &config.ingest)?;

    for event in db.list_events()? {
        if cluster::needs_clustering(db, &event.id)? {
            run_clustering(db, index, &event.id, config);
        }
    }
    Ok(())
}

fn run_loop(
    db: &Database,
    extractor: &BibExtractor,
    index: &LocalFaceIndex,
    config: &Config,
    poll_interval: u64,
) {
    let mut scheduler = ClusterScheduler::new(Duration::from_secs(config.clustering.quiet_period_secs));
    let poll = Duration::from_secs(poll_interval.max(1));

    loop {
        match ingest::ingest_new_photos(db, extractor, index, &config.ingest) {
            Ok(report) => {
                let now = Instant::now();
                for event_id in &report.processed_events {
                    scheduler.photo_processed(event_id, now);
                }
            }
            Err(e) => error!("ingest scan failed: {e:#}"),
        }

        for event_id in scheduler.due_events(Instant::now()) {
            match cluster::needs_clustering(db, &event_id) {
                Ok(true) => run_clustering(db, index, &event_id, config),
                Ok(false) => {}
                Err(e) => error!(event = %event_id, "needs-clustering check failed: {e:#}"),
            }
            // Always release the event, error paths included, or it would
            // stay stuck in the running state forever
            scheduler.complete(&event_id, Instant::now());
        }

        thread::sleep(poll);
    }
}

fn run_clustering(db: &Database, index: &LocalFaceIndex, event_id: &str, config: &Config) {
    let started_at = now_timestamp();
    match cluster::cluster_faces_by_event(db, index, event_id, &config.face_index) {
        Ok(stats) => {
            if let Err(e) = db.record_clustering_run(event_id, &started_at, &now_timestamp(), &stats)
            {
                error!(event = %event_id, "failed to record clustering run: {e:#}");
            }
        }
        Err(e) => error!(event = %event_id, "clustering run failed: {e:#}"),
    }
}

fn parse_args() -> DaemonArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = DaemonArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "import-startlist" => {
                if i + 2 < args.len() {
                    parsed.import_startlist =
                        Some((args[i + 1].clone(), PathBuf::from(&args[i + 2])));
                    i += 2;
                } else {
                    eprintln!("import-startlist requires EVENT_ID and CSV_PATH");
                    std::process::exit(1);
                }
            }
            "--once" | "-1" => {
                parsed.once = true;
            }
            "--interval" | "-i" => {
                if i + 1 < args.len() {
                    if let Ok(interval) = args[i + 1].parse() {
                        parsed.poll_interval = interval;
                    }
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"startline-daemon - Background identity resolution for race photos

USAGE:
    startline-daemon [OPTIONS]
    startline-daemon import-startlist EVENT_ID CSV_PATH

OPTIONS:
    --once, -1          Run one ingest and clustering pass, then exit
    --interval, -i N    Seconds between ingest scans (default: 5)
    --config, -c PATH   Path to config file
    --help, -h          Show this help message

ENVIRONMENT:
    STARTLINE_LOG       Log level (trace, debug, info, warn, error)

The daemon watches the configured events root for uploaded photos. Each new
photo gets bib OCR and face enrollment; once an event's upload burst goes
quiet, face similarity propagates bib numbers from tagged photos to
untagged ones.

Install as systemd service:
    sudo cp startline.service /etc/systemd/system/
    sudo systemctl enable --now startline
"#
    );
}

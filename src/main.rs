use anyhow::{Context, Result};
use clap::Parser;
use rusqlite::Connection;
use std::path::PathBuf;
use std::time::Instant;

use movetags::config::{Config, TheMode};
use movetags::models::SyncStats;
use movetags::progress::{format_duration, set_log_only, set_quiet, set_verbose};
use movetags::{safety, scan, schema, sync};

/// Move tag snapshots left by the scanner into the browse-optimized track
/// database.
///
/// Reads pending scan batches of before/after tag pairs from the source
/// database and synchronizes the target's tracks, albums and lookup
/// tables. Work and virtual album naming follows the rules in scan.ini.
#[derive(Parser)]
#[command(name = "movetags")]
#[command(about = "Move tag snapshots into the browse-optimized track database")]
struct Args {
    /// Read tags from source DATABASE
    #[arg(short = 's', long = "tagdatabase", value_name = "TAGDATABASE")]
    tagdatabase: PathBuf,

    /// Write tags to destination DATABASE (created if missing)
    #[arg(short = 'd', long = "trackdatabase", value_name = "TRACKDATABASE")]
    trackdatabase: PathBuf,

    /// How to process 'the' before artist name (overrides scan.ini)
    #[arg(short = 't', long = "the", value_parser = ["before", "after", "remove"])]
    the_processing: Option<String>,

    /// Process at most COUNT scans (0 allowed)
    #[arg(short = 'c', long = "count", value_name = "COUNT")]
    scancount: Option<u64>,

    /// Regenerate: drop and recreate the target tables before ingest
    #[arg(short = 'r', long)]
    regenerate: bool,

    /// Print verbose status messages to stderr
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Don't print status messages
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Config file with naming rules
    #[arg(long, default_value = "scan.ini")]
    ini: PathBuf,

    /// Disable progress bars, use log output only (for background runs)
    #[arg(long)]
    log_only: bool,

    /// Export run stats to a JSON file
    #[arg(long)]
    export_stats: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    set_verbose(args.verbose);
    set_quiet(args.quiet);
    set_log_only(args.log_only);

    let run_start = Instant::now();

    safety::validate_source_path(&args.tagdatabase)?;
    safety::validate_target_path(&args.trackdatabase)?;

    let the_override = args
        .the_processing
        .as_deref()
        .and_then(TheMode::parse);
    let cfg = Config::load(&args.ini, the_override)?;

    // target first: the source open may replicate from the same file
    let mut target = Connection::open(&args.trackdatabase)
        .with_context(|| format!("opening target database {}", args.trackdatabase.display()))?;
    // batch atomicity comes from the per-scan transaction, so synchronous
    // writes buy nothing here
    target.execute_batch("PRAGMA synchronous = 0;")?;

    if args.regenerate {
        schema::empty_database(&target)?;
    }
    schema::create_database(&target)?;
    schema::record_wv_numbers(&target, &cfg.wv_numbers)?;

    let (source, tables) = scan::open_source(&args.tagdatabase, &args.trackdatabase)?;

    let mut stats = SyncStats::default();
    let scans = scan::read_scans(&source)?;
    let limit = args.scancount.map(|c| c as usize).unwrap_or(scans.len());

    let mut last_scan_stamp: i64 = 0;
    let mut last_scan_id: i64 = 0;
    for (scan_id, _scan_path) in scans.iter().take(limit) {
        if !args.quiet {
            eprintln!("[SCAN] Scannumber: {}", scan_id);
        }
        let stamp = sync::process_scan(
            &mut target,
            &source,
            &tables,
            &cfg,
            *scan_id,
            args.regenerate,
            &mut stats,
        )?;
        if stamp > last_scan_stamp {
            last_scan_stamp = stamp;
        }
        last_scan_id = *scan_id;
    }

    // tidy up the processed scan records and their update rows
    for (scan_id, scan_path) in scans.iter().take(limit) {
        scan::cleanup_scan(&source, *scan_id, scan_path)
            .with_context(|| format!("removing processed scan {}", scan_id))?;
    }

    sync::finalize_run(&target, last_scan_stamp, last_scan_id)?;

    stats.elapsed_seconds = run_start.elapsed().as_secs_f64();
    if !args.quiet {
        eprintln!(
            "[DONE] {} scans, {} pairs ({})",
            stats.scans_processed,
            stats.pairs_processed,
            format_duration(run_start.elapsed())
        );
        stats.log_phase("FINAL");
    }
    if let Some(path) = &args.export_stats {
        stats.write_to_file(path)?;
    }

    Ok(())
}

//! fieldsync-import - field-installation snapshot importer
//!
//! Reconciles spreadsheet exports into the canonical store, one batch per file.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use fieldsync_common::config::{
    load_toml_config, resolve_config_path, resolve_database_path, resolve_root_folder, TomlConfig,
};
use fieldsync_import::db::batches;
use fieldsync_import::models::ImportOutcome;
use fieldsync_import::services::{export_buckets, load_snapshot, DateWindow};
use fieldsync_import::{BatchCoordinator, ImportConfig, PipelineMode};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

/// Command-line arguments for fieldsync-import
#[derive(Parser, Debug)]
#[command(name = "fieldsync-import")]
#[command(about = "Reconcile field-installation snapshots into the canonical store")]
#[command(version)]
struct Args {
    /// Root folder holding the database and reports
    #[arg(long, global = true)]
    root_folder: Option<PathBuf>,

    /// Database file (default: <root folder>/fieldsync.db)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Config file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile one or more snapshot files
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Rows per chunk transaction
        #[arg(long)]
        batch_size: Option<usize>,

        /// Write post-batch reports here
        #[arg(long, value_name = "DIR")]
        report_dir: Option<PathBuf>,
    },

    /// Dedup by drop number, reconcile survivors and partition by date window
    Analyze {
        file: PathBuf,

        /// First day of the window (inclusive, YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Last day of the window (inclusive, YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,

        /// Only consider records with this status
        #[arg(long)]
        status: Option<String>,

        /// Export the buckets as CSV files here
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,

        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Show a stored batch (latest when no id is given)
    Batch { id: Option<Uuid> },

    /// Mark batches left running as failed
    RecoverStale {
        /// Only batches started more than this many minutes ago
        #[arg(long)]
        older_than_minutes: u64,

        #[arg(long, default_value_t = 500)]
        page_size: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = match resolve_config_path(args.config.as_deref())? {
        Some(path) => load_toml_config(&path)?,
        None => TomlConfig::default(),
    };

    // RUST_LOG, then --log-level, then [logging] level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(
            args.log_level
                .as_deref()
                .unwrap_or(toml_config.logging.level.as_str()),
        )
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("fieldsync-import {}", env!("CARGO_PKG_VERSION"));

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    let db_path = resolve_database_path(args.database.as_deref(), &toml_config, &root_folder);
    info!("Root folder: {}", root_folder.display());
    info!("Database: {}", db_path.display());

    let pool = fieldsync_common::db::init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let import_config = ImportConfig::from_toml(&toml_config)?;

    match args.command {
        Command::Import {
            files,
            batch_size,
            report_dir,
        } => {
            let config = import_config.with_overrides(batch_size, report_dir)?;
            run_import(pool, config, &files).await
        }
        Command::Analyze {
            file,
            start,
            end,
            status,
            out_dir,
            batch_size,
        } => {
            let config = import_config.with_overrides(batch_size, None)?;
            let window = window_for_days(start, end)?;
            run_analyze(pool, config, &file, window, status, out_dir.as_deref()).await
        }
        Command::Batch { id } => show_batch(&pool, id).await,
        Command::RecoverStale {
            older_than_minutes,
            page_size,
        } => {
            let older_than = Utc::now() - Duration::minutes(older_than_minutes as i64);
            let marked = batches::mark_abandoned_batches(
                &pool,
                older_than,
                page_size,
                import_config.lock_wait_ms,
            )
            .await?;
            println!("Marked {} abandoned batch(es) as failed", marked);
            Ok(())
        }
    }
}

async fn run_import(pool: SqlitePool, config: ImportConfig, files: &[PathBuf]) -> Result<()> {
    let coordinator = BatchCoordinator::new(pool, config);

    let mut failed = 0usize;
    for path in files {
        let result = match load_snapshot(path) {
            Ok(snapshot) => coordinator.run(snapshot, PipelineMode::Reconcile).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(outcome) => print_summary(&outcome),
            Err(e) => {
                error!(file = %path.display(), error = %e, "Import failed");
                eprintln!("{}: {}", path.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} file(s) failed", failed, files.len());
    }
    Ok(())
}

async fn run_analyze(
    pool: SqlitePool,
    config: ImportConfig,
    file: &Path,
    window: DateWindow,
    status_filter: Option<String>,
    out_dir: Option<&Path>,
) -> Result<()> {
    let coordinator = BatchCoordinator::new(pool, config);
    let snapshot = load_snapshot(file)?;
    let outcome = coordinator
        .run(
            snapshot,
            PipelineMode::BatchAnalysis {
                window,
                status_filter,
            },
        )
        .await?;
    print_summary(&outcome);

    let buckets = outcome
        .analysis
        .as_ref()
        .ok_or_else(|| anyhow!("analysis run produced no buckets"))?;
    println!("  window:          {} .. {}", window.start(), window.end());
    println!("  first entry:     {}", buckets.first_entry.len());
    println!("  pre-window dup:  {}", buckets.pre_window_duplicate.len());
    println!("  after window:    {}", buckets.after_window);
    println!("  no drop:         {}", buckets.unallocated.len());
    println!("  dup removed:     {}", buckets.duplicate_removed.len());
    println!("  filtered out:    {}", buckets.filtered_out.len());

    if let Some(dir) = out_dir {
        for path in export_buckets(buckets, coordinator.mapping_table(), dir)? {
            println!("  export: {}", path.display());
        }
    }
    Ok(())
}

async fn show_batch(pool: &SqlitePool, id: Option<Uuid>) -> Result<()> {
    let batch = match id {
        Some(id) => batches::load_batch(pool, id).await?,
        None => batches::latest_batch(pool).await?,
    };
    let batch = batch.ok_or_else(|| match id {
        Some(id) => anyhow!("batch {} not found", id),
        None => anyhow!("no batches recorded"),
    })?;
    println!("{}", serde_json::to_string_pretty(&batch)?);
    Ok(())
}

/// Whole-day window: start at 00:00:00, end at 23:59:59.999 (UTC)
fn window_for_days(start: NaiveDate, end: NaiveDate) -> Result<DateWindow> {
    let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
        .ok_or_else(|| anyhow!("invalid end-of-day time"))?;
    let window = DateWindow::new(
        Utc.from_utc_datetime(&start.and_time(NaiveTime::MIN)),
        Utc.from_utc_datetime(&end.and_time(end_of_day)),
    )?;
    Ok(window)
}

fn print_summary(outcome: &ImportOutcome) {
    let batch = &outcome.batch;
    println!("{}", batch.source_file);
    println!("  batch:           {} ({})", batch.id, batch.status);
    println!("  rows total:      {}", batch.total_rows);
    println!("  processed:       {}", batch.processed_rows);
    println!("  new:             {}", batch.new_entities);
    println!("  updated:         {}", batch.updated_entities);
    println!("  status changes:  {}", batch.status_changes);
    println!("  errors:          {}", batch.errors);
    println!("  duration:        {:.2}s", outcome.duration.as_secs_f64());
    println!("  rows/sec:        {:.1}", outcome.rows_per_second());
    for warning in &outcome.warnings {
        println!("  warning [{}]: {}", warning.code, warning.message);
    }
    for path in &outcome.report_paths {
        println!("  report: {}", path.display());
    }
}

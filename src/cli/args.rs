//! Command-line argument definitions for the RADIUS tracer
//!
//! The CLI has two modes: a one-shot `backfill` over today's detail files
//! and a continuous `watch` that tails them. Both share the same ingestion
//! options; flags map one-to-one onto [`crate::config::IngestConfig`].

use crate::app::models::ConflictPolicy;
use crate::config::IngestConfig;
use crate::constants::{DEFAULT_BATCH_SIZE, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_UTC_OFFSET_HOURS};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for the RADIUS accounting tracer
///
/// Ingests RADIUS accounting detail files into a subscriber location
/// history and a latest-known-location projection.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "radius-tracer",
    version,
    about = "Ingest RADIUS accounting detail files into subscriber location views",
    long_about = "Parses multi-line RADIUS accounting detail files, decodes the 3GPP cell \
                  location of each entry, and persists an append-only location history plus \
                  a latest-known-location row per subscriber. Runs either as a one-shot \
                  backfill over today's files or as a continuous tail watcher."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Process today's detail files once, then exit
    Backfill(BackfillArgs),
    /// Continuously tail today's detail files as they grow
    Watch(WatchArgs),
}

/// Ingestion options shared by both modes
#[derive(Debug, Clone, Parser)]
pub struct CommonArgs {
    /// SQLite database URL
    #[arg(
        long = "database-url",
        value_name = "URL",
        help = "SQLite database URL, e.g. sqlite://tracedb.sqlite?mode=rwc"
    )]
    pub database_url: Option<String>,

    /// Accounting root directory
    ///
    /// Must contain one subdirectory per RADIUS source, each holding
    /// date-stamped detail files.
    #[arg(
        short = 'a',
        long = "accounting-dir",
        value_name = "PATH",
        help = "Accounting root holding one subdirectory per source"
    )]
    pub accounting_dir: Option<PathBuf>,

    /// Detail file prefix within each source directory
    #[arg(
        long = "detail-prefix",
        value_name = "PREFIX",
        help = "Detail file prefix, date-stamped per day [default: detail-]"
    )]
    pub detail_prefix: Option<String>,

    /// Tower reference data CSV
    #[arg(
        long = "tower-index",
        value_name = "PATH",
        help = "Tower reference CSV mapping station/sector to name and coordinates"
    )]
    pub tower_index: Option<PathBuf>,

    /// Records per transactional batch
    #[arg(
        short = 'b',
        long = "batch-size",
        value_name = "N",
        default_value_t = DEFAULT_BATCH_SIZE,
        help = "Records accumulated before each transactional flush"
    )]
    pub batch_size: usize,

    /// Conflict handling for the latest-location projection
    #[arg(
        long = "conflict-policy",
        value_enum,
        default_value = "prefer-newer-event",
        help = "How racing writers resolve the latest-location row"
    )]
    pub conflict_policy: ConflictPolicy,

    /// Fixed local offset for event times, hours east of UTC
    #[arg(
        long = "utc-offset",
        value_name = "HOURS",
        default_value_t = DEFAULT_UTC_OFFSET_HOURS,
        allow_hyphen_values = true,
        help = "Fixed local offset applied to event times, hours east of UTC"
    )]
    pub utc_offset_hours: i32,

    /// Progress checkpoint file
    #[arg(
        long = "progress-file",
        value_name = "PATH",
        help = "Byte-offset checkpoint file shared by both modes"
    )]
    pub progress_file: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short = 'q', long = "quiet", conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Arguments for the backfill command
#[derive(Debug, Clone, Parser)]
pub struct BackfillArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Worker pool size (0 derives from CPU count)
    #[arg(
        short = 'w',
        long = "workers",
        value_name = "N",
        default_value_t = 0,
        help = "Concurrent file workers; 0 derives a bound from the CPU count"
    )]
    pub workers: usize,

    /// Keep detail files on disk after auditing
    ///
    /// By default a fully processed file is deleted once its audit row
    /// has committed.
    #[arg(long = "keep-files", help = "Do not delete detail files after auditing")]
    pub keep_files: bool,

    /// Ingest events regardless of their calendar day
    ///
    /// By default backfill only accepts events dated on the run day.
    #[arg(long = "all-days", help = "Disable the same-day event filter")]
    pub all_days: bool,

    /// Single-instance lock file
    #[arg(
        long = "lock-file",
        value_name = "PATH",
        help = "Lock file preventing concurrent backfill runs"
    )]
    pub lock_file: Option<PathBuf>,
}

/// Arguments for the watch command
#[derive(Debug, Clone, Parser)]
pub struct WatchArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Poll interval in seconds
    #[arg(
        short = 'p',
        long = "poll-interval",
        value_name = "SECS",
        default_value_t = DEFAULT_POLL_INTERVAL_SECS,
        help = "Seconds between polls of each source's detail file"
    )]
    pub poll_interval_secs: u64,

    /// Reject events not dated on the current day
    #[arg(
        long = "same-day-only",
        help = "Drop events whose calendar day is not today"
    )]
    pub same_day_only: bool,
}

impl CommonArgs {
    /// Effective tracing level from the verbosity flags
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            "warn"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }

    /// Overlay these options on a default configuration
    pub fn apply(&self, mut config: IngestConfig) -> IngestConfig {
        if let Some(url) = &self.database_url {
            config.database_url = url.clone();
        }
        if let Some(dir) = &self.accounting_dir {
            config.accounting_dir = dir.clone();
        }
        if let Some(prefix) = &self.detail_prefix {
            config.detail_prefix = prefix.clone();
        }
        if let Some(path) = &self.tower_index {
            config.tower_index_path = path.clone();
        }
        if let Some(path) = &self.progress_file {
            config.progress_file = path.clone();
        }
        config.batch_size = self.batch_size;
        config.conflict_policy = self.conflict_policy;
        config.utc_offset_hours = self.utc_offset_hours;
        config
    }
}

impl BackfillArgs {
    /// Build the run configuration for backfill mode
    pub fn to_config(&self) -> IngestConfig {
        let mut config = self.common.apply(IngestConfig::default());
        config.max_workers = self.workers;
        config.delete_after_audit = !self.keep_files;
        config.same_day_only = !self.all_days;
        if let Some(path) = &self.lock_file {
            config.lock_file = path.clone();
        }
        config
    }
}

impl WatchArgs {
    /// Build the run configuration for watch mode
    pub fn to_config(&self) -> IngestConfig {
        let mut config = self.common.apply(IngestConfig::default());
        config.poll_interval_secs = self.poll_interval_secs;
        config.same_day_only = self.same_day_only;
        // The watcher never deletes files and holds no exclusive lock
        config.delete_after_audit = false;
        config
    }
}

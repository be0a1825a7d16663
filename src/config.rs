//! Configuration management and validation.
//!
//! Provides the configuration structure for ingestion parameters: source
//! directories, batching, concurrency, conflict policy, and the paths of
//! the shared progress and lock files.

use crate::app::models::ConflictPolicy;
use crate::constants;
use crate::{Error, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global configuration for RADIUS ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Database connection URL
    pub database_url: String,

    /// Root directory containing one subdirectory per accounting source
    pub accounting_dir: PathBuf,

    /// Detail file prefix within each source directory
    pub detail_prefix: String,

    /// Tower reference data CSV path
    pub tower_index_path: PathBuf,

    /// Records accumulated before a batch flush
    pub batch_size: usize,

    /// Worker pool bound for backfill (0 = derive from CPU count)
    pub max_workers: usize,

    /// Conflict policy applied to the latest-location projection
    pub conflict_policy: ConflictPolicy,

    /// Discard events whose calendar date is not "today" (backfill only)
    pub same_day_only: bool,

    /// Delete source files once their audit row has committed (backfill only)
    pub delete_after_audit: bool,

    /// Fixed local offset applied to event times, hours east of UTC
    pub utc_offset_hours: i32,

    /// Tail-mode poll interval in seconds
    pub poll_interval_secs: u64,

    /// Reference-data cache TTL in seconds
    pub cache_ttl_secs: u64,

    /// Audit rows older than this many days are purged during maintenance
    pub audit_retention_days: i64,

    /// Shared progress checkpoint file
    pub progress_file: PathBuf,

    /// Single-instance backfill lock file
    pub lock_file: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let state_dir = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("radius_tracer");

        Self {
            database_url: "sqlite://tracedb.sqlite?mode=rwc".to_string(),
            accounting_dir: PathBuf::from("/var/log/freeradius/radacct"),
            detail_prefix: constants::DETAIL_PREFIX.to_string(),
            tower_index_path: PathBuf::from("data/tower_index.csv"),
            batch_size: constants::DEFAULT_BATCH_SIZE,
            max_workers: 0,
            conflict_policy: ConflictPolicy::PreferNewerEvent,
            same_day_only: true,
            delete_after_audit: true,
            utc_offset_hours: constants::DEFAULT_UTC_OFFSET_HOURS,
            poll_interval_secs: constants::DEFAULT_POLL_INTERVAL_SECS,
            cache_ttl_secs: constants::DEFAULT_CACHE_TTL_SECS,
            audit_retention_days: constants::DEFAULT_AUDIT_RETENTION_DAYS,
            progress_file: state_dir.join("ingest_progress.txt"),
            lock_file: state_dir.join("backfill.lock"),
        }
    }
}

impl IngestConfig {
    /// Create configuration with a custom database URL
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Create configuration with a custom accounting root directory
    pub fn with_accounting_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.accounting_dir = dir.into();
        self
    }

    /// Create configuration with a custom batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Create configuration with a custom worker count
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Create configuration with a custom conflict policy
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Disable the backfill same-day filter
    pub fn without_same_day_filter(mut self) -> Self {
        self.same_day_only = false;
        self
    }

    /// Keep source files in place after auditing
    pub fn without_file_deletion(mut self) -> Self {
        self.delete_after_audit = false;
        self
    }

    /// Effective worker pool size: configured value, or CPU count capped
    /// at a small constant
    pub fn effective_workers(&self) -> usize {
        if self.max_workers > 0 {
            self.max_workers
        } else {
            num_cpus::get().min(constants::MAX_WORKERS_CAP).max(1)
        }
    }

    /// Fixed offset for event-time normalization
    pub fn local_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            Error::configuration(format!(
                "invalid UTC offset: {} hours",
                self.utc_offset_hours
            ))
        })
    }

    /// Validate parameter ranges before a run starts
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::configuration("batch_size must be at least 1"));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::configuration(
                "poll_interval_secs must be at least 1",
            ));
        }
        if self.detail_prefix.is_empty() {
            return Err(Error::configuration("detail_prefix must not be empty"));
        }
        self.local_offset()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 1000);
        assert!(config.same_day_only);
    }

    #[test]
    fn effective_workers_respects_override_and_cap() {
        let config = IngestConfig::default().with_max_workers(3);
        assert_eq!(config.effective_workers(), 3);

        let auto = IngestConfig::default();
        assert!(auto.effective_workers() >= 1);
        assert!(auto.effective_workers() <= constants::MAX_WORKERS_CAP);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let config = IngestConfig::default().with_batch_size(0);
        assert!(matches!(
            config.validate(),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn local_offset_matches_configured_hours() {
        let config = IngestConfig::default();
        let offset = config.local_offset().unwrap();
        assert_eq!(offset.local_minus_utc(), -4 * 3600);
    }
}

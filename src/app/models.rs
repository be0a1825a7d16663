//! Data models for RADIUS ingestion
//!
//! This module contains the core data structures flowing through the
//! pipeline: the transient attribute block reconstructed from a detail
//! file, the canonical record that gets persisted, and the per-file and
//! per-run accounting types.

use crate::constants::{MIN_MSISDN_LEN, STORED_TIMESTAMP_FORMAT};
use crate::{Error, Result};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// =============================================================================
// Raw Attribute Block
// =============================================================================

/// One blank-line-delimited attribute block from a detail file.
///
/// Attribute order is preserved as read. A `RawEntry` is transient: it is
/// either promoted to a [`CanonicalRecord`] or dropped, and never crosses
/// the parser/builder boundary as an untyped map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    attributes: Vec<(String, String)>,
}

impl RawEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attribute, keeping insertion order
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.push((key.into(), value.into()));
    }

    /// First value recorded for `key`, if any
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Trimmed value for `key`, or an empty string when absent
    pub fn get_trimmed(&self, key: &str) -> &str {
        self.get(key).map(str::trim).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }
}

// =============================================================================
// Canonical Record
// =============================================================================

/// The unit of persistence: one validated subscriber location event.
///
/// Constructed only once the subscriber identity, a decodable location and
/// a parseable event time are all present; anything less is rejected by the
/// builder and never reaches the persistence engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Subscriber MSISDN, at least [`MIN_MSISDN_LEN`] characters
    pub msisdn: String,

    /// Subscriber module identity, when present
    pub imsi: Option<String>,

    /// Radio station identifier, high bits of the cell-global identifier
    pub station_id: u32,

    /// Sector identifier, low 8 bits of the cell-global identifier
    pub sector_id: u8,

    /// Tower name resolved from reference data
    pub tower_name: Option<String>,

    /// Tower latitude in decimal degrees
    pub lat: Option<f64>,

    /// Tower longitude in decimal degrees
    pub lon: Option<f64>,

    /// Event time normalized to the configured fixed offset
    pub event_time: DateTime<FixedOffset>,

    /// Device model resolved by allocation-code prefix
    pub device_model: String,
}

impl CanonicalRecord {
    /// Validate invariants that must hold for every persisted record
    pub fn validate(&self) -> Result<()> {
        if self.msisdn.trim().len() < MIN_MSISDN_LEN {
            return Err(Error::configuration(format!(
                "invalid MSISDN '{}': shorter than {} characters",
                self.msisdn, MIN_MSISDN_LEN
            )));
        }
        Ok(())
    }

    /// Event time in the storage layout, lexicographically ordered within
    /// the fixed offset
    pub fn stored_event_time(&self) -> String {
        self.event_time.format(STORED_TIMESTAMP_FORMAT).to_string()
    }
}

// =============================================================================
// Conflict Policy
// =============================================================================

/// Write-conflict handling for the latest-location projection.
///
/// The history store always deduplicates on its natural key; this policy
/// only governs what happens when two ingestion paths race on the same
/// subscriber's latest row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Overwrite only when the incoming event time is strictly newer than
    /// the stored one, so the projection is monotone in event time
    PreferNewerEvent,

    /// Overwrite unconditionally, reflecting processing order
    LastWriterWins,
}

// =============================================================================
// Processing Statistics
// =============================================================================

/// Counters produced by one batch write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Rows actually inserted into the history store
    pub history_inserted: u64,

    /// Rows affected in the latest-location projection
    pub latest_affected: u64,
}

/// Per-file processing statistics, the basis of the audit row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStats {
    /// Attribute blocks parsed from the file
    pub processed: u64,

    /// Blocks that survived validation
    pub valid: u64,

    /// History rows actually inserted
    pub inserted: u64,

    /// Processing wall-clock seconds
    pub runtime_seconds: u64,
}

impl FileStats {
    /// Valid records skipped by the history natural-key constraint
    pub fn deduplicated(&self) -> u64 {
        self.valid.saturating_sub(self.inserted)
    }
}

/// Aggregate outcome of a backfill run
#[derive(Debug, Clone, Default)]
pub struct BackfillReport {
    /// Files fully processed and audited
    pub files_processed: usize,

    /// Files that failed and were left in place for retry
    pub files_failed: usize,

    /// Blocks parsed across all files
    pub total_processed: u64,

    /// History rows inserted across all files
    pub total_inserted: u64,

    /// Total run duration in milliseconds
    pub runtime_ms: u128,

    /// Files that failed, for operator follow-up
    pub failed_files: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_record() -> CanonicalRecord {
        let offset = FixedOffset::east_opt(-4 * 3600).unwrap();
        CanonicalRecord {
            msisdn: "5926771234".to_string(),
            imsi: Some("738020123456789".to_string()),
            station_id: 4038,
            sector_id: 14,
            tower_name: Some("GEORGETOWN_EAST".to_string()),
            lat: Some(6.8013),
            lon: Some(-58.1553),
            event_time: offset.with_ymd_and_hms(2025, 8, 30, 10, 15, 0).unwrap(),
            device_model: "Unknown Device".to_string(),
        }
    }

    #[test]
    fn raw_entry_preserves_order_and_first_value() {
        let mut entry = RawEntry::new();
        entry.push("Calling-Station-Id", "5926771234");
        entry.push("User-Name", "first");
        entry.push("User-Name", "second");

        assert_eq!(entry.get("User-Name"), Some("first"));
        assert_eq!(entry.get_trimmed("Missing-Key"), "");
        assert_eq!(entry.len(), 3);
    }

    #[test]
    fn valid_record_passes_validation() {
        assert!(sample_record().validate().is_ok());
    }

    #[test]
    fn short_msisdn_fails_validation() {
        let mut record = sample_record();
        record.msisdn = "59267".to_string();
        assert!(record.validate().is_err());
    }

    #[test]
    fn stored_event_time_uses_lexicographic_layout() {
        let record = sample_record();
        assert_eq!(record.stored_event_time(), "2025-08-30 10:15:00");
    }

    #[test]
    fn deduplicated_counts_conflicting_rows() {
        let stats = FileStats {
            processed: 10,
            valid: 8,
            inserted: 5,
            runtime_seconds: 1,
        };
        assert_eq!(stats.deduplicated(), 3);
    }
}

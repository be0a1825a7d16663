//! Application constants for the RADIUS trace ingestor
//!
//! This module contains the attribute names, file patterns, and default
//! values used throughout the ingestion pipeline.

// =============================================================================
// Detail File Layout
// =============================================================================

/// Filename prefix of gateway accounting detail files
pub const DETAIL_PREFIX: &str = "detail-";

/// Date stamp appended to the detail prefix (e.g. `detail-20250830`)
pub const DETAIL_DATE_FORMAT: &str = "%Y%m%d";

// =============================================================================
// RADIUS Attribute Names
// =============================================================================

/// Attribute names consumed from each detail record
pub mod attributes {
    /// Subscriber MSISDN
    pub const CALLING_STATION_ID: &str = "Calling-Station-Id";

    /// Primary subscriber module identity
    pub const IMSI: &str = "3GPP-IMSI";

    /// Fallback identity attribute when the IMSI is absent
    pub const USER_NAME: &str = "User-Name";

    /// Hexadecimal location information element
    pub const USER_LOCATION_INFO: &str = "3GPP-User-Location-Info";

    /// Event timestamp, textual or epoch-numeric
    pub const EVENT_TIMESTAMP: &str = "Event-Timestamp";

    /// Device identity carrying the type-allocation code prefix
    pub const IMEISV: &str = "3GPP-IMEISV";

    /// Older device identity attribute, used when IMEISV is absent
    pub const IMEI: &str = "3GPP-IMEI";
}

// =============================================================================
// Timestamp Handling
// =============================================================================

/// Textual event timestamp layout, e.g. `Jun 03 2025 14:22:01 UTC`
/// (the trailing timezone token is stripped before parsing)
pub const EVENT_TIMESTAMP_FORMAT: &str = "%b %d %Y %H:%M:%S";

/// Storage layout for event times, lexicographically ordered within the
/// fixed offset so SQL comparisons agree with chronological order
pub const STORED_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Fixed local offset applied to every event time, in hours east of UTC
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = -4;

// =============================================================================
// Validation Rules
// =============================================================================

/// Minimum MSISDN length after trimming
pub const MIN_MSISDN_LEN: usize = 10;

/// Length of the type-allocation-code prefix taken from the device identity
pub const TAC_PREFIX_LEN: usize = 8;

/// Display string for devices the registry cannot resolve
pub const UNKNOWN_DEVICE: &str = "Unknown Device";

// =============================================================================
// Processing Defaults
// =============================================================================

/// Records accumulated before a batch is flushed
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Upper bound on the backfill worker pool
pub const MAX_WORKERS_CAP: usize = 8;

/// Connection retry budget
pub const DB_MAX_RETRIES: u32 = 3;

/// Delay between connection attempts, in seconds
pub const DB_RETRY_DELAY_SECS: u64 = 1;

/// Tail-mode poll interval, in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Heartbeat sampling interval during a backfill run, in seconds
pub const HEARTBEAT_INTERVAL_SECS: u64 = 60;

/// Audit retention window, in days
pub const DEFAULT_AUDIT_RETENTION_DAYS: i64 = 30;

/// Reference-data cache time-to-live, in seconds
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Source tag written by the backfill ingest path
pub const SOURCE_BACKFILL: &str = "backfill";

/// Source tag written by the continuous tail ingest path
pub const SOURCE_WATCHER: &str = "watcher";

//! RADIUS Trace Ingestion Library
//!
//! A Rust library for ingesting RADIUS accounting "detail" files into two
//! persistent views: an append-only subscriber location history and a
//! latest-known-location projection keyed by MSISDN.
//!
//! This library provides tools for:
//! - Parsing multi-line RADIUS detail records with blank-line block framing
//! - Decoding the cell-global identifier from 3GPP location codes
//! - Validating and normalizing records into a canonical shape
//! - Crash-safe resumable processing via per-file byte-offset checkpoints
//! - Idempotent, transactional batched persistence with configurable
//!   conflict handling on the latest-location projection
//! - Bounded-concurrency backfill and continuous tail orchestration

pub mod config;
pub mod constants;

// Core application modules
pub mod app {
    pub mod models;
    pub mod services {
        pub mod device_registry;
        pub mod location_decoder;
        pub mod progress_tracker;
        pub mod record_builder;
        pub mod record_parser;
        pub mod tower_index;
    }
}

// Persistence modules
pub mod db {
    pub mod audit;
    pub mod persistence;
    pub mod pool;
    pub mod schema;
}

// Orchestration modules
pub mod processor;

// CLI modules
pub mod cli {
    pub mod args;
    pub mod commands;
}

// Re-export commonly used types
pub use app::models::{CanonicalRecord, ConflictPolicy, RawEntry};
pub use config::IngestConfig;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error types for RADIUS ingestion operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Database operation failed
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: sqlx::Error,
    },

    /// Database connection could not be established within the retry budget
    #[error("Database unavailable after {attempts} attempts: {message}")]
    DatabaseUnavailable { attempts: u32, message: String },

    /// Reference data error
    #[error("Reference data error in '{file}': {message}")]
    ReferenceData {
        file: String,
        message: String,
        #[source]
        source: Option<csv::Error>,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Accounting directory enumeration error
    #[error("Discovery error in '{path}': {message}")]
    Discovery { path: String, message: String },

    /// Per-file processing error, isolated to the named file
    #[error("Failed processing '{file}': {message}")]
    FileProcessing { file: String, message: String },

    /// Date/time parsing error
    #[error("Date/time parsing error: {message}")]
    DateTimeParsing {
        message: String,
        #[source]
        source: chrono::ParseError,
    },

    /// Another backfill run holds the single-instance lock
    #[error("Backfill already running: lock file '{path}' exists")]
    AlreadyRunning { path: String },
}

impl Error {
    /// Create an I/O error with context
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a database error with context
    pub fn database(message: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Database {
            message: message.into(),
            source,
        }
    }

    /// Create a database-unavailable error
    pub fn database_unavailable(attempts: u32, message: impl Into<String>) -> Self {
        Self::DatabaseUnavailable {
            attempts,
            message: message.into(),
        }
    }

    /// Create a reference data error with context
    pub fn reference_data(
        file: impl Into<String>,
        message: impl Into<String>,
        source: Option<csv::Error>,
    ) -> Self {
        Self::ReferenceData {
            file: file.into(),
            message: message.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a discovery error
    pub fn discovery(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Discovery {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a per-file processing error
    pub fn file_processing(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FileProcessing {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Create an already-running error
    pub fn already_running(path: impl Into<String>) -> Self {
        Self::AlreadyRunning { path: path.into() }
    }
}

// Automatic conversions from common error types
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            message: "I/O operation failed".to_string(),
            source: error,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        Self::Database {
            message: "database operation failed".to_string(),
            source: error,
        }
    }
}

impl From<csv::Error> for Error {
    fn from(error: csv::Error) -> Self {
        Self::ReferenceData {
            file: "unknown".to_string(),
            message: "reference data parsing failed".to_string(),
            source: Some(error),
        }
    }
}

impl From<chrono::ParseError> for Error {
    fn from(error: chrono::ParseError) -> Self {
        Self::DateTimeParsing {
            message: "date/time parsing failed".to_string(),
            source: error,
        }
    }
}

//! Logical schema for the trace stores
//!
//! Three persisted views plus the device-model reference table. The
//! history table's natural key carries the dedup semantics; the latest
//! projection holds exactly one row per subscriber.

use crate::{Error, Result};
use sqlx::{Pool, Sqlite};
use tracing::debug;

/// Ensure all required tables and indexes exist
pub async fn init_schema(pool: &Pool<Sqlite>) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS location_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            msisdn TEXT NOT NULL,
            imsi TEXT,
            station_id INTEGER NOT NULL,
            sector_id INTEGER NOT NULL,
            tower_name TEXT,
            lat REAL,
            lon REAL,
            event_time TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (msisdn, station_id, sector_id, event_time)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS latest_location (
            msisdn TEXT PRIMARY KEY,
            imsi TEXT,
            station_id INTEGER,
            sector_id INTEGER,
            tower_name TEXT,
            lat REAL,
            lon REAL,
            event_time TEXT,
            source TEXT,
            device_model TEXT,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS ingest_audit (
            filename TEXT PRIMARY KEY,
            processed INTEGER NOT NULL,
            inserted INTEGER NOT NULL,
            deduplicated INTEGER NOT NULL,
            runtime_seconds INTEGER NOT NULL,
            audited_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS device_models (
            tac TEXT PRIMARY KEY,
            manufacturer TEXT,
            model TEXT,
            device_type TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_history_msisdn ON location_history (msisdn)",
        "CREATE INDEX IF NOT EXISTS idx_history_event_time ON location_history (event_time)",
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| Error::database("schema initialization failed", e))?;
    }

    debug!("Schema initialized");
    Ok(())
}

//! Database connection management
//!
//! Connection establishment retries a bounded number of times with a fixed
//! delay before escalating; everything downstream assumes a live pool.

use crate::constants::{DB_MAX_RETRIES, DB_RETRY_DELAY_SECS};
use crate::{Error, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::time::Duration;
use tracing::{info, warn};

/// Connect to the trace database with bounded retry
pub async fn connect(database_url: &str) -> Result<Pool<Sqlite>> {
    let mut last_error: Option<sqlx::Error> = None;

    for attempt in 1..=DB_MAX_RETRIES {
        match SqlitePoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
        {
            Ok(pool) => {
                info!("Database connected (attempt {})", attempt);
                return Ok(pool);
            }
            Err(e) => {
                warn!("Database connection failed (attempt {}): {}", attempt, e);
                last_error = Some(e);
                if attempt < DB_MAX_RETRIES {
                    tokio::time::sleep(Duration::from_secs(DB_RETRY_DELAY_SECS)).await;
                }
            }
        }
    }

    Err(Error::database_unavailable(
        DB_MAX_RETRIES,
        last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no connection attempt recorded".to_string()),
    ))
}

/// In-memory database for tests; a single connection keeps every query on
/// the same memory store
pub async fn connect_memory() -> Result<Pool<Sqlite>> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .map_err(|e| Error::database("failed to open in-memory database", e))
}

//! Periodic liveness reporting.
//!
//! Long runs emit a heartbeat line with process memory and the history row
//! count, so an operator tailing the logs can tell a stalled run from a
//! slow one. The task is owned by its caller and stops through the
//! cancellation token rather than a shared mutable flag.

use crate::constants::HEARTBEAT_INTERVAL_SECS;
use sqlx::{Pool, Sqlite};
use std::time::{Duration, Instant};
use sysinfo::System;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Run the heartbeat loop until `cancel` fires
pub async fn run(pool: Pool<Sqlite>, cancel: CancellationToken) {
    let started = Instant::now();
    let mut system = System::new();
    let mut ticker = time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    // The first tick fires immediately; skip it so the first beat lands a
    // full interval into the run.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => beat(&pool, &mut system, started).await,
        }
    }
}

async fn beat(pool: &Pool<Sqlite>, system: &mut System, started: Instant) {
    system.refresh_memory();
    let used_mb = system.used_memory() / (1024 * 1024);
    let total_mb = system.total_memory() / (1024 * 1024);

    let history_rows: Option<i64> =
        match sqlx::query_scalar("SELECT COUNT(*) FROM location_history")
            .fetch_one(pool)
            .await
        {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("Heartbeat row count failed: {}", e);
                None
            }
        };

    match history_rows {
        Some(rows) => info!(
            "Heartbeat: up {}s, memory {}/{} MB, {} history rows",
            started.elapsed().as_secs(),
            used_mb,
            total_mb,
            rows
        ),
        None => info!(
            "Heartbeat: up {}s, memory {}/{} MB",
            started.elapsed().as_secs(),
            used_mb,
            total_mb
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::connect_memory;
    use crate::db::schema::init_schema;

    #[tokio::test]
    async fn heartbeat_stops_on_cancellation() {
        let pool = connect_memory().await.unwrap();
        init_schema(&pool).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(pool, cancel.clone()));

        cancel.cancel();
        // Must return promptly once cancelled
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

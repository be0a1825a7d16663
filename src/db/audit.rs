//! Per-file completion auditing
//!
//! One audit row per fully processed file, keyed by filename, written
//! insert-if-absent so reprocessing the same file never double-counts.
//! The figures reflect what was durably written, not what was attempted.

use crate::app::models::FileStats;
use crate::{Error, Result};
use sqlx::{Pool, Sqlite};
use tracing::{debug, info};

/// Record a file's outcome exactly once.
///
/// Returns `true` when this call created the audit row, `false` when the
/// file had already been audited by an earlier run.
pub async fn record_outcome(
    pool: &Pool<Sqlite>,
    filename: &str,
    stats: &FileStats,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO ingest_audit
            (filename, processed, inserted, deduplicated, runtime_seconds)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (filename) DO NOTHING
        "#,
    )
    .bind(filename)
    .bind(stats.processed as i64)
    .bind(stats.inserted as i64)
    .bind(stats.deduplicated() as i64)
    .bind(stats.runtime_seconds as i64)
    .execute(pool)
    .await
    .map_err(|e| Error::database("audit insert failed", e))?;

    let created = result.rows_affected() > 0;
    if created {
        info!(
            "Audited {}: {} processed, {} inserted, {} deduplicated in {}s",
            filename,
            stats.processed,
            stats.inserted,
            stats.deduplicated(),
            stats.runtime_seconds
        );
    } else {
        debug!("File {} already audited, keeping the original row", filename);
    }
    Ok(created)
}

/// Purge audit rows older than the retention window; returns rows removed
pub async fn purge_older_than(pool: &Pool<Sqlite>, retention_days: i64) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM ingest_audit
         WHERE audited_at < datetime('now', '-' || ? || ' days')",
    )
    .bind(retention_days)
    .execute(pool)
    .await
    .map_err(|e| Error::database("audit purge failed", e))?;

    if result.rows_affected() > 0 {
        info!("Purged {} audit rows past retention", result.rows_affected());
    }
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::connect_memory;
    use crate::db::schema::init_schema;

    fn stats() -> FileStats {
        FileStats {
            processed: 120,
            valid: 110,
            inserted: 100,
            runtime_seconds: 7,
        }
    }

    #[tokio::test]
    async fn audit_row_written_exactly_once() {
        let pool = connect_memory().await.unwrap();
        init_schema(&pool).await.unwrap();

        assert!(record_outcome(&pool, "detail-20250830", &stats()).await.unwrap());
        assert!(!record_outcome(&pool, "detail-20250830", &stats()).await.unwrap());

        let (processed, deduplicated): (i64, i64) = sqlx::query_as(
            "SELECT processed, deduplicated FROM ingest_audit WHERE filename = ?",
        )
        .bind("detail-20250830")
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(processed, 120);
        assert_eq!(deduplicated, 10);
    }

    #[tokio::test]
    async fn purge_removes_only_aged_rows() {
        let pool = connect_memory().await.unwrap();
        init_schema(&pool).await.unwrap();

        record_outcome(&pool, "detail-20250830", &stats()).await.unwrap();
        sqlx::query(
            "INSERT INTO ingest_audit
             (filename, processed, inserted, deduplicated, runtime_seconds, audited_at)
             VALUES ('detail-20250501', 1, 1, 0, 1, datetime('now', '-90 days'))",
        )
        .execute(&pool)
        .await
        .unwrap();

        let purged = purge_older_than(&pool, 30).await.unwrap();
        assert_eq!(purged, 1);

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ingest_audit")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }
}

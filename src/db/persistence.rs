//! Batched, transactional persistence of canonical records
//!
//! Each batch performs two writes inside one transaction: an append to the
//! history store, deduplicated by its natural key, and an upsert of the
//! latest-location projection governed by the configured conflict policy.
//! Either both tables see the batch or neither does.

use crate::app::models::{BatchOutcome, CanonicalRecord, ConflictPolicy};
use crate::{Error, Result};
use sqlx::{Pool, Sqlite};
use tracing::debug;

/// Writes record batches for one ingestion path
#[derive(Debug, Clone)]
pub struct BatchWriter {
    pool: Pool<Sqlite>,
    policy: ConflictPolicy,
    /// Source tag stamped on every latest-location row this path touches
    source: &'static str,
}

impl BatchWriter {
    pub fn new(pool: Pool<Sqlite>, policy: ConflictPolicy, source: &'static str) -> Self {
        Self {
            pool,
            policy,
            source,
        }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Persist one batch transactionally.
    ///
    /// History conflicts on the natural key are silently skipped; the
    /// latest-location upsert follows the conflict policy. Returns how many
    /// rows each table actually took.
    pub async fn write_batch(&self, records: &[CanonicalRecord]) -> Result<BatchOutcome> {
        if records.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::database("failed to begin batch transaction", e))?;

        let mut outcome = BatchOutcome::default();

        for record in records {
            let event_time = record.stored_event_time();

            let history = sqlx::query(
                r#"
                INSERT INTO location_history
                    (msisdn, imsi, station_id, sector_id, tower_name, lat, lon, event_time)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (msisdn, station_id, sector_id, event_time) DO NOTHING
                "#,
            )
            .bind(&record.msisdn)
            .bind(&record.imsi)
            .bind(record.station_id)
            .bind(record.sector_id)
            .bind(&record.tower_name)
            .bind(record.lat)
            .bind(record.lon)
            .bind(&event_time)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::database("history insert failed", e))?;
            outcome.history_inserted += history.rows_affected();

            let upsert = match self.policy {
                ConflictPolicy::LastWriterWins => {
                    r#"
                    INSERT INTO latest_location
                        (msisdn, imsi, station_id, sector_id, tower_name, lat, lon,
                         event_time, source, device_model, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
                    ON CONFLICT (msisdn) DO UPDATE SET
                        imsi = excluded.imsi,
                        station_id = excluded.station_id,
                        sector_id = excluded.sector_id,
                        tower_name = excluded.tower_name,
                        lat = excluded.lat,
                        lon = excluded.lon,
                        event_time = excluded.event_time,
                        source = excluded.source,
                        device_model = excluded.device_model,
                        updated_at = CURRENT_TIMESTAMP
                    "#
                }
                ConflictPolicy::PreferNewerEvent => {
                    r#"
                    INSERT INTO latest_location
                        (msisdn, imsi, station_id, sector_id, tower_name, lat, lon,
                         event_time, source, device_model, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
                    ON CONFLICT (msisdn) DO UPDATE SET
                        imsi = excluded.imsi,
                        station_id = excluded.station_id,
                        sector_id = excluded.sector_id,
                        tower_name = excluded.tower_name,
                        lat = excluded.lat,
                        lon = excluded.lon,
                        event_time = excluded.event_time,
                        source = excluded.source,
                        device_model = excluded.device_model,
                        updated_at = CURRENT_TIMESTAMP
                    WHERE excluded.event_time > latest_location.event_time
                    "#
                }
            };

            let latest = sqlx::query(upsert)
                .bind(&record.msisdn)
                .bind(&record.imsi)
                .bind(record.station_id)
                .bind(record.sector_id)
                .bind(&record.tower_name)
                .bind(record.lat)
                .bind(record.lon)
                .bind(&event_time)
                .bind(self.source)
                .bind(&record.device_model)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::database("latest-location upsert failed", e))?;
            outcome.latest_affected += latest.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| Error::database("failed to commit batch transaction", e))?;

        debug!(
            "Batch flushed: {} records, {} history rows, {} latest rows",
            records.len(),
            outcome.history_inserted,
            outcome.latest_affected
        );
        Ok(outcome)
    }
}

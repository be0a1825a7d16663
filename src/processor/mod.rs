//! Ingestion orchestration.
//!
//! The per-file pipeline lives here, shared by one-shot backfill and the
//! continuous tail watcher: resume from the checkpointed byte offset, scan
//! attribute blocks incrementally, build canonical records, and flush
//! batches transactionally with the checkpoint advanced only after each
//! flush commits.

pub mod backfill;
pub mod discovery;
pub mod heartbeat;
pub mod tail;

use crate::app::models::{CanonicalRecord, FileStats, RawEntry};
use crate::app::services::progress_tracker::ProgressTracker;
use crate::app::services::record_builder::RecordBuilder;
use crate::app::services::record_parser::EntryScanner;
use crate::constants::{DB_MAX_RETRIES, DB_RETRY_DELAY_SECS};
use crate::db::persistence::BatchWriter;
use crate::{Error, Result};
use chrono::NaiveDate;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Shared per-file processing pipeline.
///
/// Cheap to clone; the writer and tracker are shared behind `Arc` so one
/// pipeline serves every worker in a run.
#[derive(Debug, Clone)]
pub struct FilePipeline {
    builder: RecordBuilder,
    writer: Arc<BatchWriter>,
    tracker: Arc<ProgressTracker>,
    batch_size: usize,
}

impl FilePipeline {
    pub fn new(
        builder: RecordBuilder,
        writer: Arc<BatchWriter>,
        tracker: Arc<ProgressTracker>,
        batch_size: usize,
    ) -> Self {
        Self {
            builder,
            writer,
            tracker,
            batch_size,
        }
    }

    /// Assemble a pipeline from configuration, tagging writes with `source`
    pub async fn from_config(
        config: &crate::config::IngestConfig,
        db: &sqlx::Pool<sqlx::Sqlite>,
        source: &'static str,
    ) -> Result<Self> {
        use crate::app::services::device_registry::DeviceRegistry;
        use crate::app::services::location_decoder::LocationDecoder;
        use crate::app::services::tower_index::{TowerCache, TowerIndex};

        let ttl = Duration::from_secs(config.cache_ttl_secs);

        let towers = if config.tower_index_path.exists() {
            Arc::new(TowerCache::load(&config.tower_index_path, ttl)?)
        } else {
            warn!(
                "Tower index {} not found, records will carry no tower metadata",
                config.tower_index_path.display()
            );
            Arc::new(TowerCache::from_index(TowerIndex::default(), ttl))
        };

        let devices = Arc::new(DeviceRegistry::load(db.clone(), ttl).await?);
        let builder = RecordBuilder::new(
            LocationDecoder::new(towers),
            devices,
            config.local_offset()?,
            config.same_day_only,
        );
        let writer = Arc::new(BatchWriter::new(db.clone(), config.conflict_policy, source));
        let tracker = Arc::new(ProgressTracker::new(&config.progress_file));

        Ok(Self::new(builder, writer, tracker, config.batch_size))
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Reload stale reference data; failures keep the previous snapshot
    pub async fn refresh_reference_data(&self) {
        self.builder.refresh_reference_data().await;
    }

    /// Checkpointed resume offset for `identity`, reset to zero when the
    /// file is now shorter than the remembered position (rotation)
    pub fn resume_offset(&self, identity: &str, file_len: u64) -> u64 {
        match self.tracker.position(identity) {
            Some(pos) if pos <= file_len => pos,
            Some(pos) => {
                warn!(
                    "File {} shrank below checkpoint ({} < {}), restarting from zero",
                    identity, file_len, pos
                );
                0
            }
            None => 0,
        }
    }

    /// Promote one raw entry, counting it against `stats`.
    ///
    /// Rejections never fail the file; they are logged at debug level and
    /// counted implicitly as processed-but-not-valid.
    pub fn build_entry(
        &self,
        entry: &RawEntry,
        run_date: NaiveDate,
        stats: &mut FileStats,
    ) -> Option<CanonicalRecord> {
        stats.processed += 1;
        match self.builder.build_for_day(entry, run_date) {
            Ok(record) => {
                stats.valid += 1;
                Some(record)
            }
            Err(rejection) => {
                debug!("Entry rejected: {}", rejection);
                None
            }
        }
    }

    /// Flush a batch transactionally, then advance the checkpoint.
    ///
    /// The checkpoint is written only after the transaction commits, so a
    /// crash between the two replays the batch; the history natural key
    /// makes the replay a no-op. Transient database failures are retried a
    /// bounded number of times before the file is abandoned for this run.
    pub async fn flush(
        &self,
        identity: &str,
        batch: &mut Vec<CanonicalRecord>,
        checkpoint: u64,
        stats: &mut FileStats,
    ) -> Result<()> {
        if batch.is_empty() {
            self.tracker.save(identity, checkpoint);
            return Ok(());
        }

        let mut attempt = 0u32;
        let outcome = loop {
            attempt += 1;
            match self.writer.write_batch(batch).await {
                Ok(outcome) => break outcome,
                Err(e) if attempt < DB_MAX_RETRIES => {
                    warn!(
                        "Batch write for {} failed (attempt {}/{}): {}",
                        identity, attempt, DB_MAX_RETRIES, e
                    );
                    tokio::time::sleep(Duration::from_secs(DB_RETRY_DELAY_SECS)).await;
                }
                Err(e) => return Err(e),
            }
        };

        stats.inserted += outcome.history_inserted;
        debug!(
            "Flushed {} records for {} ({} new history rows), checkpoint {}",
            batch.len(),
            identity,
            outcome.history_inserted,
            checkpoint
        );
        batch.clear();
        self.tracker.save(identity, checkpoint);
        Ok(())
    }

    /// Process one detail file end to end, resuming from its checkpoint.
    ///
    /// Used by backfill, where the file is read to end-of-file and the
    /// trailing partial block (a file truncated mid-write) is consumed.
    pub async fn process_file(&self, path: &Path, run_date: NaiveDate) -> Result<FileStats> {
        let started = Instant::now();
        let identity = path.display().to_string();
        let mut stats = FileStats::default();

        let mut file = File::open(path)
            .await
            .map_err(|e| Error::io(format!("cannot open {identity}"), e))?;
        let file_len = file
            .metadata()
            .await
            .map_err(|e| Error::io(format!("cannot stat {identity}"), e))?
            .len();

        let start = self.resume_offset(&identity, file_len);
        if start > 0 {
            debug!("Resuming {} from byte {}", identity, start);
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(|e| Error::io(format!("cannot seek {identity}"), e))?;
        }

        let mut scanner = EntryScanner::new(start);
        let mut batch: Vec<CanonicalRecord> = Vec::with_capacity(self.batch_size);
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        let mut checkpoint = start;

        loop {
            let read = file
                .read(&mut chunk)
                .await
                .map_err(|e| Error::io(format!("read failed on {identity}"), e))?;
            if read == 0 {
                break;
            }
            scanner.push(&chunk[..read]);

            while let Some((entry, offset)) = scanner.next_entry() {
                if let Some(record) = self.build_entry(&entry, run_date, &mut stats) {
                    batch.push(record);
                }
                checkpoint = offset;
                if batch.len() >= self.batch_size {
                    self.flush(&identity, &mut batch, checkpoint, &mut stats)
                        .await?;
                }
            }
        }

        // A file that ends mid-block still yields its final record
        if let Some(entry) = scanner.finish() {
            if let Some(record) = self.build_entry(&entry, run_date, &mut stats) {
                batch.push(record);
            }
        }
        checkpoint = scanner.offset();
        self.flush(&identity, &mut batch, checkpoint, &mut stats)
            .await?;

        stats.runtime_seconds = started.elapsed().as_secs();
        Ok(stats)
    }
}

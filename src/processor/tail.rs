//! Continuous tail ingestion.
//!
//! One watcher task per accounting source polls the current day's detail
//! file, reads whatever bytes the RADIUS server appended since the last
//! poll, and pushes them through the shared pipeline. A partial trailing
//! block stays buffered in the scanner across polls, so a record split by
//! a poll boundary is never emitted twice or truncated. At midnight the
//! watcher drains the old day's file and moves to the new one.

use crate::app::models::{CanonicalRecord, FileStats};
use crate::app::services::record_parser::EntryScanner;
use crate::config::IngestConfig;
use crate::constants::SOURCE_WATCHER;
use crate::db::{pool, schema};
use crate::processor::{discovery, heartbeat, FilePipeline};
use crate::Result;
use chrono::{FixedOffset, NaiveDate, Utc};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Continuous watcher over every source under the accounting root
pub struct TailWatcher {
    config: IngestConfig,
}

impl TailWatcher {
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    /// Run until cancelled. Each source gets its own task; a source that
    /// errors logs and keeps polling rather than taking the others down.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.config.validate()?;

        let db = pool::connect(&self.config.database_url).await?;
        schema::init_schema(&db).await?;
        let pipeline = FilePipeline::from_config(&self.config, &db, SOURCE_WATCHER).await?;

        let beat_token = cancel.child_token();
        let beat_handle = tokio::spawn(heartbeat::run(db.clone(), beat_token.clone()));

        let sources = discovery::list_sources(&self.config.accounting_dir).await?;
        if sources.is_empty() {
            warn!(
                "No source directories under {}",
                self.config.accounting_dir.display()
            );
        }
        info!("Watching {} accounting sources", sources.len());

        let offset = self.config.local_offset()?;
        let mut handles = Vec::with_capacity(sources.len());
        for source_dir in sources {
            let watcher = SourceWatcher {
                source_dir,
                pipeline: pipeline.clone(),
                detail_prefix: self.config.detail_prefix.clone(),
                poll_interval: Duration::from_secs(self.config.poll_interval_secs),
                offset,
            };
            handles.push(tokio::spawn(watcher.run(cancel.clone())));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Source watcher task panicked: {}", e);
            }
        }

        beat_token.cancel();
        let _ = beat_handle.await;
        info!("Tail ingestion stopped");
        Ok(())
    }
}

/// Poll-loop state for one source directory
struct SourceWatcher {
    source_dir: PathBuf,
    pipeline: FilePipeline,
    detail_prefix: String,
    poll_interval: Duration,
    offset: FixedOffset,
}

/// Scanner plus pending batch for the file currently being tailed
struct OpenFile {
    identity: String,
    path: PathBuf,
    day: NaiveDate,
    scanner: EntryScanner,
    batch: Vec<CanonicalRecord>,
    stats: FileStats,
}

impl SourceWatcher {
    async fn run(self, cancel: CancellationToken) {
        let source = self
            .source_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_dir.display().to_string());
        info!("Watching source {}", source);

        let mut current: Option<OpenFile> = None;
        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.pipeline.refresh_reference_data().await;
            if let Err(e) = self.poll(&mut current).await {
                warn!("Poll failed for source {}: {}", source, e);
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        // Unflushed records are lost only if the final flush fails; the
        // checkpoint then replays them on the next start, where the history
        // key deduplicates.
        if let Some(mut open) = current {
            if let Err(e) = self.flush_open(&mut open).await {
                warn!("Final flush failed for {}: {}", open.identity, e);
            }
        }
        info!("Stopped watching source {}", source);
    }

    async fn poll(&self, current: &mut Option<OpenFile>) -> Result<()> {
        let today = Utc::now().with_timezone(&self.offset).date_naive();
        let path = discovery::day_detail_file(&self.source_dir, &self.detail_prefix, today);

        // Day rollover: drain what remains of yesterday's file first
        if current.as_ref().is_some_and(|open| open.day != today) {
            if let Some(mut open) = current.take() {
                self.drain_finished_day(&mut open).await?;
                info!(
                    "Rolled over from {}: {} entries, {} inserted",
                    open.identity, open.stats.processed, open.stats.inserted
                );
            }
        }

        let file_len = match tokio::fs::metadata(&path).await {
            Ok(md) => md.len(),
            Err(_) => {
                debug!("No detail file yet at {}", path.display());
                return Ok(());
            }
        };

        if current.is_none() {
            let identity = path.display().to_string();
            let start = self.start_offset(&identity, file_len);
            info!("Tailing {} from byte {}", identity, start);
            *current = Some(OpenFile {
                identity,
                path: path.clone(),
                day: today,
                scanner: EntryScanner::new(start),
                batch: Vec::new(),
                stats: FileStats::default(),
            });
        }
        let Some(open) = current.as_mut() else {
            return Ok(());
        };

        // Bytes already pulled from the file but not yet framed
        let mut read_pos = open.scanner.offset() + open.scanner.pending_bytes() as u64;

        if file_len < read_pos {
            warn!(
                "{} shrank ({} < {}), assuming rotation and restarting",
                open.identity, file_len, read_pos
            );
            // Records framed from the rotated-away content cannot be
            // re-read; flush them now, and on failure keep them batched
            // so they land with the new file's first flush.
            if !open.batch.is_empty() {
                if let Err(e) = self.flush_open(open).await {
                    warn!(
                        "Flush of pre-rotation records failed for {}: {}",
                        open.identity, e
                    );
                }
            }
            open.scanner = EntryScanner::new(0);
            read_pos = 0;
        }
        if file_len == read_pos {
            return Ok(());
        }

        self.consume_new_bytes(open, read_pos, file_len).await?;
        // On flush failure the batch is retained and retried next poll
        self.flush_open(open).await
    }

    /// Watcher starting position: checkpoint when valid, else end-of-file
    /// so a fresh watcher does not replay history the backfill owns
    fn start_offset(&self, identity: &str, file_len: u64) -> u64 {
        match self.pipeline.tracker().position(identity) {
            Some(pos) if pos <= file_len => pos,
            Some(pos) => {
                warn!(
                    "{} shrank below checkpoint ({} < {}), restarting from zero",
                    identity, file_len, pos
                );
                0
            }
            None => file_len,
        }
    }

    async fn consume_new_bytes(
        &self,
        open: &mut OpenFile,
        read_pos: u64,
        file_len: u64,
    ) -> Result<()> {
        let mut file = File::open(&open.path)
            .await
            .map_err(|e| crate::Error::io(format!("cannot open {}", open.identity), e))?;
        file.seek(SeekFrom::Start(read_pos))
            .await
            .map_err(|e| crate::Error::io(format!("cannot seek {}", open.identity), e))?;

        let mut remaining = (file_len - read_pos) as usize;
        let mut chunk = vec![0u8; READ_CHUNK_BYTES.min(remaining)];
        while remaining > 0 {
            let want = chunk.len().min(remaining);
            let read = file
                .read(&mut chunk[..want])
                .await
                .map_err(|e| crate::Error::io(format!("read failed on {}", open.identity), e))?;
            if read == 0 {
                break;
            }
            remaining -= read;
            open.scanner.push(&chunk[..read]);

            while let Some((entry, _)) = open.scanner.next_entry() {
                if let Some(record) =
                    self.pipeline
                        .build_entry(&entry, open.day, &mut open.stats)
                {
                    open.batch.push(record);
                }
            }
        }
        Ok(())
    }

    /// A file whose day has passed gets no more appends; its trailing
    /// partial block is a complete record missing only the blank line.
    async fn drain_finished_day(&self, open: &mut OpenFile) -> Result<()> {
        if let Some(entry) = open.scanner.finish() {
            if let Some(record) = self
                .pipeline
                .build_entry(&entry, open.day, &mut open.stats)
            {
                open.batch.push(record);
            }
        }
        self.flush_open(open).await
    }

    async fn flush_open(&self, open: &mut OpenFile) -> Result<()> {
        let checkpoint = open.scanner.offset();
        let mut batch = std::mem::take(&mut open.batch);
        let result = self
            .pipeline
            .flush(&open.identity, &mut batch, checkpoint, &mut open.stats)
            .await;
        open.batch = batch;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::ConflictPolicy;
    use crate::app::services::device_registry::DeviceRegistry;
    use crate::app::services::location_decoder::LocationDecoder;
    use crate::app::services::progress_tracker::ProgressTracker;
    use crate::app::services::record_builder::RecordBuilder;
    use crate::app::services::tower_index::{TowerCache, TowerIndex};
    use crate::db::persistence::BatchWriter;
    use crate::db::pool::connect_memory;
    use crate::db::schema::init_schema;
    use sqlx::{Pool, Sqlite};
    use std::sync::Arc;
    use tempfile::TempDir;

    const ENTRY: &str = concat!(
        "Sat Aug 30 10:15:00 2025\n",
        "\tCalling-Station-Id = \"5926771234\"\n",
        "\t3GPP-User-Location-Info = 0x823708401b59370840000fc70e\n",
        "\tEvent-Timestamp = \"Aug 30 2025 14:15:00 UTC\"\n",
        "\n",
    );

    async fn watcher(dir: &TempDir) -> (SourceWatcher, Pool<Sqlite>) {
        let pool = connect_memory().await.unwrap();
        init_schema(&pool).await.unwrap();

        let devices = Arc::new(
            DeviceRegistry::load(pool.clone(), Duration::from_secs(3600))
                .await
                .unwrap(),
        );
        let towers = Arc::new(TowerCache::from_index(
            TowerIndex::default(),
            Duration::from_secs(3600),
        ));
        let offset = FixedOffset::east_opt(-4 * 3600).unwrap();
        // Tail mode accepts events regardless of day
        let builder = RecordBuilder::new(LocationDecoder::new(towers), devices, offset, false);
        let writer = Arc::new(BatchWriter::new(
            pool.clone(),
            ConflictPolicy::PreferNewerEvent,
            SOURCE_WATCHER,
        ));
        let tracker = Arc::new(ProgressTracker::new(dir.path().join("progress.txt")));
        let pipeline = FilePipeline::new(builder, writer, tracker, 100);

        let source_dir = dir.path().join("10.0.0.1");
        std::fs::create_dir(&source_dir).unwrap();

        (
            SourceWatcher {
                source_dir,
                pipeline,
                detail_prefix: "detail-".to_string(),
                poll_interval: Duration::from_millis(10),
                offset,
            },
            pool,
        )
    }

    fn today_filename(offset: FixedOffset) -> String {
        discovery::detail_filename("detail-", Utc::now().with_timezone(&offset).date_naive())
    }

    async fn history_count(pool: &Pool<Sqlite>) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM location_history")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn fresh_watcher_starts_at_eof_then_reads_appends() {
        let dir = TempDir::new().unwrap();
        let (watcher, pool) = watcher(&dir).await;

        let path = watcher.source_dir.join(today_filename(watcher.offset));
        std::fs::write(&path, ENTRY).unwrap();

        let mut current = None;
        watcher.poll(&mut current).await.unwrap();
        // Pre-existing content is skipped
        assert_eq!(history_count(&pool).await, 0);

        let appended = ENTRY.replace("5926771234", "5926775678");
        std::fs::write(&path, format!("{ENTRY}{appended}")).unwrap();
        watcher.poll(&mut current).await.unwrap();
        assert_eq!(history_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn partial_block_survives_poll_boundary() {
        let dir = TempDir::new().unwrap();
        let (watcher, pool) = watcher(&dir).await;

        let path = watcher.source_dir.join(today_filename(watcher.offset));
        std::fs::write(&path, "").unwrap();

        let mut current = None;
        watcher.poll(&mut current).await.unwrap();

        // Half an entry lands, then the rest
        let split = ENTRY.len() / 2;
        std::fs::write(&path, &ENTRY[..split]).unwrap();
        watcher.poll(&mut current).await.unwrap();
        assert_eq!(history_count(&pool).await, 0);

        std::fs::write(&path, ENTRY).unwrap();
        watcher.poll(&mut current).await.unwrap();
        assert_eq!(history_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn rotation_resets_to_start_of_new_file() {
        let dir = TempDir::new().unwrap();
        let (watcher, pool) = watcher(&dir).await;

        let path = watcher.source_dir.join(today_filename(watcher.offset));
        std::fs::write(&path, "").unwrap();

        let mut current = None;
        watcher.poll(&mut current).await.unwrap();

        std::fs::write(&path, format!("{ENTRY}{ENTRY}")).unwrap();
        watcher.poll(&mut current).await.unwrap();

        // Truncated and rewritten file: read from zero again
        std::fs::write(&path, ENTRY.replace("5926771234", "5926779999")).unwrap();
        watcher.poll(&mut current).await.unwrap();

        assert_eq!(history_count(&pool).await, 2);
    }

    #[tokio::test]
    async fn rotation_flushes_pending_records_before_reset() {
        use chrono::TimeZone;

        let dir = TempDir::new().unwrap();
        let (watcher, pool) = watcher(&dir).await;

        let path = watcher.source_dir.join(today_filename(watcher.offset));
        std::fs::write(&path, ENTRY).unwrap();

        // A record framed from content that has since been rotated away,
        // still batched because its flush has not succeeded yet
        let pending = CanonicalRecord {
            msisdn: "5926770000".to_string(),
            imsi: None,
            station_id: 4038,
            sector_id: 14,
            tower_name: None,
            lat: None,
            lon: None,
            event_time: watcher
                .offset
                .with_ymd_and_hms(2025, 8, 30, 10, 5, 0)
                .unwrap(),
            device_model: "Unknown Device".to_string(),
        };
        let mut current = Some(OpenFile {
            identity: path.display().to_string(),
            path: path.clone(),
            day: Utc::now().with_timezone(&watcher.offset).date_naive(),
            scanner: EntryScanner::new(10_000),
            batch: vec![pending],
            stats: FileStats::default(),
        });

        watcher.poll(&mut current).await.unwrap();

        // Both the pre-rotation record and the rewritten file's entry land
        assert_eq!(history_count(&pool).await, 2);
    }

    #[tokio::test]
    async fn resumes_from_saved_checkpoint_on_restart() {
        let dir = TempDir::new().unwrap();
        let (watcher, pool) = watcher(&dir).await;

        let path = watcher.source_dir.join(today_filename(watcher.offset));
        std::fs::write(&path, format!("{ENTRY}{ENTRY}")).unwrap();
        watcher
            .pipeline
            .tracker()
            .save(&path.display().to_string(), ENTRY.len() as u64);

        let mut current = None;
        watcher.poll(&mut current).await.unwrap();
        // Only the second entry is new relative to the checkpoint
        assert_eq!(history_count(&pool).await, 1);
    }
}

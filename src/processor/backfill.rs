//! One-shot backfill over a day's detail files.
//!
//! Discovers every source's detail files for the run day and processes
//! them through a bounded worker pool. Each file is independently
//! resumable and independently fallible: a failed file is logged, left in
//! place with its checkpoint intact, and never aborts the rest of the run.
//! Files are deleted only after their audit row has committed.

use crate::app::models::{BackfillReport, FileStats};
use crate::config::IngestConfig;
use crate::constants::SOURCE_BACKFILL;
use crate::db::{audit, pool, schema};
use crate::processor::{discovery, heartbeat, FilePipeline};
use crate::{Error, Result};
use chrono::Utc;
use colored::*;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Single-instance lock file, removed when the guard drops
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io(format!("cannot create {}", parent.display()), e))?;
        }

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(mut file) => {
                use std::io::Write;
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::already_running(path.display().to_string()))
            }
            Err(e) => Err(Error::io(
                format!("cannot create lock file {}", path.display()),
                e,
            )),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Could not remove lock file {}: {}", self.path.display(), e);
        }
    }
}

/// Backfill orchestrator for one run day
pub struct BackfillProcessor {
    config: IngestConfig,
}

impl BackfillProcessor {
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    /// Run the backfill to completion or cancellation.
    ///
    /// Holds the single-instance lock for the duration; a second concurrent
    /// run fails fast with [`Error::AlreadyRunning`].
    pub async fn run(&self, cancel: CancellationToken) -> Result<BackfillReport> {
        self.config.validate()?;
        let _lock = LockFile::acquire(&self.config.lock_file)?;
        self.run_locked(cancel).await
    }

    async fn run_locked(&self, cancel: CancellationToken) -> Result<BackfillReport> {
        let started = Instant::now();
        let offset = self.config.local_offset()?;
        let run_date = Utc::now().with_timezone(&offset).date_naive();

        println!("{}", "Starting RADIUS backfill".bright_green().bold());
        println!("  {} {}", "Run day:".bright_cyan(), run_date);
        println!(
            "  {} {}",
            "Accounting root:".bright_cyan(),
            self.config.accounting_dir.display()
        );

        let db = pool::connect(&self.config.database_url).await?;
        schema::init_schema(&db).await?;

        let pipeline = FilePipeline::from_config(&self.config, &db, SOURCE_BACKFILL).await?;

        // Liveness reporting for the duration of the run
        let beat_token = cancel.child_token();
        let beat_handle = tokio::spawn(heartbeat::run(db.clone(), beat_token.clone()));

        let sources = discovery::discover_day_files(
            &self.config.accounting_dir,
            &self.config.detail_prefix,
            run_date,
        )
        .await?;

        let files: Vec<(String, PathBuf)> = sources
            .into_iter()
            .flat_map(|s| {
                let source = s.source;
                s.files
                    .into_iter()
                    .map(move |f| (source.clone(), f))
                    .collect::<Vec<_>>()
            })
            .collect();

        println!(
            "  {} {} detail files",
            "Found".bright_green(),
            files.len().to_string().bright_white().bold()
        );

        if files.is_empty() {
            beat_token.cancel();
            let _ = beat_handle.await;
            return Ok(BackfillReport {
                runtime_ms: started.elapsed().as_millis(),
                ..Default::default()
            });
        }

        let report = self
            .process_files(&db, &pipeline, files, run_date, &cancel)
            .await;

        beat_token.cancel();
        let _ = beat_handle.await;

        if cancel.is_cancelled() {
            warn!("Backfill interrupted; checkpoints retained for resume");
        } else if report.files_failed == 0 && self.config.delete_after_audit {
            // Every file audited and removed, so the checkpoints are spent
            pipeline.tracker().clear();
        }

        if let Err(e) = audit::purge_older_than(&db, self.config.audit_retention_days).await {
            warn!("Audit maintenance failed: {}", e);
        }

        let mut report = report;
        report.runtime_ms = started.elapsed().as_millis();
        self.print_summary(&report);
        Ok(report)
    }

    async fn process_files(
        &self,
        db: &Pool<Sqlite>,
        pipeline: &FilePipeline,
        files: Vec<(String, PathBuf)>,
        run_date: chrono::NaiveDate,
        cancel: &CancellationToken,
    ) -> BackfillReport {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message("Processing detail files");

        let workers = self.config.effective_workers();
        let delete_after_audit = self.config.delete_after_audit;

        let (processed, failed, total_processed, total_inserted, failed_files) =
            stream::iter(files)
                .map(|(source, path)| {
                    let pipeline = pipeline.clone();
                    let db = db.clone();
                    let pb = pb.clone();
                    let cancel = cancel.clone();
                    async move {
                        if cancel.is_cancelled() {
                            return Ok(None);
                        }
                        if let Some(name) = path.file_name() {
                            pb.set_message(format!("{}/{}", source, name.to_string_lossy()));
                        }

                        let result = process_one_file(
                            &pipeline,
                            &db,
                            &path,
                            run_date,
                            delete_after_audit,
                        )
                        .await;
                        pb.inc(1);

                        match result {
                            Ok(stats) => {
                                info!(
                                    "Finished {}: {} entries, {} inserted",
                                    path.display(),
                                    stats.processed,
                                    stats.inserted
                                );
                                Ok(Some(stats))
                            }
                            Err(e) => {
                                error!("Failed {}: {}", path.display(), e);
                                Err(path)
                            }
                        }
                    }
                })
                .buffer_unordered(workers)
                .fold(
                    (0usize, 0usize, 0u64, 0u64, Vec::new()),
                    |(done, failed, entries, inserted, mut failures), result| async move {
                        match result {
                            Ok(Some(stats)) => (
                                done + 1,
                                failed,
                                entries + stats.processed,
                                inserted + stats.inserted,
                                failures,
                            ),
                            Ok(None) => (done, failed, entries, inserted, failures),
                            Err(path) => {
                                failures.push(path);
                                (done, failed + 1, entries, inserted, failures)
                            }
                        }
                    },
                )
                .await;

        pb.finish_with_message("Backfill complete");

        BackfillReport {
            files_processed: processed,
            files_failed: failed,
            total_processed,
            total_inserted,
            runtime_ms: 0,
            failed_files,
        }
    }

    fn print_summary(&self, report: &BackfillReport) {
        println!("\n{}", "Backfill Summary".bright_green().bold());
        println!(
            "  {} {}ms",
            "Time elapsed:".bright_cyan(),
            report.runtime_ms.to_string().bright_white()
        );
        println!(
            "  {} {}",
            "Files processed:".bright_cyan(),
            report.files_processed.to_string().bright_white()
        );
        if report.files_failed > 0 {
            println!(
                "  {} {}",
                "Files failed:".bright_red(),
                report.files_failed.to_string().bright_red().bold()
            );
            for path in &report.failed_files {
                println!("    {}", path.display().to_string().bright_red());
            }
        }
        println!(
            "  {} {}",
            "Entries parsed:".bright_cyan(),
            report.total_processed.to_string().bright_white()
        );
        println!(
            "  {} {}",
            "History rows inserted:".bright_cyan(),
            report.total_inserted.to_string().bright_white().bold()
        );
    }
}

/// Process, audit, and optionally delete one detail file.
///
/// Deletion strictly follows the audit commit; a file whose audit write
/// fails stays on disk with its checkpoint for the next run.
async fn process_one_file(
    pipeline: &FilePipeline,
    db: &Pool<Sqlite>,
    path: &Path,
    run_date: chrono::NaiveDate,
    delete_after_audit: bool,
) -> Result<FileStats> {
    let stats = pipeline.process_file(path, run_date).await?;
    let identity = path.display().to_string();
    audit::record_outcome(db, &identity, &stats).await?;

    if delete_after_audit {
        if let Err(e) = fs::remove_file(path).await {
            warn!("Audited but could not delete {}: {}", identity, e);
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_file_is_exclusive_and_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/backfill.lock");

        let lock = LockFile::acquire(&path).unwrap();
        assert!(path.exists());
        assert!(matches!(
            LockFile::acquire(&path),
            Err(Error::AlreadyRunning { .. })
        ));

        drop(lock);
        assert!(!path.exists());
        let _again = LockFile::acquire(&path).unwrap();
    }
}

//! Accounting directory discovery.
//!
//! The accounting root holds one subdirectory per upstream source (the
//! RADIUS server writes one tree per NAS address), and each source
//! directory holds date-stamped detail files. Discovery enumerates the
//! sources and picks out the files for a given run day; nothing here
//! reads file contents.

use crate::constants::DETAIL_DATE_FORMAT;
use crate::{Error, Result};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// One source directory and its detail files for the run day, sorted by name
#[derive(Debug, Clone)]
pub struct SourceFiles {
    pub source: String,
    pub files: Vec<PathBuf>,
}

/// Enumerate the per-source subdirectories under the accounting root
pub async fn list_sources(accounting_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dir = fs::read_dir(accounting_dir).await.map_err(|e| {
        Error::discovery(
            accounting_dir.display().to_string(),
            format!("cannot read accounting root: {e}"),
        )
    })?;

    let mut sources = Vec::new();
    while let Some(entry) = dir.next_entry().await.map_err(|e| {
        Error::discovery(
            accounting_dir.display().to_string(),
            format!("enumeration failed: {e}"),
        )
    })? {
        let path = entry.path();
        match entry.file_type().await {
            Ok(ft) if ft.is_dir() => sources.push(path),
            Ok(_) => {}
            Err(e) => warn!("Skipping unreadable entry {}: {}", path.display(), e),
        }
    }
    sources.sort();
    Ok(sources)
}

/// The detail filename a source writes on `date`
pub fn detail_filename(prefix: &str, date: NaiveDate) -> String {
    format!("{}{}", prefix, date.format(DETAIL_DATE_FORMAT))
}

/// Today's detail file within one source directory
pub fn day_detail_file(source_dir: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    source_dir.join(detail_filename(prefix, date))
}

/// Find every detail file for `date`, grouped by source.
///
/// Matches files whose name starts with the day's detail filename, which
/// also picks up rotated variants like `detail-20250830.1`. Sources with
/// no matching files are omitted.
pub async fn discover_day_files(
    accounting_dir: &Path,
    prefix: &str,
    date: NaiveDate,
) -> Result<Vec<SourceFiles>> {
    let wanted = detail_filename(prefix, date);
    let mut result = Vec::new();

    for source_dir in list_sources(accounting_dir).await? {
        let source = source_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source_dir.display().to_string());

        let mut dir = match fs::read_dir(&source_dir).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Skipping unreadable source {}: {}", source, e);
                continue;
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| {
            Error::discovery(
                source_dir.display().to_string(),
                format!("enumeration failed: {e}"),
            )
        })? {
            let path = entry.path();
            let is_file = entry.file_type().await.is_ok_and(|ft| ft.is_file());
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&wanted));
            if is_file && matches {
                files.push(path);
            }
        }

        if files.is_empty() {
            debug!("Source {} has no detail files for {}", source, date);
            continue;
        }
        files.sort();
        result.push(SourceFiles { source, files });
    }

    Ok(result)
}

//! Crash-safe per-file progress checkpoints
//!
//! The checkpoint store is a shared append-only text file, one line per
//! save: `filename|position`. On load, the last occurrence per filename
//! wins, so replaying the file reconstructs the most recent position even
//! after a crash mid-run. Saves are serialized through a mutex because
//! workers on different files share the one store; a failed save degrades
//! resumability for that file and nothing else.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, warn};

/// Append-only checkpoint store shared by all workers
#[derive(Debug)]
pub struct ProgressTracker {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ProgressTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the latest known position for a file.
    ///
    /// Failures are logged and swallowed: losing a checkpoint means at
    /// worst reprocessing one file's tail, and the history store's natural
    /// key makes that replay idempotent.
    pub fn save(&self, file_identity: &str, position: u64) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            writeln!(file, "{}|{}", file_identity, position)?;
            file.flush()
        })();

        match result {
            Ok(()) => debug!("Checkpoint saved: {} @ {}", file_identity, position),
            Err(e) => error!("Failed to save checkpoint for {}: {}", file_identity, e),
        }
    }

    /// Replay all saved entries; the most recent position per file wins
    pub fn load(&self) -> HashMap<String, u64> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                error!("Failed to load checkpoints from {:?}: {}", self.path, e);
                return HashMap::new();
            }
        };

        let mut positions = HashMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.rsplit_once('|') {
                Some((file, position)) => match position.parse::<u64>() {
                    Ok(position) => {
                        positions.insert(file.to_string(), position);
                    }
                    Err(_) => warn!("Ignoring malformed checkpoint line: {}", line),
                },
                None => warn!("Ignoring malformed checkpoint line: {}", line),
            }
        }
        positions
    }

    /// Position recorded for one file, if any
    pub fn position(&self, file_identity: &str) -> Option<u64> {
        self.load().get(file_identity).copied()
    }

    /// Remove every checkpoint; used only after a fully successful run
    pub fn clear(&self) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Checkpoints cleared"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!("Failed to clear checkpoints: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn tracker_in(dir: &TempDir) -> ProgressTracker {
        ProgressTracker::new(dir.path().join("progress.txt"))
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);

        tracker.save("detail-20250830", 4096);
        tracker.save("detail-20250830.1", 128);

        let positions = tracker.load();
        assert_eq!(positions.get("detail-20250830"), Some(&4096));
        assert_eq!(positions.get("detail-20250830.1"), Some(&128));
    }

    #[test]
    fn last_write_wins_on_replay() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);

        tracker.save("detail-20250830", 100);
        tracker.save("detail-20250830", 900);
        tracker.save("detail-20250830", 2500);

        assert_eq!(tracker.position("detail-20250830"), Some(2500));
    }

    #[test]
    fn missing_store_loads_empty() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);
        assert!(tracker.load().is_empty());
        assert_eq!(tracker.position("detail-20250830"), None);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.txt");
        fs::write(&path, "detail-20250830|100\ngarbage\nother|notanumber\n").unwrap();

        let tracker = ProgressTracker::new(path);
        let positions = tracker.load();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions.get("detail-20250830"), Some(&100));
    }

    #[test]
    fn clear_removes_all_checkpoints() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker_in(&dir);

        tracker.save("detail-20250830", 100);
        tracker.clear();
        assert!(tracker.load().is_empty());

        // Clearing an already-empty store is harmless
        tracker.clear();
    }

    #[test]
    fn concurrent_saves_never_interleave() {
        let dir = TempDir::new().unwrap();
        let tracker = Arc::new(tracker_in(&dir));

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for position in 0..50u64 {
                        tracker.save(&format!("file-{}", worker), position);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let positions = tracker.load();
        assert_eq!(positions.len(), 8);
        for worker in 0..8 {
            assert_eq!(positions.get(&format!("file-{}", worker)), Some(&49));
        }

        // Every line in the store parses cleanly: no torn writes
        let content = fs::read_to_string(tracker.path()).unwrap();
        for line in content.lines() {
            let (_, position) = line.rsplit_once('|').unwrap();
            position.parse::<u64>().unwrap();
        }
    }
}

//! Tower reference-data lookup service
//!
//! Loads the radio network's engineering parameter export (CSV) into an
//! in-memory index keyed by `(station_id, sector_id)` and exposes O(1)
//! lookups. The index is owned by an explicit cache with a TTL and a
//! refresh operation; nothing here is ambient module state.

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Reference data for one antenna sector
#[derive(Debug, Clone, PartialEq)]
pub struct Tower {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

/// One row of the reference CSV
#[derive(Debug, Deserialize)]
struct TowerRow {
    station_id: u32,
    sector_id: u8,
    tower_name: String,
    latitude: f64,
    longitude: f64,
}

/// In-memory tower index providing O(1) lookups by `(station_id, sector_id)`
#[derive(Debug, Clone, Default)]
pub struct TowerIndex {
    towers: HashMap<(u32, u8), Tower>,
}

impl TowerIndex {
    /// Load the index from a reference CSV.
    ///
    /// Expected headers: `station_id, sector_id, tower_name, latitude,
    /// longitude`. Rows that fail to deserialize are skipped with a
    /// warning rather than failing the load.
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| {
            Error::reference_data(
                path.display().to_string(),
                "failed to open reference data",
                Some(e),
            )
        })?;

        let mut index = Self::default();
        let mut skipped = 0usize;

        for row in reader.deserialize::<TowerRow>() {
            match row {
                Ok(row) => {
                    index.insert(
                        row.station_id,
                        row.sector_id,
                        Tower {
                            name: row.tower_name,
                            lat: row.latitude,
                            lon: row.longitude,
                        },
                    );
                }
                Err(e) => {
                    skipped += 1;
                    warn!("Skipping malformed tower row: {}", e);
                }
            }
        }

        info!(
            "Loaded {} tower sectors from {} ({} rows skipped)",
            index.len(),
            path.display(),
            skipped
        );
        Ok(index)
    }

    pub fn insert(&mut self, station_id: u32, sector_id: u8, tower: Tower) {
        self.towers.insert((station_id, sector_id), tower);
    }

    pub fn get(&self, station_id: u32, sector_id: u8) -> Option<&Tower> {
        self.towers.get(&(station_id, sector_id))
    }

    pub fn len(&self) -> usize {
        self.towers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.towers.is_empty()
    }
}

struct CacheState {
    index: TowerIndex,
    loaded_at: Instant,
}

/// Explicitly-owned tower cache with a TTL and a refresh operation.
///
/// Lookups never block on reloads; staleness is only acted on when a
/// caller invokes [`TowerCache::refresh_if_stale`], typically at run or
/// poll-iteration boundaries.
pub struct TowerCache {
    source: Option<PathBuf>,
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl std::fmt::Debug for TowerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TowerCache")
            .field("source", &self.source)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl TowerCache {
    /// Build a cache backed by a reference CSV
    pub fn load(path: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        let path = path.into();
        let index = TowerIndex::load(&path)?;
        Ok(Self {
            source: Some(path),
            ttl,
            state: RwLock::new(CacheState {
                index,
                loaded_at: Instant::now(),
            }),
        })
    }

    /// Build a cache from an already-populated index (no backing file)
    pub fn from_index(index: TowerIndex, ttl: Duration) -> Self {
        Self {
            source: None,
            ttl,
            state: RwLock::new(CacheState {
                index,
                loaded_at: Instant::now(),
            }),
        }
    }

    /// Look up a sector; misses are a normal outcome, not an error
    pub fn lookup(&self, station_id: u32, sector_id: u8) -> Option<Tower> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.index.get(station_id, sector_id).cloned()
    }

    /// Whether the cached index has outlived its TTL
    pub fn is_stale(&self) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.loaded_at.elapsed() > self.ttl
    }

    /// Reload the index from its backing file.
    ///
    /// A cache built with [`TowerCache::from_index`] has nothing to reload
    /// and refreshes to its current contents.
    pub fn refresh(&self) -> Result<usize> {
        let Some(path) = &self.source else {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.loaded_at = Instant::now();
            return Ok(state.index.len());
        };

        let index = TowerIndex::load(path)?;
        let count = index.len();
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.index = index;
        state.loaded_at = Instant::now();
        debug!("Tower cache refreshed: {} sectors", count);
        Ok(count)
    }

    /// Refresh only when the TTL has expired; reload failures keep the
    /// previous index and are reported to the caller
    pub fn refresh_if_stale(&self) -> Result<bool> {
        if self.is_stale() {
            self.refresh()?;
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_reference_csv(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("towers.csv");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_reference_rows() {
        let dir = TempDir::new().unwrap();
        let path = write_reference_csv(
            &dir,
            "station_id,sector_id,tower_name,latitude,longitude\n\
             4038,14,GEORGETOWN_EAST,6.8013,-58.1553\n\
             4650,11,LINDEN_NORTH,5.9930,-58.3034\n",
        );

        let index = TowerIndex::load(&path).unwrap();
        assert_eq!(index.len(), 2);

        let tower = index.get(4038, 14).unwrap();
        assert_eq!(tower.name, "GEORGETOWN_EAST");
        assert_eq!(tower.lon, -58.1553);
        assert!(index.get(4038, 15).is_none());
    }

    #[test]
    fn malformed_rows_are_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_reference_csv(
            &dir,
            "station_id,sector_id,tower_name,latitude,longitude\n\
             4038,14,GEORGETOWN_EAST,6.8013,-58.1553\n\
             not-a-number,11,BROKEN,0,0\n",
        );

        let index = TowerIndex::load(&path).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = TowerIndex::load(Path::new("/nonexistent/towers.csv"));
        assert!(matches!(result, Err(Error::ReferenceData { .. })));
    }

    #[test]
    fn cache_refresh_picks_up_new_rows() {
        let dir = TempDir::new().unwrap();
        let path = write_reference_csv(
            &dir,
            "station_id,sector_id,tower_name,latitude,longitude\n\
             4038,14,GEORGETOWN_EAST,6.8013,-58.1553\n",
        );

        let cache = TowerCache::load(&path, Duration::from_secs(0)).unwrap();
        assert!(cache.lookup(4650, 11).is_none());

        fs::write(
            &path,
            "station_id,sector_id,tower_name,latitude,longitude\n\
             4038,14,GEORGETOWN_EAST,6.8013,-58.1553\n\
             4650,11,LINDEN_NORTH,5.9930,-58.3034\n",
        )
        .unwrap();

        // Zero TTL: the cache is immediately stale
        assert!(cache.is_stale());
        assert!(cache.refresh_if_stale().unwrap());
        assert!(cache.lookup(4650, 11).is_some());
    }

    #[test]
    fn index_backed_cache_refreshes_in_place() {
        let mut index = TowerIndex::default();
        index.insert(
            1,
            1,
            Tower {
                name: "T".to_string(),
                lat: 0.0,
                lon: 0.0,
            },
        );
        let cache = TowerCache::from_index(index, Duration::from_secs(3600));

        assert_eq!(cache.refresh().unwrap(), 1);
        assert!(cache.lookup(1, 1).is_some());
    }
}

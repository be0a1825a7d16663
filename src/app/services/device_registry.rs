//! Device-model lookup by type-allocation code
//!
//! Resolves an 8-character allocation-code prefix taken from the device
//! identity attribute to a display string, backed by the `device_models`
//! table and fronted by an explicitly-owned TTL cache. Unresolvable or
//! short prefixes yield a fixed "Unknown Device" string; a lookup never
//! fails record processing.

use crate::constants::{TAC_PREFIX_LEN, UNKNOWN_DEVICE};
use crate::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

struct CacheState {
    models: HashMap<String, String>,
    loaded_at: Instant,
}

/// TTL-cached device model registry
pub struct DeviceRegistry {
    pool: Pool<Sqlite>,
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl DeviceRegistry {
    /// Build a registry and populate its cache from the database
    pub async fn load(pool: Pool<Sqlite>, ttl: Duration) -> Result<Self> {
        let models = fetch_models(&pool).await?;
        info!("Loaded {} device models", models.len());
        Ok(Self {
            pool,
            ttl,
            state: RwLock::new(CacheState {
                models,
                loaded_at: Instant::now(),
            }),
        })
    }

    /// Resolve a device identity to a display string.
    ///
    /// `device_identity` is the raw IMEISV/IMEI attribute value; only its
    /// first 8 characters (the allocation code) participate in the lookup.
    pub fn lookup(&self, device_identity: &str) -> String {
        let identity = device_identity.trim();
        // Char-counted prefix: lossy-decoded input can carry multibyte
        // replacement characters, so byte slicing is not safe here.
        let tac: String = identity.chars().take(TAC_PREFIX_LEN).collect();
        if tac.chars().count() < TAC_PREFIX_LEN {
            if !identity.is_empty() {
                debug!("Device identity '{}' too short for a TAC prefix", identity);
            }
            return UNKNOWN_DEVICE.to_string();
        }

        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .models
            .get(&tac)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_DEVICE.to_string())
    }

    /// Whether the cache has outlived its TTL
    pub fn is_stale(&self) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.loaded_at.elapsed() > self.ttl
    }

    /// Reload the cache from the database
    pub async fn refresh(&self) -> Result<usize> {
        let models = fetch_models(&self.pool).await?;
        let count = models.len();
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.models = models;
        state.loaded_at = Instant::now();
        debug!("Device registry refreshed: {} models", count);
        Ok(count)
    }

    /// Refresh only when the TTL has expired
    pub async fn refresh_if_stale(&self) -> Result<bool> {
        if self.is_stale() {
            self.refresh().await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Seed or update the registry table from a CSV export.
    ///
    /// Expected headers: `tac, manufacturer, model, device_type`. Returns
    /// the number of rows imported; the cache is refreshed afterwards.
    pub async fn import_csv(&self, path: &std::path::Path) -> Result<usize> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| {
            Error::reference_data(
                path.display().to_string(),
                "failed to open device model export",
                Some(e),
            )
        })?;

        let mut imported = 0usize;
        for row in reader.deserialize::<DeviceModelRow>() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!("Skipping malformed device model row: {}", e);
                    continue;
                }
            };
            let tac: String = row.tac.chars().take(TAC_PREFIX_LEN).collect();
            sqlx::query(
                r#"
                INSERT INTO device_models (tac, manufacturer, model, device_type)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (tac) DO UPDATE SET
                    manufacturer = excluded.manufacturer,
                    model = excluded.model,
                    device_type = excluded.device_type,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(&tac)
            .bind(&row.manufacturer)
            .bind(&row.model)
            .bind(&row.device_type)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::database("device model import failed", e))?;
            imported += 1;
        }

        info!("Imported {} device models from {}", imported, path.display());
        self.refresh().await?;
        Ok(imported)
    }
}

#[derive(Debug, serde::Deserialize)]
struct DeviceModelRow {
    tac: String,
    manufacturer: String,
    model: String,
    device_type: String,
}

async fn fetch_models(pool: &Pool<Sqlite>) -> Result<HashMap<String, String>> {
    let rows: Vec<(String, String, String, String)> =
        sqlx::query_as("SELECT tac, manufacturer, model, device_type FROM device_models")
            .fetch_all(pool)
            .await
            .map_err(|e| Error::database("failed to load device models", e))?;

    Ok(rows
        .into_iter()
        .map(|(tac, manufacturer, model, device_type)| {
            (tac, format!("{} {} ({})", manufacturer, model, device_type))
        })
        .collect())
}

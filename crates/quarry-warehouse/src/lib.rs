//! # Quarry Warehouse
//!
//! DuckDB-backed durable tier for the quarry response cache.
//!
//! The in-memory cache in `quarry-core` is enough for correctness; this crate
//! lets an embedding application keep provider responses across restarts.
//! Entries carry wall-clock expiry in unix milliseconds, so a restarted
//! process never serves a response past its TTL.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quarry_warehouse::{ResponseRecord, ResponseStore, WarehouseConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = ResponseStore::open(WarehouseConfig::default())?;
//!
//!     store.save(&ResponseRecord {
//!         cache_key: "4f1c...",
//!         host: "query2.finance.yahoo.com",
//!         path: "/v8/finance/chart/AAPL",
//!         payload: "{}",
//!         stored_at_ms: 1_700_000_000_000,
//!         expires_at_ms: 1_700_000_060_000,
//!     })?;
//!
//!     let hit = store.load("4f1c...", 1_700_000_030_000)?;
//!     assert!(hit.is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `response_cache` | Provider response bodies keyed by request digest |
//! | `schema_migrations` | Applied migration versions |

pub mod duckdb;
mod error;
mod migrations;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::ToSql;

pub use crate::duckdb::{DuckDbConnectionManager, PooledConnection};
pub use crate::error::WarehouseError;

/// Configuration for the durable store.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for quarry data.
    pub quarry_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::at_home(resolve_quarry_home())
    }
}

impl WarehouseConfig {
    /// Configuration rooted at an explicit home directory.
    pub fn at_home(quarry_home: impl Into<PathBuf>) -> Self {
        let quarry_home = quarry_home.into();
        let db_path = quarry_home.join("cache").join("responses.duckdb");
        Self {
            quarry_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

/// Row written to the durable store.
#[derive(Debug, Clone, Copy)]
pub struct ResponseRecord<'a> {
    pub cache_key: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub payload: &'a str,
    pub stored_at_ms: i64,
    pub expires_at_ms: i64,
}

/// Row read back from the durable store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    pub payload: String,
    pub stored_at_ms: i64,
    pub expires_at_ms: i64,
}

impl StoredResponse {
    /// Milliseconds of validity left at `now_ms`, zero once expired.
    pub fn remaining_ms(&self, now_ms: i64) -> u64 {
        u64::try_from(self.expires_at_ms.saturating_sub(now_ms)).unwrap_or(0)
    }
}

/// Durable response store.
#[derive(Clone)]
pub struct ResponseStore {
    config: WarehouseConfig,
    manager: DuckDbConnectionManager,
}

impl ResponseStore {
    /// Open a store with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open a store, creating the database file and schema when missing.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::open(config.db_path.clone(), config.max_pool_size)?;
        let store = Self { config, manager };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    /// Get the path to the database file.
    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    /// Load a non-expired response. Expired rows are treated as absent.
    pub fn load(&self, cache_key: &str, now_ms: i64) -> Result<Option<StoredResponse>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 2] = [&cache_key, &now_ms];
        let mut statement = connection.prepare(
            "SELECT payload, stored_at_ms, expires_at_ms FROM response_cache \
             WHERE cache_key = ? AND expires_at_ms > ?",
        )?;
        let mut rows = statement.query(params.as_slice())?;

        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let stored = StoredResponse {
            payload: row.get(0)?,
            stored_at_ms: row.get(1)?,
            expires_at_ms: row.get(2)?,
        };
        if stored.expires_at_ms < stored.stored_at_ms {
            return Err(WarehouseError::InvalidRecord(format!(
                "entry '{cache_key}' expires before it was stored"
            )));
        }
        Ok(Some(stored))
    }

    /// Insert or replace a response.
    pub fn save(&self, record: &ResponseRecord<'_>) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 6] = [
            &record.cache_key,
            &record.host,
            &record.path,
            &record.payload,
            &record.stored_at_ms,
            &record.expires_at_ms,
        ];
        connection.execute(
            "INSERT OR REPLACE INTO response_cache \
             (cache_key, host, path, payload, stored_at_ms, expires_at_ms) \
             VALUES (?, ?, ?, ?, ?, ?)",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Delete one entry. Returns whether a row was removed.
    pub fn delete(&self, cache_key: &str) -> Result<bool, WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 1] = [&cache_key];
        let removed = connection.execute(
            "DELETE FROM response_cache WHERE cache_key = ?",
            params.as_slice(),
        )?;
        Ok(removed > 0)
    }

    /// Delete every entry recorded for `path` (on any host).
    pub fn delete_path(&self, path: &str) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 1] = [&path];
        let removed = connection.execute(
            "DELETE FROM response_cache WHERE path = ?",
            params.as_slice(),
        )?;
        Ok(removed)
    }

    /// Delete entries that expired at or before `now_ms`.
    pub fn purge_expired(&self, now_ms: i64) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 1] = [&now_ms];
        let removed = connection.execute(
            "DELETE FROM response_cache WHERE expires_at_ms <= ?",
            params.as_slice(),
        )?;
        Ok(removed)
    }

    pub fn clear(&self) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let removed = connection.execute("DELETE FROM response_cache", [])?;
        Ok(removed)
    }

    /// Number of stored rows, expired ones included.
    pub fn len(&self) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let count: i64 =
            connection.query_row("SELECT COUNT(*) FROM response_cache", [], |row| row.get(0))?;
        usize::try_from(count)
            .map_err(|_| WarehouseError::InvalidRecord(format!("negative row count {count}")))
    }

    pub fn is_empty(&self) -> Result<bool, WarehouseError> {
        Ok(self.len()? == 0)
    }
}

fn resolve_quarry_home() -> PathBuf {
    if let Some(path) = env::var_os("QUARRY_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".quarry");
    }

    PathBuf::from(".quarry")
}

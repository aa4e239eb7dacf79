//! Response cache keyed by [`RequestDescriptor`].
//!
//! Memory is the primary tier. A durable [`ResponseStore`] can be attached
//! for read-through/write-through persistence; its failures are logged and
//! treated as misses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use quarry_warehouse::{ResponseRecord, ResponseStore, WarehouseError};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::descriptor::RequestDescriptor;
use crate::Interval;

/// Defines how a single call interacts with the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Read from the cache if a non-expired entry is present;
    /// otherwise, fetch from the network and write the response to the cache.
    #[default]
    Use,
    /// Always fetch from the network, bypassing any cached entry,
    /// and write the new response to the cache.
    Refresh,
    /// Always fetch from the network and do not read from or write to the cache.
    Bypass,
}

impl CacheMode {
    pub const fn reads(self) -> bool {
        matches!(self, Self::Use)
    }

    pub const fn writes(self) -> bool {
        !matches!(self, Self::Bypass)
    }
}

/// Endpoint classes with distinct freshness requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    IntradayChart,
    DailyChart,
    Metadata,
}

impl EndpointClass {
    pub const fn chart(interval: Interval) -> Self {
        if interval.is_intraday() {
            Self::IntradayChart
        } else {
            Self::DailyChart
        }
    }
}

/// TTL per endpoint class. `Duration::ZERO` disables caching for a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub intraday_chart: Duration,
    pub daily_chart: Duration,
    pub metadata: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            intraday_chart: Duration::from_secs(60),
            daily_chart: Duration::from_secs(15 * 60),
            metadata: Duration::from_secs(6 * 60 * 60),
        }
    }
}

impl CacheTtls {
    pub const fn ttl_for(&self, class: EndpointClass) -> Duration {
        match class {
            EndpointClass::IntradayChart => self.intraday_chart,
            EndpointClass::DailyChart => self.daily_chart,
            EndpointClass::Metadata => self.metadata,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: String,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.stored_at + self.ttl
    }
}

/// Thread-safe response cache.
///
/// Each operation takes the lock once, so readers never see a half-written
/// entry. Writes that touch the durable tier hold `writes` across both
/// tiers, so an invalidation never interleaves with a store or a promotion.
/// Clones share state.
#[derive(Clone, Default)]
pub struct CacheStore {
    inner: Arc<tokio::sync::RwLock<HashMap<RequestDescriptor, CacheEntry>>>,
    writes: Arc<tokio::sync::Mutex<()>>,
    durable: Option<ResponseStore>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("durable", &self.durable.as_ref().map(ResponseStore::db_path))
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Memory-only cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache backed by a durable store.
    pub fn with_durable(store: ResponseStore) -> Self {
        Self {
            inner: Arc::default(),
            writes: Arc::default(),
            durable: Some(store),
        }
    }

    pub fn has_durable_tier(&self) -> bool {
        self.durable.is_some()
    }

    /// Cached payload for `descriptor`, if present and unexpired.
    ///
    /// A memory miss falls through to the durable tier; a durable hit is
    /// promoted to memory with its remaining TTL.
    pub async fn get(&self, descriptor: &RequestDescriptor) -> Option<String> {
        {
            let entries = self.inner.read().await;
            if let Some(entry) = entries.get(descriptor) {
                if !entry.is_expired(Instant::now()) {
                    debug!(path = descriptor.path(), "cache hit");
                    return Some(entry.payload.clone());
                }
            }
        }

        self.durable.as_ref()?;
        let _writes = self.writes.lock().await;
        let key = descriptor.cache_key();
        let now_ms = unix_millis();
        let stored = self
            .on_durable(move |store| store.load(&key, now_ms))
            .await
            .flatten()?;

        let remaining = Duration::from_millis(stored.remaining_ms(now_ms));
        if remaining.is_zero() {
            return None;
        }

        debug!(path = descriptor.path(), ?remaining, "durable cache hit");
        self.inner.write().await.insert(
            descriptor.clone(),
            CacheEntry {
                payload: stored.payload.clone(),
                stored_at: Instant::now(),
                ttl: remaining,
            },
        );
        Some(stored.payload)
    }

    /// Store `payload` for `ttl`. A zero TTL stores nothing.
    pub async fn put(&self, descriptor: &RequestDescriptor, payload: &str, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }

        let _writes = self.writes.lock().await;
        let key = descriptor.cache_key();
        let host = descriptor.host().to_owned();
        let path = descriptor.path().to_owned();
        let stored = payload.to_owned();
        let stored_at_ms = unix_millis();
        let expires_at_ms =
            stored_at_ms.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));
        self.on_durable(move |store| {
            store.save(&ResponseRecord {
                cache_key: &key,
                host: &host,
                path: &path,
                payload: &stored,
                stored_at_ms,
                expires_at_ms,
            })
        })
        .await;

        self.inner.write().await.insert(
            descriptor.clone(),
            CacheEntry {
                payload: payload.to_owned(),
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Remove the entry for `descriptor`. Returns whether one existed.
    pub async fn invalidate(&self, descriptor: &RequestDescriptor) -> bool {
        let _writes = self.writes.lock().await;
        let removed = self.inner.write().await.remove(descriptor).is_some();
        let key = descriptor.cache_key();
        let durable_removed = self
            .on_durable(move |store| store.delete(&key))
            .await
            .unwrap_or(false);
        removed || durable_removed
    }

    /// Remove every memory entry matching `predicate`, together with its
    /// durable copy. Returns the number of memory entries removed.
    pub async fn invalidate_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&RequestDescriptor) -> bool,
    {
        let _writes = self.writes.lock().await;
        self.remove_matching(predicate).await
    }

    /// Remove every entry for `path` in both tiers.
    pub async fn invalidate_path(&self, path: &str) -> usize {
        let _writes = self.writes.lock().await;
        let removed = self
            .remove_matching(|descriptor| descriptor.path() == path)
            .await;
        let path = path.to_owned();
        self.on_durable(move |store| store.delete_path(&path)).await;
        removed
    }

    async fn remove_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&RequestDescriptor) -> bool,
    {
        let removed: Vec<RequestDescriptor> = {
            let mut entries = self.inner.write().await;
            let matched: Vec<RequestDescriptor> =
                entries.keys().filter(|key| predicate(key)).cloned().collect();
            for descriptor in &matched {
                entries.remove(descriptor);
            }
            matched
        };

        if !removed.is_empty() {
            let keys: Vec<String> = removed.iter().map(RequestDescriptor::cache_key).collect();
            self.on_durable(move |store| {
                for key in &keys {
                    store.delete(key)?;
                }
                Ok(())
            })
            .await;
        }
        removed.len()
    }

    /// Remove expired entries. Returns the number of memory entries removed.
    pub async fn clear_expired(&self) -> usize {
        let now = Instant::now();
        let removed = {
            let mut entries = self.inner.write().await;
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired(now));
            before - entries.len()
        };
        let now_ms = unix_millis();
        self.on_durable(move |store| store.purge_expired(now_ms)).await;
        removed
    }

    /// Clear all entries from both tiers.
    pub async fn clear(&self) {
        let _writes = self.writes.lock().await;
        self.inner.write().await.clear();
        self.on_durable(|store| store.clear()).await;
    }

    /// Number of memory entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    async fn on_durable<T, F>(&self, operation: F) -> Option<T>
    where
        F: FnOnce(&ResponseStore) -> Result<T, WarehouseError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.durable.clone()?;
        match tokio::task::spawn_blocking(move || operation(&store)).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(error)) => {
                warn!(%error, "durable cache operation failed");
                None
            }
            Err(error) => {
                warn!(%error, "durable cache task failed");
                None
            }
        }
    }
}

fn unix_millis() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(nanos).unwrap_or(i64::MAX)
}

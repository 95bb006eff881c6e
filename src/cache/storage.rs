use crate::cache::{CacheEntry, CacheKey};
use crate::config::CacheConfig;
use crate::error::{ProxyError, ProxyResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<CacheKey, Arc<CacheEntry>>,
    current_size: u64,
}

impl StoreInner {
    fn remove(&mut self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let entry = self.entries.remove(key)?;
        self.current_size = self.current_size.saturating_sub(entry.size());
        Some(entry)
    }
}

/// In-memory response store bounded by total bytes, key count and a store TTL
#[derive(Debug)]
pub struct ResponseStore {
    inner: RwLock<StoreInner>,
    metrics: RwLock<CacheMetrics>,
    max_size: u64,
    max_entries: usize,
    ttl: ChronoDuration,
}

impl ResponseStore {
    pub fn new(config: &CacheConfig) -> Self {
        let ttl = ChronoDuration::from_std(config.ttl())
            .unwrap_or_else(|_| ChronoDuration::days(365 * 100));
        Self {
            inner: RwLock::new(StoreInner::default()),
            metrics: RwLock::new(CacheMetrics::default()),
            max_size: config.max_size,
            max_entries: config.max_entries,
            ttl,
        }
    }

    /// Largest entry the store accepts, in bytes
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    fn outlived_ttl(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.fetched_at > self.ttl
    }

    /// Entry stored under `key` unless it outlived the store TTL
    pub async fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<Arc<CacheEntry>> {
        let inner = self.inner.read().await;
        inner
            .entries
            .get(key)
            .filter(|entry| !self.outlived_ttl(entry, now))
            .cloned()
    }

    pub async fn contains(&self, key: &CacheKey, now: DateTime<Utc>) -> bool {
        self.get(key, now).await.is_some()
    }

    /// Store `entry` under `key`, evicting the oldest fetched entries to fit
    pub async fn put(&self, key: CacheKey, entry: Arc<CacheEntry>) -> ProxyResult<()> {
        let entry_size = entry.size();
        if entry_size > self.max_size {
            return Err(ProxyError::cache(format!(
                "Entry for {} is {} bytes, larger than the cache limit of {} bytes",
                key, entry_size, self.max_size
            )));
        }

        let evicted = {
            let mut inner = self.inner.write().await;
            inner.remove(&key);

            let mut by_age: Vec<(DateTime<Utc>, CacheKey)> = Vec::new();
            let needs_room = inner.current_size + entry_size > self.max_size
                || inner.entries.len() >= self.max_entries;
            if needs_room {
                by_age = inner
                    .entries
                    .iter()
                    .map(|(k, e)| (e.fetched_at, k.clone()))
                    .collect();
                by_age.sort_by(|a, b| a.0.cmp(&b.0));
            }

            let mut evicted = 0u64;
            for (_, old_key) in by_age {
                if inner.current_size + entry_size <= self.max_size
                    && inner.entries.len() < self.max_entries
                {
                    break;
                }
                inner.remove(&old_key);
                evicted += 1;
                debug!("Evicted cache entry: {}", old_key);
            }

            inner.current_size += entry_size;
            inner.entries.insert(key, entry);
            evicted
        };

        let mut metrics = self.metrics.write().await;
        metrics.stores += 1;
        metrics.evictions += evicted;
        if evicted > 0 {
            info!("Evicted {} cache entries to free space", evicted);
        }
        Ok(())
    }

    pub async fn remove(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.inner.write().await.remove(key)
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.current_size = 0;
        info!("Cache cleared");
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn record_hit(&self) {
        self.metrics.write().await.hits += 1;
    }

    pub async fn record_miss(&self) {
        self.metrics.write().await.misses += 1;
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.read().await;
        let metrics = self.metrics.read().await;
        CacheStats {
            entry_count: inner.entries.len(),
            total_size: inner.current_size,
            max_size: self.max_size,
            hit_ratio: metrics.hit_ratio(),
            hits: metrics.hits,
            misses: metrics.misses,
            stores: metrics.stores,
            evictions: metrics.evictions,
        }
    }

    /// Drop entries that outlived the store TTL
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write().await;
        let expired: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| self.outlived_ttl(entry, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        drop(inner);

        if !expired.is_empty() {
            self.metrics.write().await.expired_cleaned += expired.len() as u64;
        }
        expired.len()
    }

    /// Periodic TTL cleanup; stops once the store is dropped
    pub fn spawn_cleanup(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let removed = store.purge_expired(Utc::now()).await;
                if removed > 0 {
                    debug!("Cleaned up {} cache entries past the store TTL", removed);
                }
            }
        })
    }

    /// Write every entry to `path` as JSON, replacing the file atomically
    pub async fn save_snapshot(&self, path: &Path) -> ProxyResult<usize> {
        let snapshot: Vec<(CacheKey, CacheEntry)> = {
            let inner = self.inner.read().await;
            inner
                .entries
                .iter()
                .map(|(k, e)| (k.clone(), e.as_ref().clone()))
                .collect()
        };
        let json = serde_json::to_vec(&snapshot)?;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        info!(
            "Saved {} cache entries to {}",
            snapshot.len(),
            path.display()
        );
        Ok(snapshot.len())
    }

    /// Load a snapshot written by [`save_snapshot`](Self::save_snapshot).
    /// Unreadable snapshots leave the store empty.
    pub async fn load_snapshot(&self, path: &Path) -> usize {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No cache snapshot at {}", path.display());
                return 0;
            }
            Err(e) => {
                warn!("Failed to read cache snapshot {}: {}", path.display(), e);
                return 0;
            }
        };
        let snapshot: Vec<(CacheKey, CacheEntry)> = match serde_json::from_slice(&bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Discarding corrupt cache snapshot {}: {}", path.display(), e);
                return 0;
            }
        };

        let mut loaded = 0;
        for (key, entry) in snapshot {
            match self.put(key, Arc::new(entry)).await {
                Ok(()) => loaded += 1,
                Err(e) => debug!("Skipping snapshot entry: {}", e),
            }
        }
        info!("Loaded {} cache entries from {}", loaded, path.display());
        loaded
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of stored keys
    pub entry_count: usize,
    /// Total size in bytes
    pub total_size: u64,
    /// Maximum size in bytes
    pub max_size: u64,
    /// Hit ratio as percentage
    pub hit_ratio: f64,
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub evictions: u64,
}

/// Running counters kept alongside the store
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub evictions: u64,
    /// Entries dropped by the TTL cleanup
    pub expired_cleaned: u64,
}

impl CacheMetrics {
    /// Calculate hit ratio as percentage
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            (self.hits as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }
}

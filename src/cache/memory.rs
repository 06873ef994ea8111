//! Memory Driver Module
//!
//! HashMap storage behind a read-write lock, with read-time eviction of
//! expired entries and a background janitor bounding memory growth.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::cache::{current_timestamp_ms, CacheEntry, CacheStats, Counters, Driver, Ttl};
use crate::config::MemoryConfig;
use crate::error::Result;
use crate::tasks::{Janitor, Sweep};

// == Memory Store ==
/// Entry map and counters shared between the driver and its janitor.
#[derive(Debug, Default)]
struct MemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    counters: Counters,
}

#[async_trait]
impl Sweep for MemoryStore {
    fn label(&self) -> &'static str {
        "memory"
    }

    async fn sweep(&self) -> Result<usize> {
        let now = current_timestamp_ms();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        Ok(before - entries.len())
    }
}

// == Memory Driver ==
/// In-process cache driver.
///
/// Readers share the lock; writes, read-time evictions and janitor sweeps
/// take it exclusively.
#[derive(Debug)]
pub struct MemoryDriver {
    store: Arc<MemoryStore>,
    default_expiration: Duration,
    cleanup_interval: Duration,
    janitor: Mutex<Option<Janitor>>,
}

impl MemoryDriver {
    // == Constructor ==
    /// Creates a memory driver.
    ///
    /// # Arguments
    /// * `default_expiration` - Lifetime applied for `Ttl::Default` (zero = never expire)
    /// * `cleanup_interval` - Janitor period (zero disables the janitor)
    ///
    /// The janitor is only started when called inside a tokio runtime.
    pub fn new(default_expiration: Duration, cleanup_interval: Duration) -> Self {
        let store = Arc::new(MemoryStore::default());
        let janitor = Janitor::spawn(&store, cleanup_interval);

        info!(
            "Memory cache initialized: default_expiration={:?}, cleanup_interval={:?}",
            default_expiration, cleanup_interval
        );

        Self {
            store,
            default_expiration,
            cleanup_interval,
            janitor: Mutex::new(janitor),
        }
    }

    /// Creates a memory driver from its configuration section.
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(config.default_ttl(), config.cleanup_interval())
    }

    /// Runs one cleanup pass immediately, returning how many entries were removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        self.store.sweep().await
    }

    // == Length ==
    /// Returns the number of stored entries, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.store.entries.read().await.len()
    }

    // == Is Empty ==
    pub async fn is_empty(&self) -> bool {
        self.store.entries.read().await.is_empty()
    }

    fn entry(&self, value: Value, ttl: Ttl) -> CacheEntry {
        CacheEntry::new(value, ttl.resolve(self.default_expiration))
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn driver_type(&self) -> &'static str {
        "memory"
    }

    // == Get ==
    /// Expired entries found here are removed and counted as misses.
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        {
            let entries = self.store.entries.read().await;
            match entries.get(key) {
                None => {
                    self.store.counters.record_miss();
                    return Ok(None);
                }
                Some(entry) if !entry.is_expired() => {
                    self.store.counters.record_hit();
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
            }
        }

        // Expired: re-check under the write lock, a writer may have replaced it
        let mut entries = self.store.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if !entry.is_expired() {
                self.store.counters.record_hit();
                return Ok(Some(entry.value.clone()));
            }
            entries.remove(key);
        }
        self.store.counters.record_miss();
        Ok(None)
    }

    // == Set ==
    async fn set(&self, key: &str, value: Value, ttl: Ttl) -> Result<()> {
        let entry = self.entry(value, ttl);
        self.store
            .entries
            .write()
            .await
            .insert(key.to_string(), entry);
        Ok(())
    }

    // == Delete ==
    async fn delete(&self, key: &str) -> Result<()> {
        self.store.entries.write().await.remove(key);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.store.entries.write().await.clear();
        Ok(())
    }

    /// Inserts the whole batch under a single write lock.
    async fn set_multiple(&self, values: HashMap<String, Value>, ttl: Ttl) -> Result<()> {
        let batch: Vec<(String, CacheEntry)> = values
            .into_iter()
            .map(|(key, value)| (key, self.entry(value, ttl)))
            .collect();

        let mut entries = self.store.entries.write().await;
        entries.extend(batch);
        Ok(())
    }

    async fn delete_multiple(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut entries = self.store.entries.write().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    // == Stats ==
    async fn stats(&self) -> Result<CacheStats> {
        let count = self.len().await as u64;
        Ok(self
            .store
            .counters
            .snapshot(self.driver_type(), count)
            .with_detail("default_expiration_ms", self.default_expiration.as_millis() as u64)
            .with_detail("cleanup_interval_ms", self.cleanup_interval.as_millis() as u64))
    }

    async fn close(&self) -> Result<()> {
        if let Some(janitor) = self.janitor.lock().await.take() {
            janitor.stop().await;
            info!("Memory cache closed");
        }
        Ok(())
    }
}

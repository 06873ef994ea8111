//! Driver Contract Module
//!
//! The operation set every cache backend implements, plus the composed
//! operations (`remember`, `pull`, typed access) built on top of it.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::cache::{CacheStats, Ttl};
use crate::error::{CacheError, Result};

// == Multi Get ==
/// Result of a batch lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiGet {
    /// Keys that were present and not expired
    pub found: HashMap<String, Value>,
    /// Keys that were absent, expired, undecodable or failed to load
    pub missing: Vec<String>,
}

impl MultiGet {
    /// Reports every key as missing.
    pub fn all_missing(keys: &[String]) -> Self {
        Self {
            found: HashMap::new(),
            missing: keys.to_vec(),
        }
    }
}

// == Driver ==
/// A cache backend with uniform TTL semantics.
///
/// Expired entries are indistinguishable from absent ones on every read
/// path, whether or not the backend has physically removed them yet.
/// Drivers never retry internally.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Backend name reported as `type` in [`CacheStats`].
    fn driver_type(&self) -> &'static str;

    /// Returns the value for `key` if it exists and has not expired.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Stores `value` under `key`, replacing any existing entry.
    async fn set(&self, key: &str, value: Value, ttl: Ttl) -> Result<()>;

    /// Returns whether `key` is present, with the same hit/miss accounting as `get`.
    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Removes `key`. A missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Removes every entry this driver owns.
    async fn flush(&self) -> Result<()>;

    /// Looks up several keys at once.
    ///
    /// A key whose lookup fails is reported missing; the batch itself never fails.
    async fn get_multiple(&self, keys: &[String]) -> MultiGet {
        let mut result = MultiGet::default();
        for key in keys {
            match self.get(key).await {
                Ok(Some(value)) => {
                    result.found.insert(key.clone(), value);
                }
                Ok(None) => result.missing.push(key.clone()),
                Err(e) => {
                    tracing::debug!("get_multiple: lookup of {} failed: {}", key, e);
                    result.missing.push(key.clone());
                }
            }
        }
        result
    }

    /// Stores every pair with the same TTL.
    ///
    /// The default is a best-effort loop that stops at the first failing key;
    /// keys written before the failure stay written.
    async fn set_multiple(&self, values: HashMap<String, Value>, ttl: Ttl) -> Result<()> {
        for (key, value) in values {
            self.set(&key, value, ttl).await?;
        }
        Ok(())
    }

    /// Removes several keys. An empty list is a no-op.
    async fn delete_multiple(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }

    /// Returns a statistics snapshot.
    async fn stats(&self) -> Result<CacheStats>;

    /// Stops background work and releases owned connections.
    ///
    /// Closing twice is harmless.
    async fn close(&self) -> Result<()>;
}

// == Driver Extensions ==
/// Operations composed from the [`Driver`] primitives.
///
/// Implemented for every driver, including `dyn Driver`.
#[async_trait]
pub trait DriverExt: Driver {
    /// Returns the cached value for `key`, computing and storing it on a miss.
    ///
    /// `compute` runs at most once per call. If it fails nothing is cached and
    /// the error is returned. There is no single-flight: concurrent callers
    /// that miss on the same key may each run their own `compute`.
    async fn remember<F, Fut>(&self, key: &str, ttl: Ttl, compute: F) -> Result<Value>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Value>> + Send,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let value = compute().await?;
        self.set(key, value.clone(), ttl).await?;
        Ok(value)
    }

    /// Like [`DriverExt::remember`] with an entry that never expires.
    async fn remember_forever<F, Fut>(&self, key: &str, compute: F) -> Result<Value>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Value>> + Send,
    {
        self.remember(key, Ttl::Forever, compute).await
    }

    /// Stores `value` with no expiration.
    async fn forever(&self, key: &str, value: Value) -> Result<()> {
        self.set(key, value, Ttl::Forever).await
    }

    /// Returns the value for `key` and removes it.
    async fn pull(&self, key: &str) -> Result<Option<Value>> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.delete(key).await?;
        }
        Ok(value)
    }

    /// Reads `key` and deserializes it into `T`.
    async fn get_as<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| CacheError::Serialization(format!("{}: {}", key, e))),
            None => Ok(None),
        }
    }

    /// Serializes `value` and stores it under `key`.
    async fn set_as<T>(&self, key: &str, value: &T, ttl: Ttl) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value)
            .map_err(|e| CacheError::Serialization(format!("{}: {}", key, e)))?;
        self.set(key, value, ttl).await
    }
}

impl<D: Driver + ?Sized> DriverExt for D {}

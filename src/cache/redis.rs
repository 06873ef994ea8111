//! Redis Driver Module
//!
//! Delegates expiration to Redis' native per-key TTL.
//!
//! ## Features
//! - Namespace isolation via key prefixing; `flush` and `stats` only touch
//!   keys under the prefix (SCAN + DEL, never FLUSHDB)
//! - Pluggable value serializer chosen at construction
//! - Batch reads with one MGET, batch writes with one pipeline
//! - Every round trip bounded by the configured operation timeout

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::deadline::bounded;
use crate::cache::{CacheStats, Counters, Driver, MultiGet, Serializer, Ttl};
use crate::config::RedisConfig;
use crate::error::{CacheError, Result};

const SCAN_BATCH: usize = 500;

// == Options ==
/// Per-driver settings independent of the connection.
#[derive(Debug, Clone, PartialEq)]
pub struct RedisOptions {
    /// Prepended to every key
    pub prefix: String,
    /// Lifetime applied for `Ttl::Default` (zero = never expire)
    pub default_expiration: Duration,
    pub serializer: Serializer,
    /// Upper bound for each round trip (zero = unbounded)
    pub operation_timeout: Duration,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            prefix: "cache:".to_string(),
            default_expiration: Duration::from_secs(3600),
            serializer: Serializer::Json,
            operation_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisOptions {
    pub fn from_config(config: &RedisConfig) -> Result<Self> {
        Ok(Self {
            prefix: config.prefix.clone(),
            default_expiration: config.default_ttl(),
            serializer: config.serializer()?,
            operation_timeout: config.operation_timeout(),
        })
    }
}

// == Redis Driver ==
/// Redis-backed cache driver.
pub struct RedisDriver {
    conn: RwLock<Option<ConnectionManager>>,
    options: RedisOptions,
    counters: Counters,
}

impl RedisDriver {
    // == Constructors ==
    /// Connects to `url` and verifies the connection with PING.
    pub async fn connect(url: &str, options: RedisOptions) -> Result<Self> {
        info!("Initializing Redis cache at {}", redacted(url));

        let client = Client::open(url)?;
        let conn = bounded(
            options.operation_timeout,
            "connect",
            client.get_connection_manager(),
        )
        .await?;

        let driver = Self::with_connection(conn, options);
        let mut conn = driver.connection().await?;
        driver
            .timed("ping", redis::cmd("PING").query_async::<String>(&mut conn))
            .await?;

        info!("Redis cache connected with prefix {:?}", driver.options.prefix);
        Ok(driver)
    }

    /// Connects using a configuration section.
    pub async fn from_config(config: &RedisConfig) -> Result<Self> {
        Self::connect(&config.url(), RedisOptions::from_config(config)?).await
    }

    /// Wraps an existing connection manager, which may be shared with other users.
    ///
    /// `close` only drops this driver's handle.
    pub fn with_connection(conn: ConnectionManager, options: RedisOptions) -> Self {
        Self {
            conn: RwLock::new(Some(conn)),
            options,
            counters: Counters::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.options.prefix
    }

    pub fn serializer(&self) -> Serializer {
        self.options.serializer
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.options.prefix, key)
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        self.conn
            .read()
            .await
            .clone()
            .ok_or(CacheError::Closed("redis"))
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = RedisResult<T>>,
    ) -> Result<T> {
        bounded(self.options.operation_timeout, operation, fut).await
    }

    /// Decodes a stored payload, counting failures as corruption.
    fn decode(&self, key: &str, bytes: &[u8]) -> Option<Value> {
        match self.options.serializer.decode(bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                self.counters.record_corrupt();
                debug!("Undecodable Redis value for {} treated as miss: {}", key, e);
                None
            }
        }
    }

    /// Collects every key under the prefix with SCAN.
    async fn scan_keys(&self, conn: &mut ConnectionManager) -> Result<Vec<String>> {
        let pattern = format!("{}*", escape_glob(&self.options.prefix));
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .timed(
                    "scan",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut *conn),
                )
                .await?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }

    fn set_command(&self, pipe: &mut redis::Pipeline, key: String, bytes: Vec<u8>, ttl: Ttl) {
        let command = pipe.cmd("SET").arg(key).arg(bytes);
        if let Some(lifetime) = ttl.resolve(self.options.default_expiration) {
            command.arg("PX").arg(lifetime.as_millis().max(1) as u64);
        }
        command.ignore();
    }
}

#[async_trait]
impl Driver for RedisDriver {
    fn driver_type(&self) -> &'static str {
        "redis"
    }

    // == Get ==
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut conn = self.connection().await?;
        let bytes: Option<Vec<u8>> = self
            .timed(
                "get",
                redis::cmd("GET")
                    .arg(self.key(key))
                    .query_async(&mut conn),
            )
            .await?;

        let value = bytes.and_then(|bytes| self.decode(key, &bytes));
        self.counters.record(value.is_some());
        Ok(value)
    }

    // == Set ==
    async fn set(&self, key: &str, value: Value, ttl: Ttl) -> Result<()> {
        let bytes = self.options.serializer.encode(&value)?;
        let mut conn = self.connection().await?;

        let mut command = redis::cmd("SET");
        command.arg(self.key(key)).arg(bytes);
        if let Some(lifetime) = ttl.resolve(self.options.default_expiration) {
            command.arg("PX").arg(lifetime.as_millis().max(1) as u64);
        }

        self.timed("set", command.query_async::<()>(&mut conn))
            .await
    }

    // == Delete ==
    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        self.timed(
            "delete",
            redis::cmd("DEL")
                .arg(self.key(key))
                .query_async::<()>(&mut conn),
        )
        .await
    }

    /// Deletes only keys under this driver's prefix.
    async fn flush(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let keys = self.scan_keys(&mut conn).await?;

        for chunk in keys.chunks(SCAN_BATCH) {
            self.timed(
                "flush",
                redis::cmd("DEL")
                    .arg(chunk.to_vec())
                    .query_async::<()>(&mut conn),
            )
            .await?;
        }

        debug!(
            "Redis flush removed {} keys under {:?}",
            keys.len(),
            self.options.prefix
        );
        Ok(())
    }

    /// One MGET; if it fails every key is reported missing.
    async fn get_multiple(&self, keys: &[String]) -> MultiGet {
        if keys.is_empty() {
            return MultiGet::default();
        }

        let fetched: Result<Vec<Option<Vec<u8>>>> = async {
            let mut conn = self.connection().await?;
            let full_keys: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
            self.timed(
                "get_multiple",
                redis::cmd("MGET").arg(full_keys).query_async(&mut conn),
            )
            .await
        }
        .await;

        let blobs = match fetched {
            Ok(blobs) => blobs,
            Err(e) => {
                warn!("Redis MGET failed, reporting {} keys missing: {}", keys.len(), e);
                for _ in keys {
                    self.counters.record_miss();
                }
                return MultiGet::all_missing(keys);
            }
        };

        let mut result = MultiGet::default();
        for (key, blob) in keys.iter().zip(blobs) {
            match blob.and_then(|bytes| self.decode(key, &bytes)) {
                Some(value) => {
                    self.counters.record_hit();
                    result.found.insert(key.clone(), value);
                }
                None => {
                    self.counters.record_miss();
                    result.missing.push(key.clone());
                }
            }
        }
        result
    }

    /// Sends every SET in one pipeline.
    ///
    /// The pipeline is not wrapped in MULTI/EXEC: on a transport failure some
    /// keys may have been written and others not.
    async fn set_multiple(&self, values: HashMap<String, Value>, ttl: Ttl) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for (key, value) in &values {
            let bytes = self.options.serializer.encode(value)?;
            self.set_command(&mut pipe, self.key(key), bytes, ttl);
        }

        let mut conn = self.connection().await?;
        self.timed("set_multiple", pipe.query_async::<()>(&mut conn))
            .await
    }

    async fn delete_multiple(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection().await?;
        let full_keys: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        self.timed(
            "delete_multiple",
            redis::cmd("DEL").arg(full_keys).query_async::<()>(&mut conn),
        )
        .await
    }

    // == Stats ==
    async fn stats(&self) -> Result<CacheStats> {
        let mut conn = self.connection().await?;
        let count = self.scan_keys(&mut conn).await?.len() as u64;
        let info: String = self
            .timed(
                "info",
                redis::cmd("INFO").arg("memory").query_async(&mut conn),
            )
            .await?;

        Ok(self
            .counters
            .snapshot(self.driver_type(), count)
            .with_detail("prefix", self.options.prefix.clone())
            .with_detail("serializer", self.options.serializer.name())
            .with_detail("corrupt", self.counters.corrupt())
            .with_detail("info", Value::Object(parse_info(&info))))
    }

    async fn close(&self) -> Result<()> {
        if self.conn.write().await.take().is_some() {
            info!("Redis cache with prefix {:?} closed", self.options.prefix);
        }
        Ok(())
    }
}

// == Helpers ==
/// Escapes Redis glob metacharacters so the prefix matches literally.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\' | '^') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Parses `field:value` lines of an INFO reply.
fn parse_info(info: &str) -> Map<String, Value> {
    info.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(field, value)| (field.to_string(), Value::from(value)))
        .collect()
}

/// Hides the password part of a connection URL for logging.
fn redacted(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            format!("{}://***@{}", &url[..scheme], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

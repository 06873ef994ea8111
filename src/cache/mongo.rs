//! MongoDB Driver Module
//!
//! One document per key in a collection owned by the driver. A TTL index on
//! `expiration` lets the server delete expired documents; because the server
//! sweeps on its own schedule, every read re-checks the expiration too.
//!
//! Document shape: `{ _id: key, value, expiration, created_at }`. Documents
//! that never expire carry the Unix epoch as `expiration`, which the index's
//! partial filter excludes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, DateTime, Document};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::deadline::bounded;
use crate::cache::{current_timestamp_ms, CacheStats, Counters, Driver, MultiGet, Ttl};
use crate::config::MongoConfig;
use crate::error::{CacheError, Result};

const TTL_INDEX_NAME: &str = "expiration_ttl";

// == Options ==
/// Per-driver settings independent of the client.
#[derive(Debug, Clone, PartialEq)]
pub struct MongoOptions {
    pub database: String,
    pub collection: String,
    /// Lifetime applied for `Ttl::Default` (zero = never expire)
    pub default_expiration: Duration,
    /// Upper bound for each round trip (zero = unbounded)
    pub operation_timeout: Duration,
}

impl Default for MongoOptions {
    fn default() -> Self {
        Self {
            database: "cache".to_string(),
            collection: "cache_entries".to_string(),
            default_expiration: Duration::from_secs(3600),
            operation_timeout: Duration::from_secs(5),
        }
    }
}

impl MongoOptions {
    pub fn from_config(config: &MongoConfig) -> Self {
        Self {
            database: config.database.clone(),
            collection: config.collection.clone(),
            default_expiration: config.default_ttl(),
            operation_timeout: config.operation_timeout(),
        }
    }
}

// == Cache Document ==
#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    #[serde(rename = "_id")]
    key: String,
    value: Bson,
    expiration: DateTime,
    created_at: DateTime,
}

impl CacheDocument {
    fn new(key: &str, value: &Value, lifetime: Option<Duration>) -> Result<Self> {
        let now = current_timestamp_ms();
        let expiration = match lifetime {
            Some(ttl) => DateTime::from_millis(now.saturating_add(ttl.as_millis() as u64) as i64),
            None => DateTime::from_millis(0),
        };

        Ok(Self {
            key: key.to_string(),
            value: bson::to_bson(value)
                .map_err(|e| CacheError::Serialization(format!("{}: {}", key, e)))?,
            expiration,
            created_at: DateTime::from_millis(now as i64),
        })
    }

    fn into_document(self) -> Result<Document> {
        bson::to_document(&self).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    /// The epoch sentinel never expires.
    fn is_expired_at(&self, now_ms: u64) -> bool {
        let expiration = self.expiration.timestamp_millis();
        expiration > 0 && expiration as u64 <= now_ms
    }
}

// == Mongo Driver ==
/// MongoDB-backed cache driver.
///
/// Values are stored as BSON, which has no unsigned 64-bit integer: `set` of
/// a value containing an integer above `i64::MAX` fails with
/// [`CacheError::Serialization`] instead of silently losing precision.
pub struct MongoDriver {
    client: Mutex<Option<Client>>,
    owns_client: bool,
    closed: AtomicBool,
    database: Database,
    collection: Collection<Document>,
    options: MongoOptions,
    counters: Counters,
}

impl MongoDriver {
    // == Constructors ==
    /// Connects to `uri`, pings the server and ensures the TTL index exists.
    pub async fn connect(uri: &str, options: MongoOptions) -> Result<Self> {
        info!(
            "Initializing MongoDB cache in {}.{}",
            options.database, options.collection
        );

        let client = bounded(options.operation_timeout, "connect", Client::with_uri_str(uri)).await?;
        let driver = Self::build(client, true, options);

        bounded(
            driver.options.operation_timeout,
            "ping",
            driver.database.run_command(doc! { "ping": 1 }),
        )
        .await?;
        driver.ensure_index().await?;

        info!("MongoDB cache connected");
        Ok(driver)
    }

    /// Connects using a configuration section.
    pub async fn from_config(config: &MongoConfig) -> Result<Self> {
        Self::connect(&config.uri, MongoOptions::from_config(config)).await
    }

    /// Uses a client shared with other parts of the application.
    ///
    /// `close` leaves a borrowed client running.
    pub async fn with_client(client: Client, options: MongoOptions) -> Result<Self> {
        let driver = Self::build(client, false, options);
        driver.ensure_index().await?;
        Ok(driver)
    }

    fn build(client: Client, owns_client: bool, options: MongoOptions) -> Self {
        let database = client.database(&options.database);
        let collection = database.collection::<Document>(&options.collection);

        Self {
            client: Mutex::new(Some(client)),
            owns_client,
            closed: AtomicBool::new(false),
            database,
            collection,
            options,
            counters: Counters::new(),
        }
    }

    /// Creates the TTL index on `expiration` if it does not exist yet.
    async fn ensure_index(&self) -> Result<()> {
        let index = IndexModel::builder()
            .keys(doc! { "expiration": 1 })
            .options(
                IndexOptions::builder()
                    .name(TTL_INDEX_NAME.to_string())
                    .expire_after(Duration::ZERO)
                    .partial_filter_expression(doc! {
                        "expiration": { "$gt": DateTime::from_millis(0) }
                    })
                    .build(),
            )
            .build();

        self.timed("create_index", self.collection.create_index(index))
            .await?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed("mongodb"));
        }
        Ok(())
    }

    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: std::future::IntoFuture<Output = mongodb::error::Result<T>>,
    {
        bounded(self.options.operation_timeout, operation, fut).await
    }

    /// Decodes a raw document, reading undecodable ones as absent.
    fn decode(&self, document: Document) -> Option<CacheDocument> {
        match bson::from_document::<CacheDocument>(document) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                self.counters.record_corrupt();
                debug!("Undecodable MongoDB cache document treated as miss: {}", e);
                None
            }
        }
    }

    /// Filter matching documents that have not expired at `now_ms`.
    fn live_filter(now_ms: u64) -> Document {
        doc! {
            "$or": [
                { "expiration": DateTime::from_millis(0) },
                { "expiration": { "$gt": DateTime::from_millis(now_ms as i64) } },
            ]
        }
    }
}

#[async_trait]
impl Driver for MongoDriver {
    fn driver_type(&self) -> &'static str {
        "mongodb"
    }

    // == Get ==
    /// Documents past their expiration are misses even if the TTL monitor
    /// has not deleted them yet.
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_open()?;

        let found = self
            .timed("get", self.collection.find_one(doc! { "_id": key }))
            .await?;

        let now = current_timestamp_ms();
        let value = found
            .and_then(|document| self.decode(document))
            .filter(|document| !document.is_expired_at(now))
            .map(|document| document.value.into_relaxed_extjson());

        self.counters.record(value.is_some());
        Ok(value)
    }

    // == Set ==
    async fn set(&self, key: &str, value: Value, ttl: Ttl) -> Result<()> {
        self.ensure_open()?;

        let lifetime = ttl.resolve(self.options.default_expiration);
        let document = CacheDocument::new(key, &value, lifetime)?.into_document()?;

        self.timed(
            "set",
            self.collection
                .replace_one(doc! { "_id": key }, document)
                .upsert(true),
        )
        .await?;
        Ok(())
    }

    // == Delete ==
    async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        self.timed("delete", self.collection.delete_one(doc! { "_id": key }))
            .await?;
        Ok(())
    }

    /// Empties the driver's collection.
    async fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        let result = self
            .timed("flush", self.collection.delete_many(doc! {}))
            .await?;
        debug!("MongoDB flush removed {} documents", result.deleted_count);
        Ok(())
    }

    /// One `$in` query; expired documents are filtered out client-side.
    async fn get_multiple(&self, keys: &[String]) -> MultiGet {
        if keys.is_empty() {
            return MultiGet::default();
        }

        let fetched: Result<Vec<Document>> = async {
            self.ensure_open()?;
            let cursor = self
                .timed(
                    "get_multiple",
                    self.collection.find(doc! { "_id": { "$in": keys.to_vec() } }),
                )
                .await?;
            self.timed("get_multiple", cursor.try_collect::<Vec<Document>>())
                .await
        }
        .await;

        let documents = match fetched {
            Ok(documents) => documents,
            Err(e) => {
                warn!("MongoDB batch read failed, reporting {} keys missing: {}", keys.len(), e);
                for _ in keys {
                    self.counters.record_miss();
                }
                return MultiGet::all_missing(keys);
            }
        };

        let now = current_timestamp_ms();
        let mut live: HashMap<String, Value> = documents
            .into_iter()
            .filter_map(|document| self.decode(document))
            .filter(|document| !document.is_expired_at(now))
            .map(|document| (document.key, document.value.into_relaxed_extjson()))
            .collect();

        let mut result = MultiGet::default();
        for key in keys {
            match live.remove(key) {
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

    /// Sends one ordered `update` command with an upsert-by-replace per key.
    ///
    /// The server stops at the first failing document; documents before it
    /// stay written and the call returns [`CacheError::Batch`].
    async fn set_multiple(&self, values: HashMap<String, Value>, ttl: Ttl) -> Result<()> {
        self.ensure_open()?;
        if values.is_empty() {
            return Ok(());
        }

        let lifetime = ttl.resolve(self.options.default_expiration);
        let mut updates = Vec::with_capacity(values.len());
        for (key, value) in &values {
            let replacement = CacheDocument::new(key, value, lifetime)?.into_document()?;
            updates.push(doc! {
                "q": { "_id": key.as_str() },
                "u": replacement,
                "upsert": true,
            });
        }

        let reply = self
            .timed(
                "set_multiple",
                self.database.run_command(doc! {
                    "update": self.options.collection.as_str(),
                    "updates": updates,
                    "ordered": true,
                }),
            )
            .await?;

        match reply.get_array("writeErrors") {
            Ok(errors) if !errors.is_empty() => Err(CacheError::Batch(format!(
                "{} of {} documents rejected: {:?}",
                errors.len(),
                values.len(),
                errors.first()
            ))),
            _ => Ok(()),
        }
    }

    async fn delete_multiple(&self, keys: &[String]) -> Result<()> {
        self.ensure_open()?;
        if keys.is_empty() {
            return Ok(());
        }

        self.timed(
            "delete_multiple",
            self.collection
                .delete_many(doc! { "_id": { "$in": keys.to_vec() } }),
        )
        .await?;
        Ok(())
    }

    // == Stats ==
    /// `count` excludes expired documents the server has not deleted yet.
    async fn stats(&self) -> Result<CacheStats> {
        self.ensure_open()?;

        let count = self
            .timed(
                "stats",
                self.collection
                    .count_documents(Self::live_filter(current_timestamp_ms())),
            )
            .await?;

        Ok(self
            .counters
            .snapshot(self.driver_type(), count)
            .with_detail("database", self.options.database.clone())
            .with_detail("collection", self.options.collection.clone())
            .with_detail("corrupt", self.counters.corrupt()))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(client) = self.client.lock().await.take() {
            if self.owns_client {
                client.shutdown().await;
            }
        }
        info!(
            "MongoDB cache {}.{} closed",
            self.options.database, self.options.collection
        );
        Ok(())
    }
}

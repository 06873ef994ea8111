//! Configuration Module
//!
//! Construction-time settings for each cache driver, loadable from
//! environment variables or any serde source.
//!
//! Durations are whole seconds (milliseconds for timeouts). A default TTL of
//! zero means entries stored with `Ttl::Default` never expire; a cleanup
//! interval of zero disables the janitor.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::Serializer;
use crate::error::Result;

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

// == Memory ==
/// Memory driver settings.
///
/// # Environment Variables
/// - `CACHE_MEMORY_ENABLED` (default: true)
/// - `CACHE_MEMORY_DEFAULT_TTL` - seconds (default: 300)
/// - `CACHE_MEMORY_CLEANUP_INTERVAL` - seconds (default: 600)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub enabled: bool,
    pub default_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl MemoryConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            enabled: env_or("CACHE_MEMORY_ENABLED", default.enabled),
            default_ttl_secs: env_or("CACHE_MEMORY_DEFAULT_TTL", default.default_ttl_secs),
            cleanup_interval_secs: env_or(
                "CACHE_MEMORY_CLEANUP_INTERVAL",
                default.cleanup_interval_secs,
            ),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 300,
            cleanup_interval_secs: 600,
        }
    }
}

// == File ==
/// File driver settings.
///
/// # Environment Variables
/// - `CACHE_FILE_ENABLED` (default: false)
/// - `CACHE_FILE_PATH` (default: `storage/cache`)
/// - `CACHE_FILE_DEFAULT_TTL` - seconds (default: 3600)
/// - `CACHE_FILE_CLEANUP_INTERVAL` - seconds (default: 600)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub default_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl FileConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            enabled: env_or("CACHE_FILE_ENABLED", default.enabled),
            path: env::var("CACHE_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or(default.path),
            default_ttl_secs: env_or("CACHE_FILE_DEFAULT_TTL", default.default_ttl_secs),
            cleanup_interval_secs: env_or(
                "CACHE_FILE_CLEANUP_INTERVAL",
                default.cleanup_interval_secs,
            ),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("storage/cache"),
            default_ttl_secs: 3600,
            cleanup_interval_secs: 600,
        }
    }
}

// == Redis ==
/// Redis driver settings.
///
/// # Environment Variables
/// - `CACHE_REDIS_ENABLED` (default: false)
/// - `CACHE_REDIS_HOST` (default: `127.0.0.1`)
/// - `CACHE_REDIS_PORT` (default: 6379)
/// - `CACHE_REDIS_PASSWORD` (default: empty)
/// - `CACHE_REDIS_DB` (default: 0)
/// - `CACHE_REDIS_PREFIX` (default: `cache:`)
/// - `CACHE_REDIS_DEFAULT_TTL` - seconds (default: 3600)
/// - `CACHE_REDIS_SERIALIZER` - `json`, `binary` or `msgpack` (default: json)
/// - `CACHE_REDIS_TIMEOUT_MS` (default: 5000)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub password: String,
    pub db: i64,
    pub prefix: String,
    pub default_ttl_secs: u64,
    pub serializer: String,
    pub operation_timeout_ms: u64,
}

impl RedisConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            enabled: env_or("CACHE_REDIS_ENABLED", default.enabled),
            host: env_string("CACHE_REDIS_HOST", &default.host),
            port: env_or("CACHE_REDIS_PORT", default.port),
            password: env_string("CACHE_REDIS_PASSWORD", &default.password),
            db: env_or("CACHE_REDIS_DB", default.db),
            prefix: env_string("CACHE_REDIS_PREFIX", &default.prefix),
            default_ttl_secs: env_or("CACHE_REDIS_DEFAULT_TTL", default.default_ttl_secs),
            serializer: env_string("CACHE_REDIS_SERIALIZER", &default.serializer),
            operation_timeout_ms: env_or(
                "CACHE_REDIS_TIMEOUT_MS",
                default.operation_timeout_ms,
            ),
        }
    }

    /// Connection URL in `redis://[:password@]host:port/db` form.
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                self.password, self.host, self.port, self.db
            )
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Resolves the configured serializer name.
    pub fn serializer(&self) -> Result<Serializer> {
        Serializer::from_name(&self.serializer)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: String::new(),
            db: 0,
            prefix: "cache:".to_string(),
            default_ttl_secs: 3600,
            serializer: "json".to_string(),
            operation_timeout_ms: 5000,
        }
    }
}

// == MongoDB ==
/// MongoDB driver settings.
///
/// # Environment Variables
/// - `CACHE_MONGO_ENABLED` (default: false)
/// - `CACHE_MONGO_URI` (default: `mongodb://127.0.0.1:27017`)
/// - `CACHE_MONGO_DATABASE` (default: `cache`)
/// - `CACHE_MONGO_COLLECTION` (default: `cache_entries`)
/// - `CACHE_MONGO_DEFAULT_TTL` - seconds (default: 3600)
/// - `CACHE_MONGO_TIMEOUT_MS` (default: 5000)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    pub enabled: bool,
    pub uri: String,
    pub database: String,
    pub collection: String,
    pub default_ttl_secs: u64,
    pub operation_timeout_ms: u64,
}

impl MongoConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            enabled: env_or("CACHE_MONGO_ENABLED", default.enabled),
            uri: env_string("CACHE_MONGO_URI", &default.uri),
            database: env_string("CACHE_MONGO_DATABASE", &default.database),
            collection: env_string("CACHE_MONGO_COLLECTION", &default.collection),
            default_ttl_secs: env_or("CACHE_MONGO_DEFAULT_TTL", default.default_ttl_secs),
            operation_timeout_ms: env_or(
                "CACHE_MONGO_TIMEOUT_MS",
                default.operation_timeout_ms,
            ),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            uri: "mongodb://127.0.0.1:27017".to_string(),
            database: "cache".to_string(),
            collection: "cache_entries".to_string(),
            default_ttl_secs: 3600,
            operation_timeout_ms: 5000,
        }
    }
}

// == Aggregate ==
/// Settings for every driver.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub memory: MemoryConfig,
    pub file: FileConfig,
    pub redis: RedisConfig,
    pub mongo: MongoConfig,
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            memory: MemoryConfig::from_env(),
            file: FileConfig::from_env(),
            redis: RedisConfig::from_env(),
            mongo: MongoConfig::from_env(),
        }
    }
}

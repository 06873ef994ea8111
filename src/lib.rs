//! ttlcache - Pluggable cache drivers with uniform TTL semantics
//!
//! Memory, file, Redis and MongoDB backends behind one async [`Driver`]
//! trait, with lazy eviction on read and background cleanup where the
//! backend does not expire data natively.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{
    CacheStats, Driver, DriverExt, FileDriver, MemoryDriver, MongoDriver, MultiGet, RedisDriver,
    Serializer, Ttl,
};
pub use config::CacheConfig;
pub use error::{CacheError, Result};

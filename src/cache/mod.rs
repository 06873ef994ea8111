//! Cache Module
//!
//! The [`Driver`] contract and its four backends: memory, file, Redis and
//! MongoDB. Every backend treats an expired entry as absent on read,
//! whether or not it has been physically removed yet.

mod deadline;
mod driver;
mod entry;
mod file;
mod memory;
mod mongo;
mod redis;
mod serializer;
mod stats;


// Re-export public types
pub use self::driver::{Driver, DriverExt, MultiGet};
pub use self::entry::{current_timestamp_ms, CacheEntry, Ttl};
pub use self::file::FileDriver;
pub use self::memory::MemoryDriver;
pub use self::mongo::{MongoDriver, MongoOptions};
pub use self::redis::{RedisDriver, RedisOptions};
pub use self::serializer::Serializer;
pub use self::stats::{CacheStats, Counters};

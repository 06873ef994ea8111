//! Cache Statistics Module
//!
//! Tracks hit/miss counters per driver instance and renders the stats snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::{Map, Value};

// == Counters ==
/// Per-instance hit, miss and corruption counters.
///
/// Counters start at zero and only increase.
#[derive(Debug, Default)]
pub struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    corrupt: AtomicU64,
}

impl Counters {
    /// Creates counters with every value at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Record Hit ==
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    // == Record Miss ==
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the outcome of a lookup.
    pub fn record(&self, hit: bool) {
        if hit {
            self.record_hit();
        } else {
            self.record_miss();
        }
    }

    // == Record Corrupt ==
    /// Counts a payload that could not be decoded and was reported as a miss.
    pub fn record_corrupt(&self) {
        self.corrupt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn corrupt(&self) -> u64 {
        self.corrupt.load(Ordering::Relaxed)
    }

    /// Starts a stats snapshot for a driver of type `driver`.
    pub fn snapshot(&self, driver: &str, count: u64) -> CacheStats {
        CacheStats {
            driver: driver.to_string(),
            count,
            hits: self.hits(),
            misses: self.misses(),
            details: Map::new(),
        }
    }
}

// == Cache Stats ==
/// Point-in-time statistics reported by a driver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Driver type (`memory`, `file`, `redis`, `mongodb`)
    #[serde(rename = "type")]
    pub driver: String,
    /// Number of entries the driver currently holds
    pub count: u64,
    /// Number of successful lookups
    pub hits: u64,
    /// Number of lookups that found nothing (absent, expired or corrupt)
    pub misses: u64,
    /// Backend-specific fields
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl CacheStats {
    /// Adds a backend-specific field.
    pub fn with_detail(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.details.insert(name.to_string(), value.into());
        self
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Renders the flat map view: `type`, `count`, `hits`, `misses` plus details.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = self.details.clone();
        map.insert("type".to_string(), Value::from(self.driver.clone()));
        map.insert("count".to_string(), Value::from(self.count));
        map.insert("hits".to_string(), Value::from(self.hits));
        map.insert("misses".to_string(), Value::from(self.misses));
        map
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_counters_new() {
        let counters = Counters::new();
        assert_eq!(counters.hits(), 0);
        assert_eq!(counters.misses(), 0);
        assert_eq!(counters.corrupt(), 0);
    }

    #[test]
    fn test_counters_record() {
        let counters = Counters::new();
        counters.record(true);
        counters.record(false);
        counters.record(false);
        counters.record_corrupt();

        assert_eq!(counters.hits(), 1);
        assert_eq!(counters.misses(), 2);
        assert_eq!(counters.corrupt(), 1);
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let stats = Counters::new().snapshot("memory", 0);
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let counters = Counters::new();
        counters.record_hit();
        counters.record_miss();
        assert_eq!(counters.snapshot("memory", 1).hit_rate(), 0.5);
    }

    #[test]
    fn test_to_map_contains_required_fields() {
        let counters = Counters::new();
        counters.record_hit();
        let map = counters
            .snapshot("file", 3)
            .with_detail("path", "/tmp/cache")
            .to_map();

        assert_eq!(map["type"], json!("file"));
        assert_eq!(map["count"], json!(3));
        assert_eq!(map["hits"], json!(1));
        assert_eq!(map["misses"], json!(0));
        assert_eq!(map["path"], json!("/tmp/cache"));
    }

    #[test]
    fn test_serialize_flattens_details() {
        let stats = Counters::new()
            .snapshot("redis", 2)
            .with_detail("prefix", "app:");
        let value = serde_json::to_value(&stats).unwrap();

        assert_eq!(value["type"], json!("redis"));
        assert_eq!(value["prefix"], json!("app:"));
    }
}

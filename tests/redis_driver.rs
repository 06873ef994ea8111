//! Redis Driver Integration Tests
//!
//! Note: These tests require a running Redis server. Point `REDIS_URL` at it
//! (default `redis://127.0.0.1:6379`) and run with `cargo test -- --ignored`.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Value};
use ttlcache::cache::RedisOptions;
use ttlcache::{Driver, RedisDriver, Serializer, Ttl};

// == Helper Functions ==

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Each test gets its own prefix so parallel runs don't flush each other.
async fn driver(test: &str, serializer: Serializer) -> RedisDriver {
    let options = RedisOptions {
        prefix: format!("ttlcache-test:{}:", test),
        default_expiration: Duration::from_secs(60),
        serializer,
        operation_timeout: Duration::from_secs(2),
    };
    let cache = RedisDriver::connect(&redis_url(), options).await.unwrap();
    cache.flush().await.unwrap();
    cache
}

async fn raw_connection() -> redis::aio::MultiplexedConnection {
    redis::Client::open(redis_url())
        .unwrap()
        .get_multiplexed_async_connection()
        .await
        .unwrap()
}

fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|k| k.to_string()).collect()
}

// == Tests ==

#[tokio::test]
#[ignore]
async fn test_roundtrip_with_every_serializer() {
    let value = json!({"name": "ada", "tags": ["x", "y"], "age": 36, "ratio": 0.5, "none": null});

    for serializer in [Serializer::Json, Serializer::Binary, Serializer::MsgPack] {
        let cache = driver(&format!("serializer-{}", serializer), serializer).await;

        cache.set("user", value.clone(), Ttl::Default).await.unwrap();
        assert_eq!(cache.get("user").await.unwrap(), Some(value.clone()), "{}", serializer);

        cache.flush().await.unwrap();
        cache.close().await.unwrap();
    }
}

#[tokio::test]
#[ignore]
async fn test_native_expiry() {
    let cache = driver("expiry", Serializer::Json).await;

    cache.set("short", json!(1), Ttl::from_millis(100)).await.unwrap();
    cache.set("pinned", json!(2), Ttl::Forever).await.unwrap();
    assert!(cache.has("short").await.unwrap());

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(cache.get("short").await.unwrap(), None);
    assert_eq!(cache.get("pinned").await.unwrap(), Some(json!(2)));

    let mut conn = raw_connection().await;
    let ttl: i64 = redis::cmd("PTTL")
        .arg("ttlcache-test:expiry:pinned")
        .query_async(&mut conn)
        .await
        .unwrap();
    assert_eq!(ttl, -1);

    cache.flush().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_flush_only_touches_prefixed_keys() {
    let cache = driver("flush", Serializer::Json).await;
    let mut conn = raw_connection().await;

    let _: () = redis::cmd("SET")
        .arg("ttlcache-test-outsider")
        .arg("keep me")
        .query_async(&mut conn)
        .await
        .unwrap();
    cache.set("a", json!(1), Ttl::Default).await.unwrap();
    cache.set("b", json!(2), Ttl::Default).await.unwrap();

    cache.flush().await.unwrap();

    assert_eq!(cache.stats().await.unwrap().count, 0);
    let outsider: Option<String> = redis::cmd("GET")
        .arg("ttlcache-test-outsider")
        .query_async(&mut conn)
        .await
        .unwrap();
    assert_eq!(outsider.as_deref(), Some("keep me"));

    let _: () = redis::cmd("DEL")
        .arg("ttlcache-test-outsider")
        .query_async(&mut conn)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore]
async fn test_batch_operations() {
    let cache = driver("batch", Serializer::MsgPack).await;
    let values: HashMap<String, Value> = [
        ("a".to_string(), json!("x")),
        ("b".to_string(), json!([1, 2])),
    ]
    .into_iter()
    .collect();

    cache.set_multiple(values.clone(), Ttl::Default).await.unwrap();

    let batch = cache.get_multiple(&keys(&["a", "b", "c"])).await;
    assert_eq!(batch.found, values);
    assert_eq!(batch.missing, keys(&["c"]));

    cache.delete_multiple(&keys(&["a", "b"])).await.unwrap();
    let after = cache.get_multiple(&keys(&["a", "b"])).await;
    assert!(after.found.is_empty());
    assert_eq!(after.missing, keys(&["a", "b"]));

    cache.flush().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_delete_idempotent_and_stats() {
    let cache = driver("stats", Serializer::Json).await;

    cache.delete("never-set").await.unwrap();
    cache.set("k", json!(true), Ttl::Default).await.unwrap();
    cache.get("k").await.unwrap();
    cache.get("missing").await.unwrap();

    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.driver, "redis");
    assert_eq!(stats.count, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.details.get("prefix"), Some(&json!("ttlcache-test:stats:")));

    cache.flush().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_operations_fail_after_close() {
    let cache = driver("closed", Serializer::Json).await;

    cache.close().await.unwrap();
    cache.close().await.unwrap();

    assert!(matches!(
        cache.get("k").await,
        Err(ttlcache::CacheError::Closed("redis"))
    ));
}

//! MongoDB Driver Integration Tests
//!
//! Note: These tests require a running MongoDB server. Point `MONGODB_URI` at
//! it (default `mongodb://127.0.0.1:27017`) and run with `cargo test -- --ignored`.

use std::collections::HashMap;
use std::time::Duration;

use mongodb::bson::{doc, DateTime, Document};
use mongodb::Client;
use serde_json::{json, Value};
use ttlcache::cache::{current_timestamp_ms, MongoOptions};
use ttlcache::{Driver, MongoDriver, Ttl};

// == Helper Functions ==

fn mongo_uri() -> String {
    std::env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://127.0.0.1:27017".to_string())
}

fn options(test: &str) -> MongoOptions {
    MongoOptions {
        database: "ttlcache_test".to_string(),
        collection: format!("entries_{}", test),
        default_expiration: Duration::from_secs(60),
        operation_timeout: Duration::from_secs(5),
    }
}

/// Each test uses its own collection so parallel runs stay isolated.
async fn driver(test: &str) -> MongoDriver {
    let cache = MongoDriver::connect(&mongo_uri(), options(test)).await.unwrap();
    cache.flush().await.unwrap();
    cache
}

fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|k| k.to_string()).collect()
}

// == Tests ==

#[tokio::test]
#[ignore]
async fn test_set_get_and_overwrite() {
    let cache = driver("basic").await;

    cache.set("user", json!({"name": "ada", "tags": ["x"]}), Ttl::Default).await.unwrap();
    cache.set("user", json!({"name": "grace"}), Ttl::Forever).await.unwrap();

    assert_eq!(cache.get("user").await.unwrap(), Some(json!({"name": "grace"})));
    assert!(cache.has("user").await.unwrap());
    assert_eq!(cache.stats().await.unwrap().count, 1);

    cache.flush().await.unwrap();
    cache.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_expired_document_not_yet_deleted_is_a_miss() {
    let cache = driver("expired").await;
    let opts = options("expired");

    // The TTL monitor runs about once a minute, so this document lingers
    let raw = Client::with_uri_str(mongo_uri())
        .await
        .unwrap()
        .database(&opts.database)
        .collection::<Document>(&opts.collection);
    let past = DateTime::from_millis(current_timestamp_ms() as i64 - 10_000);
    raw.insert_one(doc! {
        "_id": "stale",
        "value": "old",
        "expiration": past,
        "created_at": past,
    })
    .await
    .unwrap();

    assert_eq!(cache.get("stale").await.unwrap(), None);
    assert!(!cache.has("stale").await.unwrap());
    let batch = cache.get_multiple(&keys(&["stale"])).await;
    assert_eq!(batch.missing, keys(&["stale"]));
    assert_eq!(cache.stats().await.unwrap().count, 0);

    cache.flush().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_short_ttl_expires_on_read() {
    let cache = driver("short").await;

    cache.set("k", json!(1), Ttl::from_millis(100)).await.unwrap();
    assert!(cache.has("k").await.unwrap());

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(cache.get("k").await.unwrap(), None);
    cache.flush().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_batch_operations() {
    let cache = driver("batch").await;
    let values: HashMap<String, Value> = [
        ("a".to_string(), json!("x")),
        ("b".to_string(), json!([1, 2, 3])),
        ("c".to_string(), json!(null)),
    ]
    .into_iter()
    .collect();

    cache.set_multiple(values.clone(), Ttl::Default).await.unwrap();

    let batch = cache.get_multiple(&keys(&["a", "b", "c", "d"])).await;
    assert_eq!(batch.found, values);
    assert_eq!(batch.missing, keys(&["d"]));

    cache.delete_multiple(&keys(&["a", "b"])).await.unwrap();
    cache.delete("never-set").await.unwrap();
    assert_eq!(cache.stats().await.unwrap().count, 1);

    cache.flush().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_borrowed_client_survives_close() {
    let client = Client::with_uri_str(mongo_uri()).await.unwrap();
    let cache = MongoDriver::with_client(client.clone(), options("borrowed"))
        .await
        .unwrap();

    cache.set("k", json!(1), Ttl::Default).await.unwrap();
    cache.close().await.unwrap();
    cache.close().await.unwrap();

    assert!(matches!(
        cache.get("k").await,
        Err(ttlcache::CacheError::Closed("mongodb"))
    ));
    client
        .database("ttlcache_test")
        .run_command(doc! { "ping": 1 })
        .await
        .unwrap();

    client
        .database("ttlcache_test")
        .collection::<Document>("entries_borrowed")
        .delete_many(doc! {})
        .await
        .unwrap();
}

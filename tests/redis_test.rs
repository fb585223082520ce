//! Tracker against a live Redis.

use std::sync::Arc;

use powercap_rs::model::{RunId, TaskStatus};
use powercap_rs::store::{RedisStore, StateStore};
use powercap_rs::tracker::StateTracker;
use serde_json::json;

/// Requires REDIS_URL env var or defaults to local dev.
async fn test_store() -> RedisStore {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/15".to_string());
    RedisStore::connect(&url).await.unwrap()
}

#[tokio::test]
#[ignore] // Requires running Redis
async fn ping_and_hash_ops() {
    let store = test_store().await;
    store.ping().await.unwrap();

    let key = format!("powercap-test:{}", RunId::new());
    store
        .hset(&key, &[("a", "1".to_string()), ("b", "2".to_string())])
        .await
        .unwrap();
    assert_eq!(store.hget(&key, "a").await.unwrap().as_deref(), Some("1"));
    assert_eq!(store.hgetall(&key).await.unwrap().len(), 2);

    store.hdel(&key, &["a"]).await.unwrap();
    assert!(store.hget(&key, "a").await.unwrap().is_none());

    assert_eq!(store.del(&[key.as_str()]).await.unwrap(), 1);
    assert!(!store.exists(&key).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires running Redis
async fn tracker_lifecycle_over_redis() {
    let tracker = StateTracker::new(Arc::new(test_store().await)).with_namespace("powercap-test");
    let run = RunId::new();

    tracker
        .update(&run, TaskStatus::Started, None, None)
        .await
        .unwrap();
    tracker
        .update(&run, TaskStatus::Success, Some(&json!({"n": 3})), None)
        .await
        .unwrap();

    let record = tracker.get(&run).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Success);
    assert_eq!(record.result.as_deref(), Some(r#"{"n":3}"#));
    assert!(record.runtime.is_some());

    tracker.clean(&run).await.unwrap();
    assert!(tracker.get(&run).await.unwrap().is_none());
}

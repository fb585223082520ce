//! Integration tests for the run-state tracker over the in-memory store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use powercap_rs::error::Error;
use powercap_rs::model::{RunId, TaskStatus};
use powercap_rs::store::{MemoryStore, StateStore};
use powercap_rs::tracker::StateTracker;
use serde_json::json;

fn tracker() -> (Arc<MemoryStore>, StateTracker) {
    let store = Arc::new(MemoryStore::new());
    let tracker = StateTracker::new(store.clone());
    (store, tracker)
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_run_reads_as_none() {
    let (_, tracker) = tracker();
    let record = tracker.get(&RunId::from("missing")).await.unwrap();
    assert!(record.is_none());
}

#[tokio::test]
async fn pending_write_creates_record() {
    let (_, tracker) = tracker();
    let run = RunId::from("r1");

    tracker
        .update(&run, TaskStatus::Pending, None, None)
        .await
        .unwrap();

    let record = tracker.get(&run).await.unwrap().expect("record exists");
    assert_eq!(record.status, TaskStatus::Pending);
    assert!(record.start_time.is_none());
    assert!(record.end_time.is_none());
    assert!(record.runtime.is_none());
    assert!(record.updated_at.is_some());
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn success_sets_end_time_runtime_and_result() {
    let (_, tracker) = tracker();
    let run = RunId::from("r1");

    tracker
        .update(&run, TaskStatus::Started, None, None)
        .await
        .unwrap();
    let started = tracker.get(&run).await.unwrap().unwrap();
    assert_eq!(started.status, TaskStatus::Started);
    assert!(started.start_time.is_some());
    assert!(started.end_time.is_none());
    assert!(started.runtime.is_none());

    tracker
        .update(&run, TaskStatus::Success, Some(&json!({"ok": true})), None)
        .await
        .unwrap();
    let done = tracker.get(&run).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Success);
    assert_eq!(done.result.as_deref(), Some(r#"{"ok":true}"#));
    let (start, end) = (done.start_time.unwrap(), done.end_time.unwrap());
    assert!(end >= start);
    let runtime = done.runtime.expect("runtime once both timestamps exist");
    assert!(runtime >= 0.0);
}

#[tokio::test]
async fn runtime_matches_timestamps_and_measured_elapsed() {
    let (_, tracker) = tracker();
    let run = RunId::from("r1");

    let before = Instant::now();
    tracker
        .update(&run, TaskStatus::Started, None, None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    tracker
        .update(&run, TaskStatus::Success, Some(&json!(42)), None)
        .await
        .unwrap();
    let measured = before.elapsed().as_secs_f64();

    let record = tracker.get(&run).await.unwrap().unwrap();
    let runtime = record.runtime.unwrap();
    let stamped = (record.end_time.unwrap() - record.start_time.unwrap())
        .num_microseconds()
        .unwrap() as f64
        / 1e6;

    assert!((runtime - stamped).abs() < 1e-5, "{runtime} vs {stamped}");
    assert!(runtime >= 0.02, "{runtime}");
    assert!(runtime <= measured + 1e-3, "{runtime} > {measured}");
}

#[tokio::test]
async fn string_results_are_stored_verbatim() {
    let (_, tracker) = tracker();
    let run = RunId::from("r1");
    tracker
        .update(&run, TaskStatus::Started, None, None)
        .await
        .unwrap();
    tracker
        .update(&run, TaskStatus::Success, Some(&json!("done")), None)
        .await
        .unwrap();

    let record = tracker.get(&run).await.unwrap().unwrap();
    assert_eq!(record.result.as_deref(), Some("done"));
}

#[tokio::test]
async fn failure_records_error_and_end_time() {
    let (_, tracker) = tracker();
    let run = RunId::from("r1");

    tracker
        .update(&run, TaskStatus::Started, None, None)
        .await
        .unwrap();
    tracker
        .update(&run, TaskStatus::Failure, None, Some("boom"))
        .await
        .unwrap();

    let record = tracker.get(&run).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Failure);
    assert_eq!(record.error.as_deref(), Some("boom"));
    assert!(record.end_time.is_some());
    assert!(record.runtime.is_some());
    assert!(record.result.is_none());
}

#[tokio::test]
async fn terminal_status_without_start_has_no_runtime() {
    let (_, tracker) = tracker();
    let run = RunId::from("r1");

    tracker
        .update(&run, TaskStatus::Failure, None, Some("never started"))
        .await
        .unwrap();

    let record = tracker.get(&run).await.unwrap().unwrap();
    assert!(record.end_time.is_some());
    assert!(record.start_time.is_none());
    assert!(record.runtime.is_none());
}

#[tokio::test]
async fn retry_does_not_end_the_run() {
    let (_, tracker) = tracker();
    let run = RunId::from("r1");

    tracker
        .update(&run, TaskStatus::Started, None, None)
        .await
        .unwrap();
    tracker
        .update(&run, TaskStatus::Retry, None, Some("transient failure: timeout"))
        .await
        .unwrap();

    let record = tracker.get(&run).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Retry);
    assert_eq!(record.error.as_deref(), Some("transient failure: timeout"));
    assert!(record.end_time.is_none());
    assert!(record.runtime.is_none());
}

#[tokio::test]
async fn restart_keeps_first_start_and_clears_previous_end() {
    let (_, tracker) = tracker();
    let run = RunId::from("r1");

    tracker
        .update(&run, TaskStatus::Started, None, None)
        .await
        .unwrap();
    tracker
        .update(&run, TaskStatus::Failure, None, Some("first"))
        .await
        .unwrap();
    let first = tracker.get(&run).await.unwrap().unwrap();

    tracker
        .update(&run, TaskStatus::Started, None, None)
        .await
        .unwrap();
    let second = tracker.get(&run).await.unwrap().unwrap();

    assert_eq!(second.first_start_time, first.first_start_time);
    assert!(second.start_time >= first.start_time);
    assert!(second.end_time.is_none());
    assert!(second.runtime.is_none());
}

#[tokio::test]
async fn repeated_update_is_idempotent_upsert() {
    let (store, tracker) = tracker();
    let run = RunId::from("r1");

    for _ in 0..3 {
        tracker
            .update(&run, TaskStatus::Pending, None, None)
            .await
            .unwrap();
    }

    assert_eq!(store.len(), 2);
    let record = tracker.get(&run).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Pending);
}

#[tokio::test]
async fn repeated_success_keeps_status_and_result() {
    let (store, tracker) = tracker();
    let run = RunId::from("r1");
    let result = json!({"rows": [1, 2, 3]});

    tracker
        .update(&run, TaskStatus::Started, None, None)
        .await
        .unwrap();
    tracker
        .update(&run, TaskStatus::Success, Some(&result), None)
        .await
        .unwrap();
    let first = tracker.get(&run).await.unwrap().unwrap();

    tracker
        .update(&run, TaskStatus::Success, Some(&result), None)
        .await
        .unwrap();
    let second = tracker.get(&run).await.unwrap().unwrap();

    assert_eq!(second.status, TaskStatus::Success);
    assert_eq!(second.result, first.result);
    assert_eq!(second.result.as_deref(), Some(r#"{"rows":[1,2,3]}"#));
    assert_eq!(second.start_time, first.start_time);
    assert!(second.error.is_none());
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn any_status_may_overwrite_any_other() {
    let (_, tracker) = tracker();
    let run = RunId::from("r1");

    tracker
        .update(&run, TaskStatus::Success, Some(&json!(1)), None)
        .await
        .unwrap();
    tracker
        .update(&run, TaskStatus::Pending, None, None)
        .await
        .unwrap();

    let record = tracker.get(&run).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Pending);
}

// ---------------------------------------------------------------------------
// Cleanup, namespacing, store failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clean_removes_everything() {
    let (store, tracker) = tracker();
    let run = RunId::from("r1");
    tracker
        .update(&run, TaskStatus::Started, None, None)
        .await
        .unwrap();

    tracker.clean(&run).await.unwrap();

    assert!(tracker.get(&run).await.unwrap().is_none());
    assert!(store.is_empty());
    // Cleaning again is harmless.
    tracker.clean(&run).await.unwrap();
}

#[tokio::test]
async fn runs_are_isolated_by_id() {
    let (_, tracker) = tracker();
    let a = RunId::from("a");
    let b = RunId::from("b");
    tracker
        .update(&a, TaskStatus::Started, None, None)
        .await
        .unwrap();
    tracker
        .update(&b, TaskStatus::Failure, None, Some("x"))
        .await
        .unwrap();

    tracker.clean(&b).await.unwrap();

    assert_eq!(
        tracker.get(&a).await.unwrap().unwrap().status,
        TaskStatus::Started
    );
    assert!(tracker.get(&b).await.unwrap().is_none());
}

#[tokio::test]
async fn namespace_prefixes_keys() {
    let store = Arc::new(MemoryStore::new());
    let tracker = StateTracker::new(store.clone()).with_namespace("tenant");
    let run = RunId::from("r1");

    tracker
        .update(&run, TaskStatus::Pending, None, None)
        .await
        .unwrap();

    assert!(store.exists("tenant:task:r1").await.unwrap());
    assert!(store.exists("tenant:task_meta:r1").await.unwrap());
    assert!(!store.exists("task:r1").await.unwrap());
}

#[tokio::test]
async fn unavailable_store_surfaces_error() {
    let (store, tracker) = tracker();
    store.set_available(false);

    let err = tracker
        .update(&RunId::from("r1"), TaskStatus::Started, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Store(_)));

    let err = tracker.get(&RunId::from("r1")).await.unwrap_err();
    assert!(matches!(err, Error::Store(_)));
}

#[tokio::test]
async fn corrupt_status_is_reported() {
    let (store, tracker) = tracker();
    store
        .hset("task:r1", &[("status", "EXPLODED".to_string())])
        .await
        .unwrap();

    let err = tracker.get(&RunId::from("r1")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRecord { .. }));
}

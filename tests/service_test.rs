//! Integration tests for the task service over in-memory store and broker.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use powercap_rs::broker::{Broker, InMemoryBroker, Revocation};
use powercap_rs::error::Error;
use powercap_rs::model::{RunId, Submission, TaskStatus};
use powercap_rs::service::{ComponentHealth, HealthReport, TaskService, TaskStats};
use powercap_rs::store::MemoryStore;
use powercap_rs::tasks::builtin_registry;
use powercap_rs::tracker::StateTracker;
use serde_json::json;

struct Fixture {
    store: Arc<MemoryStore>,
    broker: Arc<InMemoryBroker>,
    service: TaskService,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let broker = Arc::new(InMemoryBroker::new());
    let service = TaskService::new(
        Arc::new(builtin_registry().unwrap()),
        broker.clone(),
        StateTracker::new(store.clone()),
    );
    Fixture {
        store,
        broker,
        service,
    }
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_enqueues_and_records_pending() {
    let f = fixture();

    let receipt = f
        .service
        .submit(
            Submission::new("extract_task")
                .param("source", json!("db"))
                .queue("etl"),
        )
        .await
        .unwrap();

    assert_eq!(receipt.status, TaskStatus::Pending);
    assert_eq!(receipt.task, "extract_task");
    assert_eq!(receipt.queue, "etl");
    assert_eq!(receipt.params["source"], json!("db"));

    let queued = f.broker.queued("etl").unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].run_id, receipt.run_id);
    assert_eq!(queued[0].attempt, 1);

    let record = f.service.status(&receipt.run_id).await.unwrap();
    assert_eq!(record.status, TaskStatus::Pending);
}

#[tokio::test]
async fn submit_honours_caller_run_id() {
    let f = fixture();
    let receipt = f
        .service
        .submit(Submission::new("data_process_task").run_id("my-run"))
        .await
        .unwrap();
    assert_eq!(receipt.run_id.as_str(), "my-run");
}

#[tokio::test]
async fn generated_run_ids_are_unique() {
    let f = fixture();
    let a = f
        .service
        .submit(Submission::new("health_check_task"))
        .await
        .unwrap();
    let b = f
        .service
        .submit(Submission::new("health_check_task"))
        .await
        .unwrap();
    assert_ne!(a.run_id, b.run_id);
}

#[tokio::test]
async fn unknown_task_is_rejected_before_enqueue() {
    let f = fixture();

    let err = f
        .service
        .submit(Submission::new("no_such_task"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnknownTask(ref n) if n == "no_such_task"));
    assert!(f.broker.queued("default").unwrap().is_empty());
    assert!(f.store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn countdown_delays_visibility() {
    let f = fixture();
    f.service
        .submit(Submission::new("health_check_task").countdown(30))
        .await
        .unwrap();

    assert!(f.broker.fetch("default").await.unwrap().is_none());
    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(f.broker.fetch("default").await.unwrap().is_some());
}

#[test]
fn eta_takes_precedence_over_countdown() {
    let now = Utc::now();
    let submission = Submission::new("t")
        .countdown(5)
        .eta(now + chrono::TimeDelta::seconds(120));
    assert_eq!(submission.delay_from(now), Duration::from_secs(120));

    let past = Submission::new("t").eta(now - chrono::TimeDelta::seconds(10));
    assert_eq!(past.delay_from(now), Duration::ZERO);
}

// ---------------------------------------------------------------------------
// Status and cancel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_of_unknown_run_is_not_found() {
    let f = fixture();
    let err = f.service.status(&RunId::from("ghost")).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn cancel_revokes_and_cleans() {
    let f = fixture();
    let receipt = f
        .service
        .submit(Submission::new("health_check_task"))
        .await
        .unwrap();

    f.service.cancel(&receipt.run_id).await.unwrap();

    assert!(matches!(
        f.service.status(&receipt.run_id).await,
        Err(Error::NotFound(_))
    ));
    assert_eq!(
        f.broker.revocation(&receipt.run_id).await.unwrap(),
        Some(Revocation { terminate: true })
    );
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lists_registered_and_scheduled_tasks() {
    let f = fixture();
    assert_eq!(f.service.registered_tasks().len(), 11);
    assert_eq!(f.service.scheduled_tasks().len(), 4);
}

#[tokio::test]
async fn health_reflects_store_availability() {
    let f = fixture();
    let report = f.service.health().await;
    assert!(report.is_healthy());

    f.store.set_available(false);
    let report = f.service.health().await;
    assert!(!report.is_healthy());
    assert!(matches!(report.store, ComponentHealth::Error { .. }));
    assert_eq!(report.broker, ComponentHealth::Ok);
}

#[tokio::test]
async fn health_reports_broker_when_store_cannot_connect() {
    let f = fixture();
    let broker: Arc<dyn Broker> = f.broker.clone();

    let report = HealthReport::check(
        Err(Error::Store("connection refused".to_string())),
        Ok(broker),
    )
    .await;

    assert!(!report.is_healthy());
    assert_eq!(
        report.store,
        ComponentHealth::Error {
            message: Error::Store("connection refused".to_string()).to_string()
        }
    );
    assert_eq!(report.broker, ComponentHealth::Ok);
}

#[tokio::test]
async fn stats_count_registered_scheduled_and_active() {
    let f = fixture();
    f.service
        .submit(Submission::new("health_check_task"))
        .await
        .unwrap();
    f.service
        .submit(Submission::new("health_check_task"))
        .await
        .unwrap();
    assert_eq!(f.service.stats().await.unwrap().active_tasks, 0);

    let _delivery = f.broker.fetch("default").await.unwrap().unwrap();

    assert_eq!(
        f.service.stats().await.unwrap(),
        TaskStats {
            registered_tasks: 11,
            scheduled_tasks: 4,
            active_tasks: 1,
        }
    );
}

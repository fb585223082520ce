//! Task service: the caller-facing surface over registry, broker and tracker.
//!
//! Submission validates the task name, writes the initial PENDING record and
//! enqueues an envelope. Status reads go straight to the tracker.

use std::sync::Arc;

use chrono::Utc;
use opentelemetry::KeyValue;
use serde::Serialize;

use crate::broker::Broker;
use crate::error::{Error, Result};
use crate::model::{Envelope, RunId, RunRecord, SubmitReceipt, Submission, TaskStatus};
use crate::registry::{ScheduledTaskInfo, TaskRegistry};
use crate::store::StateStore;
use crate::telemetry::metrics;
use crate::tracker::StateTracker;

/// Reachability of each dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub store: ComponentHealth,
    pub broker: ComponentHealth,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ComponentHealth {
    Ok,
    Error { message: String },
}

impl ComponentHealth {
    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => ComponentHealth::Ok,
            Err(e) => ComponentHealth::Error {
                message: e.to_string(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ComponentHealth::Ok)
    }
}

impl HealthReport {
    /// Ping whichever components could be opened. A component that failed
    /// to open is reported with its connection error; the other is still
    /// checked.
    pub async fn check(
        store: Result<Arc<dyn StateStore>>,
        broker: Result<Arc<dyn Broker>>,
    ) -> Self {
        let store = match store {
            Ok(store) => store.ping().await,
            Err(e) => Err(e),
        };
        let broker = match broker {
            Ok(broker) => broker.ping().await,
            Err(e) => Err(e),
        };
        Self {
            store: ComponentHealth::from_result(store),
            broker: ComponentHealth::from_result(broker),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.store.is_ok() && self.broker.is_ok()
    }
}

/// Counts for operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub registered_tasks: usize,
    pub scheduled_tasks: usize,
    /// Deliveries held by workers and not yet acknowledged.
    pub active_tasks: u64,
}

#[derive(Clone)]
pub struct TaskService {
    registry: Arc<TaskRegistry>,
    broker: Arc<dyn Broker>,
    tracker: StateTracker,
}

impl TaskService {
    pub fn new(registry: Arc<TaskRegistry>, broker: Arc<dyn Broker>, tracker: StateTracker) -> Self {
        Self {
            registry,
            broker,
            tracker,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    /// Enqueue a run. Unknown task names are rejected before the broker is
    /// touched.
    pub async fn submit(&self, submission: Submission) -> Result<SubmitReceipt> {
        if !self.registry.contains(submission.task()) {
            return Err(Error::UnknownTask(submission.task.clone()));
        }

        let now = Utc::now();
        let delay = submission.delay_from(now);
        let envelope = Envelope {
            run_id: submission.run_id.clone().unwrap_or_default(),
            task: submission.task,
            params: submission.params,
            queue: submission.queue,
            attempt: 1,
        };

        // PENDING must land before any worker can see the envelope.
        self.tracker
            .update(&envelope.run_id, TaskStatus::Pending, None, None)
            .await?;
        if let Err(e) = self.broker.publish(&envelope, delay).await {
            if let Err(clean_err) = self.tracker.clean(&envelope.run_id).await {
                tracing::warn!(run_id = %envelope.run_id, "failed to discard pending record: {clean_err}");
            }
            return Err(e);
        }

        metrics::runs_submitted().add(
            1,
            &[
                KeyValue::new("task", envelope.task.clone()),
                KeyValue::new("queue", envelope.queue.clone()),
            ],
        );
        tracing::info!(
            run_id = %envelope.run_id,
            task = %envelope.task,
            queue = %envelope.queue,
            delay_secs = delay.as_secs(),
            "run submitted"
        );

        Ok(SubmitReceipt {
            run_id: envelope.run_id,
            task: envelope.task,
            params: envelope.params,
            queue: envelope.queue,
            status: TaskStatus::Pending,
            submitted_at: now,
        })
    }

    /// The stored record of a run.
    pub async fn status(&self, run_id: &RunId) -> Result<RunRecord> {
        self.tracker
            .get(run_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("run '{run_id}'")))
    }

    /// Revoke a run (terminating it if in flight) and discard its state.
    pub async fn cancel(&self, run_id: &RunId) -> Result<()> {
        self.broker.revoke(run_id, true).await?;
        self.tracker.clean(run_id).await?;
        tracing::info!(run_id = %run_id, "run cancelled");
        Ok(())
    }

    pub fn scheduled_tasks(&self) -> Vec<ScheduledTaskInfo> {
        self.registry.scheduled()
    }

    pub fn registered_tasks(&self) -> Vec<String> {
        self.registry.names().map(str::to_string).collect()
    }

    pub async fn health(&self) -> HealthReport {
        HealthReport::check(Ok(self.tracker.store().clone()), Ok(self.broker.clone())).await
    }

    pub async fn stats(&self) -> Result<TaskStats> {
        Ok(TaskStats {
            registered_tasks: self.registry.len(),
            scheduled_tasks: self.registry.scheduled().len(),
            active_tasks: self.broker.active().await?,
        })
    }
}

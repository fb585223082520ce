//! Lifecycle hooks invoked by the harness around every unit execution.

use async_trait::async_trait;
use serde_json::Value;

use super::{TaskArgs, TaskError};
use crate::error::Result;
use crate::model::{RunId, TaskStatus};
use crate::tracker::StateTracker;

/// Callbacks at the defined points of a run.
///
/// Order on success: `before_start`, `on_success`, `after_return`.
/// On failure: `before_start`, `on_failure` (or `on_retry`), `after_return`.
/// An `Err` from any hook aborts the invocation.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    async fn before_start(&self, run_id: &RunId, args: &TaskArgs) -> Result<()>;

    async fn on_success(&self, run_id: &RunId, result: &Value) -> Result<()>;

    async fn on_failure(&self, run_id: &RunId, error: &TaskError) -> Result<()>;

    async fn on_retry(&self, run_id: &RunId, error: &TaskError) -> Result<()>;

    /// Runs after every attempt regardless of outcome. Reserved for cleanup.
    async fn after_return(&self, _run_id: &RunId, _status: TaskStatus) -> Result<()> {
        Ok(())
    }
}

/// Hooks that write every transition through the state tracker.
#[derive(Clone)]
pub struct TrackingHooks {
    tracker: StateTracker,
}

impl TrackingHooks {
    pub fn new(tracker: StateTracker) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl LifecycleHooks for TrackingHooks {
    async fn before_start(&self, run_id: &RunId, _args: &TaskArgs) -> Result<()> {
        self.tracker
            .update(run_id, TaskStatus::Started, None, None)
            .await
    }

    async fn on_success(&self, run_id: &RunId, result: &Value) -> Result<()> {
        self.tracker
            .update(run_id, TaskStatus::Success, Some(result), None)
            .await
    }

    async fn on_failure(&self, run_id: &RunId, error: &TaskError) -> Result<()> {
        self.tracker
            .update(run_id, TaskStatus::Failure, None, Some(&error.to_string()))
            .await
    }

    async fn on_retry(&self, run_id: &RunId, error: &TaskError) -> Result<()> {
        self.tracker
            .update(run_id, TaskStatus::Retry, None, Some(&error.to_string()))
            .await
    }
}

//! Execution harness: runs one attempt of a unit between its lifecycle hooks.
//!
//! The harness never re-runs a unit itself. When the retry policy chooses
//! to retry it reports [`Attempt::Retry`] and the caller re-submits the run
//! with the returned delay.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use serde_json::Value;
use tracing::{info, warn};

use super::hooks::LifecycleHooks;
use super::{TaskArgs, TaskError, TaskUnit};
use crate::error::Result;
use crate::model::{RunId, TaskStatus};
use crate::telemetry::metrics;

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    pub fn should_retry(&self, attempt: u32, error: &TaskError) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }
}

/// How one attempt ended.
#[derive(Debug)]
pub enum Attempt {
    Succeeded(Value),
    Failed(TaskError),
    /// Run again after `delay`.
    Retry { error: TaskError, delay: Duration },
}

impl Attempt {
    pub fn status(&self) -> TaskStatus {
        match self {
            Attempt::Succeeded(_) => TaskStatus::Success,
            Attempt::Failed(_) => TaskStatus::Failure,
            Attempt::Retry { .. } => TaskStatus::Retry,
        }
    }
}

/// Wraps unit execution with lifecycle hooks and a retry decision.
#[derive(Clone)]
pub struct Harness {
    hooks: Arc<dyn LifecycleHooks>,
    retry: RetryPolicy,
}

impl Harness {
    pub fn new(hooks: Arc<dyn LifecycleHooks>, retry: RetryPolicy) -> Self {
        Self { hooks, retry }
    }

    /// Run attempt number `attempt` (1-based) of `unit` for `run_id`.
    ///
    /// Unit failures are converted into [`Attempt::Failed`] or
    /// [`Attempt::Retry`]. Hook failures are returned as `Err`.
    pub async fn run(
        &self,
        run_id: &RunId,
        unit: &dyn TaskUnit,
        args: &TaskArgs,
        attempt: u32,
    ) -> Result<Attempt> {
        self.hooks.before_start(run_id, args).await?;

        let started = Instant::now();
        let outcome = unit.execute(args).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let finished = match outcome {
            Ok(value) => {
                info!(run_id = %run_id, task = unit.name(), elapsed_ms, "task succeeded");
                self.hooks.on_success(run_id, &value).await?;
                Attempt::Succeeded(value)
            }
            Err(error) if self.retry.should_retry(attempt, &error) => {
                warn!(
                    run_id = %run_id,
                    task = unit.name(),
                    attempt,
                    max_attempts = self.retry.max_attempts,
                    %error,
                    "task failed, retrying"
                );
                self.hooks.on_retry(run_id, &error).await?;
                Attempt::Retry {
                    error,
                    delay: self.retry.delay,
                }
            }
            Err(error) => {
                warn!(run_id = %run_id, task = unit.name(), attempt, %error, "task failed");
                self.hooks.on_failure(run_id, &error).await?;
                Attempt::Failed(error)
            }
        };

        metrics::run_duration_ms().record(
            elapsed_ms as f64,
            &[
                KeyValue::new("task", unit.name().to_string()),
                KeyValue::new("status", finished.status().as_str()),
            ],
        );

        self.hooks.after_return(run_id, finished.status()).await?;
        Ok(finished)
    }
}

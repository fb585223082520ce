//! Submissions, broker envelopes, and submission receipts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::{RunId, TaskStatus};
use super::schedule::DEFAULT_QUEUE;
use crate::task::TaskArgs;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Request to run a named task asynchronously. The service's public API for
/// submitting work.
#[derive(Debug, Clone)]
pub struct Submission {
    pub(crate) task: String,
    pub(crate) params: TaskArgs,
    pub(crate) queue: String,
    pub(crate) countdown: Option<u64>,
    pub(crate) eta: Option<DateTime<Utc>>,
    pub(crate) run_id: Option<RunId>,
}

impl Submission {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            params: TaskArgs::new(),
            queue: DEFAULT_QUEUE.to_string(),
            countdown: None,
            eta: None,
            run_id: None,
        }
    }

    pub fn params(mut self, params: TaskArgs) -> Self {
        self.params = params;
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Delay execution by `secs` seconds.
    pub fn countdown(mut self, secs: u64) -> Self {
        self.countdown = Some(secs);
        self
    }

    /// Execute no earlier than `eta`. Takes precedence over `countdown`.
    pub fn eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    /// Use a caller-assigned run id instead of generating one.
    pub fn run_id(mut self, run_id: impl Into<RunId>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Delay before the run becomes visible to workers, relative to `now`.
    pub fn delay_from(&self, now: DateTime<Utc>) -> std::time::Duration {
        match (self.eta, self.countdown) {
            (Some(eta), _) => (eta - now).to_std().unwrap_or_default(),
            (None, Some(secs)) => std::time::Duration::from_secs(secs),
            (None, None) => std::time::Duration::ZERO,
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// What travels through the broker: everything a worker needs to run a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub run_id: RunId,
    pub task: String,
    #[serde(default)]
    pub params: TaskArgs,
    pub queue: String,
    /// 1-based attempt number.
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

fn first_attempt() -> u32 {
    1
}

impl Envelope {
    /// The envelope for the next attempt of the same run.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// What the submitter gets back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub run_id: RunId,
    pub task: String,
    pub params: TaskArgs,
    pub queue: String,
    pub status: TaskStatus,
    pub submitted_at: DateTime<Utc>,
}

//! Run identity, lifecycle status, and the persisted run record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Run Id
// ---------------------------------------------------------------------------

/// Identifier of one task invocation.
///
/// Assigned by whoever submits the run. Generated ids are UUIDv4 text, but
/// any caller-supplied string is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a run.
///
/// The tracker accepts any status after any other; the usual path is
/// PENDING → STARTED → SUCCESS | FAILURE | RETRY → STARTED → ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Submitted, not yet picked up by a worker.
    #[default]
    Pending,
    /// A worker is executing the unit.
    Started,
    /// Finished with a result.
    Success,
    /// Finished with an error.
    Failure,
    /// Failed transiently; another attempt is scheduled.
    Retry,
    /// Cancelled before or during execution.
    Revoked,
}

impl TaskStatus {
    /// Does this status close the run (stamps `end_time` and `runtime`)?
    pub fn completes_run(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Started => "STARTED",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failure => "FAILURE",
            TaskStatus::Retry => "RETRY",
            TaskStatus::Revoked => "REVOKED",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(TaskStatus::Pending),
            "STARTED" => Ok(TaskStatus::Started),
            "SUCCESS" => Ok(TaskStatus::Success),
            "FAILURE" => Ok(TaskStatus::Failure),
            "RETRY" => Ok(TaskStatus::Retry),
            "REVOKED" => Ok(TaskStatus::Revoked),
            other => Err(crate::error::Error::Other(format!(
                "unknown task status: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Run Record
// ---------------------------------------------------------------------------

/// Persisted lifecycle state of one run, as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub status: TaskStatus,

    /// Textual form of the unit's result.
    pub result: Option<String>,

    /// Error message of the last failure or retry.
    pub error: Option<String>,

    /// Most recent STARTED stamp. Runtime is measured from here.
    pub start_time: Option<DateTime<Utc>>,

    /// First STARTED stamp, kept across retries.
    pub first_start_time: Option<DateTime<Utc>>,

    pub end_time: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,

    /// Seconds between `start_time` and `end_time`. Present only when both are.
    pub runtime: Option<f64>,
}


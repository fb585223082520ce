//! Task units: the atomic executable contract and its composites.
//!
//! A [`TaskUnit`] is a named async operation over a JSON argument object.
//! Units never persist anything themselves; lifecycle reporting is done by
//! the [`harness`] through [`hooks`].

pub mod composite;
pub mod harness;
pub mod hooks;
pub mod workflow;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::model::PeriodicSchedule;

pub use composite::Composite;
pub use harness::{Attempt, Harness, RetryPolicy};
pub use hooks::{LifecycleHooks, TrackingHooks};
pub use workflow::Workflow;

/// Named arguments passed to a unit.
pub type TaskArgs = serde_json::Map<String, Value>;

/// Failure raised from inside a unit.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("invalid argument '{name}': {message}")]
    InvalidArgument { name: String, message: String },

    #[error("{0}")]
    Failed(String),

    /// Worth another attempt (timeouts, unavailable downstreams).
    #[error("transient failure: {0}")]
    Transient(String),

    /// The unit is misconfigured; retrying cannot help.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("subtask {index} ({name}) failed: {source}")]
    Subtask {
        index: usize,
        name: String,
        source: Box<TaskError>,
    },

    #[error("workflow step '{step}' failed: {source}")]
    Step {
        step: String,
        source: Box<TaskError>,
    },
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        TaskError::Transient(message.into())
    }

    /// Should the retry policy consider another attempt?
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::Transient(_) => true,
            TaskError::Subtask { source, .. } | TaskError::Step { source, .. } => {
                source.is_retryable()
            }
            _ => false,
        }
    }
}

/// The atomic executable contract.
///
/// `execute` must only suspend at `.await` points and never block the
/// runtime thread.
#[async_trait]
pub trait TaskUnit: Send + Sync {
    /// Stable name, unique within a registry.
    fn name(&self) -> &str;

    async fn execute(&self, args: &TaskArgs) -> Result<Value, TaskError>;

    /// Recurrence for the beat, if this unit runs periodically.
    fn schedule(&self) -> Option<PeriodicSchedule> {
        None
    }

    /// Structural checks run once at registration.
    fn validate(&self) -> crate::error::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

/// Extract a required named argument.
pub fn required_arg<T: DeserializeOwned>(args: &TaskArgs, name: &str) -> Result<T, TaskError> {
    let value = args.get(name).ok_or_else(|| TaskError::InvalidArgument {
        name: name.to_string(),
        message: "missing".to_string(),
    })?;
    decode_arg(name, value)
}

/// Extract an optional named argument. `null` counts as absent.
pub fn optional_arg<T: DeserializeOwned>(
    args: &TaskArgs,
    name: &str,
) -> Result<Option<T>, TaskError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => decode_arg(name, value).map(Some),
    }
}

fn decode_arg<T: DeserializeOwned>(name: &str, value: &Value) -> Result<T, TaskError> {
    T::deserialize(value).map_err(|e| TaskError::InvalidArgument {
        name: name.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> TaskArgs {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn required_arg_reports_missing_name() {
        let err = required_arg::<String>(&TaskArgs::new(), "source").unwrap_err();
        assert_eq!(err.to_string(), "invalid argument 'source': missing");
    }

    #[test]
    fn required_arg_reports_type_mismatch() {
        let err = required_arg::<Vec<Value>>(&args(json!({"data": 3})), "data").unwrap_err();
        assert!(matches!(err, TaskError::InvalidArgument { ref name, .. } if name == "data"));
    }

    #[test]
    fn optional_arg_treats_null_as_absent() {
        let a = args(json!({"target": null}));
        assert_eq!(optional_arg::<String>(&a, "target").unwrap(), None);
    }

    #[test]
    fn retryability_follows_wrapped_source() {
        let err = TaskError::Step {
            step: "load".to_string(),
            source: Box::new(TaskError::transient("db timeout")),
        };
        assert!(err.is_retryable());
        assert!(!TaskError::failed("bad input").is_retryable());
    }
}

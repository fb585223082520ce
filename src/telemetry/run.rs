//! Task run span helpers.
//!
//! Provides span creation and status recording for runs flowing through
//! the worker.

use tracing::Span;

use crate::model::{RunId, TaskStatus};

/// Start a span for one attempt of a run.
///
/// The `run.status` field is declared empty and filled in by
/// [`record_status`].
pub fn start_run_span(task: &str, run_id: &RunId, attempt: u32) -> Span {
    tracing::info_span!(
        "task.run",
        "run.task" = task,
        "run.id" = %run_id,
        "run.attempt" = attempt,
        "run.status" = tracing::field::Empty,
    )
}

/// Record the final status of an attempt on its span.
///
/// Emits a tracing `info` event scoped to the given span.
pub fn record_status(span: &Span, status: TaskStatus) {
    span.record("run.status", status.as_str());
    span.in_scope(|| {
        tracing::info!(status = status.as_str(), "status_transition");
    });
}

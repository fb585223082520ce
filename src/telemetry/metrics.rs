//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"powercap-rs"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for powercap-rs instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("powercap-rs")
}

/// Counter: runs submitted.
/// Labels: `task`, `queue`.
pub fn runs_submitted() -> Counter<u64> {
    meter()
        .u64_counter("powercap.runs.submitted")
        .with_description("Number of task runs submitted")
        .build()
}

/// Counter: status writes to the state tracker.
/// Labels: `status`.
pub fn run_status_updates() -> Counter<u64> {
    meter()
        .u64_counter("powercap.runs.status_updates")
        .with_description("Number of run status updates")
        .build()
}

/// Histogram: wall time of one attempt in milliseconds.
/// Labels: `task`, `status`.
pub fn run_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("powercap.runs.duration_ms")
        .with_description("Task attempt duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: workflow steps completed.
/// Labels: `workflow`.
pub fn workflow_steps() -> Counter<u64> {
    meter()
        .u64_counter("powercap.workflow.steps")
        .with_description("Number of workflow steps completed")
        .build()
}

/// Counter: broker operations (send, read, ack, revoke).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("powercap.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: deliveries naming a task the worker does not know.
/// Labels: `task`.
pub fn runs_unroutable() -> Counter<u64> {
    meter()
        .u64_counter("powercap.runs.unroutable")
        .with_description("Deliveries with no registered task")
        .build()
}

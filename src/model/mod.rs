//! Core data model.
//!
//! A run is one invocation of a task unit. It has identity (run id), a
//! lifecycle status, and timing metadata persisted by the state tracker.

pub mod run;
pub mod schedule;
pub mod submission;

pub use run::{RunId, RunRecord, TaskStatus};
pub use schedule::{CronSpec, DEFAULT_QUEUE, PeriodicSchedule, Recurrence};
pub use submission::{Envelope, SubmitReceipt, Submission};

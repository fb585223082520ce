//! Message broker: the queue through which runs reach workers.
//!
//! Delivery is at-least-once at best. A delivery stays owned by the worker
//! that fetched it until it is acknowledged. Revocations are recorded
//! beside the queue and checked by workers before and during a run, and
//! expire after [`REVOCATION_TTL`].

pub mod memory;
pub mod pgmq;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Envelope, RunId};

pub use memory::InMemoryBroker;
pub use pgmq::PgmqBroker;

/// How long a revocation is remembered.
pub const REVOCATION_TTL: Duration = Duration::from_secs(3 * 60 * 60);

/// A fetched envelope plus the handle needed to acknowledge it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: Envelope,
    pub msg_id: i64,
}

/// A recorded revocation. `terminate` asks workers to abort an in-flight
/// run, not only to skip a queued one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revocation {
    pub terminate: bool,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue `envelope` on its queue, visible after `delay`.
    async fn publish(&self, envelope: &Envelope, delay: Duration) -> Result<()>;

    /// Take the next visible envelope from `queue`, if any.
    async fn fetch(&self, queue: &str) -> Result<Option<Delivery>>;

    /// Mark a delivery as handled.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Renew the worker's hold on an unacknowledged delivery so it is not
    /// handed out again while the run is still going.
    async fn extend(&self, delivery: &Delivery) -> Result<()>;

    /// Deliveries fetched but not yet acknowledged, across all queues.
    async fn active(&self) -> Result<u64>;

    /// Revoke a run. Revoking twice keeps the stronger of the two requests.
    async fn revoke(&self, run_id: &RunId, terminate: bool) -> Result<()>;

    async fn revocation(&self, run_id: &RunId) -> Result<Option<Revocation>>;

    async fn ping(&self) -> Result<()>;
}

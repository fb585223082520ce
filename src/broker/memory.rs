//! In-process broker for tests and single-process use.
//!
//! Delays follow `tokio::time`, so paused-clock tests can advance through
//! them. Fetched envelopes are held until acknowledged but never
//! redelivered, so [`Broker::extend`] only counts renewals.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tokio::time::Instant;

use super::{Broker, Delivery, REVOCATION_TTL, Revocation};
use crate::error::{Error, Result};
use crate::model::{Envelope, RunId};
use crate::telemetry::metrics;

struct Queued {
    msg_id: i64,
    visible_at: Instant,
    envelope: Envelope,
}

#[derive(Default)]
struct State {
    next_id: i64,
    queues: HashMap<String, VecDeque<Queued>>,
    unacked: HashMap<i64, Envelope>,
    extensions: u64,
    revoked: HashMap<RunId, (Revocation, Instant)>,
}

#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<State>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Other("in-memory broker lock poisoned".to_string()))
    }

    /// Envelopes waiting on `queue`, visible or not.
    pub fn queued(&self, queue: &str) -> Result<Vec<Envelope>> {
        Ok(self
            .lock()?
            .queues
            .get(queue)
            .map(|q| q.iter().map(|m| m.envelope.clone()).collect())
            .unwrap_or_default())
    }

    /// Deliveries fetched but not yet acknowledged.
    pub fn in_flight(&self) -> Result<usize> {
        Ok(self.lock()?.unacked.len())
    }

    /// Renewals made on unacknowledged deliveries so far.
    pub fn extensions(&self) -> Result<u64> {
        Ok(self.lock()?.extensions)
    }

    /// Revocations currently remembered, expired ones excluded.
    pub fn revocations(&self) -> Result<usize> {
        let now = Instant::now();
        Ok(self
            .lock()?
            .revoked
            .values()
            .filter(|(_, at)| now.duration_since(*at) < REVOCATION_TTL)
            .count())
    }
}

fn record_op(queue: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, envelope: &Envelope, delay: Duration) -> Result<()> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let msg_id = state.next_id;
        state
            .queues
            .entry(envelope.queue.clone())
            .or_default()
            .push_back(Queued {
                msg_id,
                visible_at: Instant::now() + delay,
                envelope: envelope.clone(),
            });
        record_op(&envelope.queue, "send");
        Ok(())
    }

    async fn fetch(&self, queue: &str) -> Result<Option<Delivery>> {
        let mut state = self.lock()?;
        let now = Instant::now();
        let taken = state.queues.get_mut(queue).and_then(|q| {
            let pos = q.iter().position(|m| m.visible_at <= now)?;
            q.remove(pos)
        });
        let Some(queued) = taken else {
            record_op(queue, "read_empty");
            return Ok(None);
        };
        state.unacked.insert(queued.msg_id, queued.envelope.clone());
        record_op(queue, "read");
        Ok(Some(Delivery {
            envelope: queued.envelope,
            msg_id: queued.msg_id,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.lock()?.unacked.remove(&delivery.msg_id);
        record_op(&delivery.envelope.queue, "archive");
        Ok(())
    }

    async fn extend(&self, delivery: &Delivery) -> Result<()> {
        let mut state = self.lock()?;
        if state.unacked.contains_key(&delivery.msg_id) {
            state.extensions += 1;
            record_op(&delivery.envelope.queue, "set_vt");
        }
        Ok(())
    }

    async fn active(&self) -> Result<u64> {
        Ok(self.lock()?.unacked.len() as u64)
    }

    async fn revoke(&self, run_id: &RunId, terminate: bool) -> Result<()> {
        let mut state = self.lock()?;
        let now = Instant::now();
        state
            .revoked
            .retain(|_, (_, at)| now.duration_since(*at) < REVOCATION_TTL);
        let (revocation, at) = state
            .revoked
            .entry(run_id.clone())
            .or_insert((Revocation { terminate: false }, now));
        revocation.terminate |= terminate;
        *at = now;
        Ok(())
    }

    async fn revocation(&self, run_id: &RunId) -> Result<Option<Revocation>> {
        let now = Instant::now();
        Ok(self
            .lock()?
            .revoked
            .get(run_id)
            .filter(|(_, at)| now.duration_since(*at) < REVOCATION_TTL)
            .map(|(revocation, _)| *revocation))
    }

    async fn ping(&self) -> Result<()> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(run: &str, queue: &str) -> Envelope {
        Envelope {
            run_id: RunId::from(run),
            task: "t".to_string(),
            params: Default::default(),
            queue: queue.to_string(),
            attempt: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_envelope_becomes_visible_after_delay() {
        let broker = InMemoryBroker::new();
        broker
            .publish(&envelope("r1", "q"), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(broker.fetch("q").await.unwrap().is_none());
        tokio::time::advance(Duration::from_secs(60)).await;

        let delivery = broker.fetch("q").await.unwrap().unwrap();
        assert_eq!(delivery.envelope.run_id.as_str(), "r1");
        assert_eq!(broker.in_flight().unwrap(), 1);
        broker.ack(&delivery).await.unwrap();
        assert_eq!(broker.in_flight().unwrap(), 0);
    }

    #[tokio::test]
    async fn queues_are_fifo_and_isolated() {
        let broker = InMemoryBroker::new();
        broker.publish(&envelope("a", "q1"), Duration::ZERO).await.unwrap();
        broker.publish(&envelope("b", "q1"), Duration::ZERO).await.unwrap();
        broker.publish(&envelope("c", "q2"), Duration::ZERO).await.unwrap();

        let first = broker.fetch("q1").await.unwrap().unwrap();
        let second = broker.fetch("q1").await.unwrap().unwrap();
        assert_eq!(first.envelope.run_id.as_str(), "a");
        assert_eq!(second.envelope.run_id.as_str(), "b");
        assert!(broker.fetch("q1").await.unwrap().is_none());
        assert_eq!(broker.queued("q2").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn terminate_flag_is_sticky() {
        let broker = InMemoryBroker::new();
        let run = RunId::from("r");
        assert_eq!(broker.revocation(&run).await.unwrap(), None);

        broker.revoke(&run, true).await.unwrap();
        broker.revoke(&run, false).await.unwrap();
        assert_eq!(
            broker.revocation(&run).await.unwrap(),
            Some(Revocation { terminate: true })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn revocations_expire_and_are_pruned() {
        let broker = InMemoryBroker::new();
        let old = RunId::from("old");
        broker.revoke(&old, true).await.unwrap();

        tokio::time::advance(REVOCATION_TTL).await;
        assert_eq!(broker.revocation(&old).await.unwrap(), None);

        broker.revoke(&RunId::from("new"), false).await.unwrap();
        assert_eq!(broker.revocations().unwrap(), 1);
        assert_eq!(broker.lock().unwrap().revoked.len(), 1);
    }

    #[tokio::test]
    async fn extend_counts_only_unacked_deliveries() {
        let broker = InMemoryBroker::new();
        broker.publish(&envelope("r", "q"), Duration::ZERO).await.unwrap();
        let delivery = broker.fetch("q").await.unwrap().unwrap();
        assert_eq!(broker.active().await.unwrap(), 1);

        broker.extend(&delivery).await.unwrap();
        broker.ack(&delivery).await.unwrap();
        broker.extend(&delivery).await.unwrap();

        assert_eq!(broker.extensions().unwrap(), 1);
        assert_eq!(broker.active().await.unwrap(), 0);
    }
}

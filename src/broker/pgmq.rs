//! Postgres-backed broker: one pgmq queue per routing queue name.
//!
//! A fetched message stays hidden for the visibility timeout; if it is not
//! acknowledged or extended by then pgmq hands it out again.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Broker, Delivery, REVOCATION_TTL, Revocation};
use crate::db::Db;
use crate::error::{Error, Result};
use crate::model::{Envelope, RunId};

pub struct PgmqBroker {
    db: Db,
    visibility_timeout: i32,
    created: Mutex<HashSet<String>>,
}

impl PgmqBroker {
    pub fn new(db: Db, visibility_timeout: Duration) -> Self {
        Self {
            db,
            visibility_timeout: i32::try_from(visibility_timeout.as_secs()).unwrap_or(i32::MAX),
            created: Mutex::new(HashSet::new()),
        }
    }

    /// Connect, run migrations, and create the given queues.
    pub async fn connect(url: &str, visibility_timeout: Duration, queues: &[String]) -> Result<Self> {
        let db = Db::connect(url).await?;
        db.migrate().await?;
        let broker = Self::new(db, visibility_timeout);
        for queue in queues {
            broker.ensure_queue(queue).await?;
        }
        Ok(broker)
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.db.close().await;
    }

    async fn ensure_queue(&self, queue: &str) -> Result<()> {
        if self.is_created(queue)? {
            return Ok(());
        }
        self.db.create_queue(queue).await?;
        self.created
            .lock()
            .map_err(|_| Error::Other("queue registry lock poisoned".to_string()))?
            .insert(queue.to_string());
        Ok(())
    }

    fn is_created(&self, queue: &str) -> Result<bool> {
        Ok(self
            .created
            .lock()
            .map_err(|_| Error::Other("queue registry lock poisoned".to_string()))?
            .contains(queue))
    }
}

#[async_trait]
impl Broker for PgmqBroker {
    async fn publish(&self, envelope: &Envelope, delay: Duration) -> Result<()> {
        self.ensure_queue(&envelope.queue).await?;
        let msg_id = self.db.send_envelope(envelope, delay).await?;
        tracing::debug!(run_id = %envelope.run_id, queue = %envelope.queue, msg_id, "published");
        Ok(())
    }

    async fn fetch(&self, queue: &str) -> Result<Option<Delivery>> {
        self.ensure_queue(queue).await?;
        let Some(queued) = self.db.read_envelope(queue, self.visibility_timeout).await? else {
            return Ok(None);
        };
        if queued.read_ct > 1 {
            tracing::warn!(
                run_id = %queued.envelope.run_id,
                read_ct = queued.read_ct,
                "redelivered after visibility timeout"
            );
        }
        Ok(Some(Delivery {
            envelope: queued.envelope,
            msg_id: queued.msg_id,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.db
            .archive_message(&delivery.envelope.queue, delivery.msg_id)
            .await
    }

    async fn extend(&self, delivery: &Delivery) -> Result<()> {
        let queue = &delivery.envelope.queue;
        if !self
            .db
            .set_visibility(queue, delivery.msg_id, self.visibility_timeout)
            .await?
        {
            tracing::debug!(run_id = %delivery.envelope.run_id, msg_id = delivery.msg_id, "extend on archived message");
        }
        Ok(())
    }

    async fn active(&self) -> Result<u64> {
        let mut total = 0u64;
        for queue in self.db.list_queues().await? {
            total += u64::try_from(self.db.in_flight_count(&queue).await?).unwrap_or(0);
        }
        Ok(total)
    }

    async fn revoke(&self, run_id: &RunId, terminate: bool) -> Result<()> {
        self.db.revoke_run(run_id, terminate).await?;
        let pruned = self.db.prune_revocations(REVOCATION_TTL).await?;
        if pruned > 0 {
            tracing::debug!(pruned, "expired revocations removed");
        }
        Ok(())
    }

    async fn revocation(&self, run_id: &RunId) -> Result<Option<Revocation>> {
        Ok(self
            .db
            .run_revocation(run_id, REVOCATION_TTL)
            .await?
            .map(|terminate| Revocation { terminate }))
    }

    async fn ping(&self) -> Result<()> {
        self.db.health_check().await
    }
}

//! pgmq queue operations via direct SQLx.
//!
//! Calls pgmq's SQL functions (create, send, read, set_vt, archive,
//! list_queues). Acknowledged messages are archived rather than deleted.

use std::time::Duration;

use opentelemetry::KeyValue;

use crate::error::{Error, Result};
use crate::model::Envelope;
use crate::telemetry::metrics;

/// An envelope read from a pgmq queue.
#[derive(Debug, Clone)]
pub struct QueuedEnvelope {
    pub msg_id: i64,
    /// How many times pgmq has handed this message out, this read included.
    pub read_ct: i32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub envelope: Envelope,
}

fn record_op(queue_name: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue_name.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}

/// pgmq takes whole seconds; round sub-second delays up.
fn delay_seconds(delay: Duration) -> i32 {
    let secs = delay
        .as_secs()
        .saturating_add(u64::from(delay.subsec_nanos() > 0));
    i32::try_from(secs).unwrap_or(i32::MAX)
}

impl super::Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, queue_name: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await?;
        record_op(queue_name, "create");
        Ok(())
    }

    /// Send an envelope to its queue, visible after `delay`. Returns the
    /// message id.
    pub async fn send_envelope(&self, envelope: &Envelope, delay: Duration) -> Result<i64> {
        let payload = serde_json::to_value(envelope)?;
        let (msg_id,): (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3)")
            .bind(&envelope.queue)
            .bind(&payload)
            .bind(delay_seconds(delay))
            .fetch_one(&self.pool)
            .await?;
        record_op(&envelope.queue, "send");
        Ok(msg_id)
    }

    /// Read the next visible envelope, hiding it for `vt_seconds`.
    ///
    /// Returns `None` if the queue is empty. A message that does not decode
    /// as an envelope is archived and reported as an error.
    pub async fn read_envelope(
        &self,
        queue_name: &str,
        vt_seconds: i32,
    ) -> Result<Option<QueuedEnvelope>> {
        let row = sqlx::query_as::<
            _,
            (
                i64,
                i32,
                chrono::DateTime<chrono::Utc>,
                serde_json::Value,
            ),
        >("SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.read($1, $2, 1)")
        .bind(queue_name)
        .bind(vt_seconds)
        .fetch_optional(&self.pool)
        .await?;

        let Some((msg_id, read_ct, enqueued_at, message)) = row else {
            record_op(queue_name, "read_empty");
            return Ok(None);
        };
        record_op(queue_name, "read");

        match serde_json::from_value::<Envelope>(message) {
            Ok(envelope) => Ok(Some(QueuedEnvelope {
                msg_id,
                read_ct,
                enqueued_at,
                envelope,
            })),
            Err(e) => {
                self.archive_message(queue_name, msg_id).await?;
                Err(Error::InvalidRecord {
                    run_id: format!("{queue_name}#{msg_id}"),
                    message: format!("undecodable envelope: {e}"),
                })
            }
        }
    }

    /// Archive a message (moves it to the queue's archive table).
    pub async fn archive_message(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(&self.pool)
            .await?;
        record_op(queue_name, "archive");
        Ok(())
    }

    /// Hide a message for another `vt_seconds` from now. Returns `false` if
    /// the message is gone (already archived).
    pub async fn set_visibility(&self, queue_name: &str, msg_id: i64, vt_seconds: i32) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT msg_id FROM pgmq.set_vt($1, $2, $3)")
            .bind(queue_name)
            .bind(msg_id)
            .bind(vt_seconds)
            .fetch_optional(&self.pool)
            .await?;
        record_op(queue_name, "set_vt");
        Ok(row.is_some())
    }

    /// Names of every pgmq queue.
    pub async fn list_queues(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT queue_name FROM pgmq.list_queues()")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Messages read from `queue_name` whose visibility timeout has not yet
    /// run out, i.e. deliveries a worker still holds.
    pub async fn in_flight_count(&self, queue_name: &str) -> Result<i64> {
        let table = queue_table(queue_name)?;
        let (count,): (i64,) = sqlx::query_as(&format!(
            "SELECT count(*) FROM pgmq.{table} WHERE read_ct > 0 AND vt > now()"
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

/// The pgmq table backing a queue. pgmq only accepts names made of ASCII
/// letters, digits and underscores, which also makes them safe to splice.
fn queue_table(queue_name: &str) -> Result<String> {
    if queue_name.is_empty()
        || !queue_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(Error::Config(format!("invalid queue name '{queue_name}'")));
    }
    Ok(format!("q_{}", queue_name.to_ascii_lowercase()))
}

//! Worker: pulls envelopes off the broker and runs them through the harness.
//!
//! Each delivery runs inside a `task.run` span. The worker acknowledges a
//! delivery once its outcome is recorded, re-publishes retryable failures
//! as the next attempt, and watches the broker for terminate-revocations
//! while a run is in flight. A run in flight keeps its delivery hidden by
//! extending it every `heartbeat_interval` and is failed once it exceeds
//! `time_limit`.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, warn};

use crate::broker::{Broker, Delivery};
use crate::error::Result;
use crate::model::{DEFAULT_QUEUE, TaskStatus};
use crate::registry::TaskRegistry;
use crate::task::{Attempt, Harness, RetryPolicy, TrackingHooks};
use crate::telemetry::metrics;
use crate::telemetry::run::{record_status, start_run_span};
use crate::tracker::StateTracker;

/// Configuration for a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queues to consume, polled in order.
    pub queues: Vec<String>,
    /// Maximum runs in flight at once.
    pub concurrency: usize,
    /// Sleep between polls when the queues are drained or capacity is full.
    pub poll_interval: Duration,
    /// How often an in-flight run checks for a terminate-revocation.
    pub revocation_poll: Duration,
    /// How often an in-flight delivery's visibility is renewed. Must be
    /// shorter than the broker's visibility timeout.
    pub heartbeat_interval: Duration,
    /// Hard limit on one attempt. Exceeding it fails the run.
    pub time_limit: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queues: vec![DEFAULT_QUEUE.to_string()],
            concurrency: 2,
            poll_interval: Duration::from_secs(1),
            revocation_poll: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(20),
            time_limit: Duration::from_secs(3600),
            retry: RetryPolicy::default(),
        }
    }
}

/// The worker loop: fetch deliveries, spawn runs, retire them.
#[derive(Clone)]
pub struct Worker {
    registry: Arc<TaskRegistry>,
    broker: Arc<dyn Broker>,
    tracker: StateTracker,
    harness: Harness,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
}

impl Worker {
    pub fn new(
        registry: Arc<TaskRegistry>,
        broker: Arc<dyn Broker>,
        tracker: StateTracker,
        config: WorkerConfig,
    ) -> Self {
        let hooks = Arc::new(TrackingHooks::new(tracker.clone()));
        Self {
            registry,
            broker,
            harness: Harness::new(hooks, config.retry),
            tracker,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the worker to stop. Runs already in flight are awaited.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run the worker loop until shutdown.
    pub async fn run(&self) -> Result<()> {
        info!(
            queues = ?self.config.queues,
            concurrency = self.config.concurrency,
            "worker started"
        );

        let mut in_flight = JoinSet::new();
        loop {
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!("run task aborted: {e}");
                }
            }

            if let Err(e) = self.dispatch(&mut in_flight).await {
                error!("dispatch error: {e}");
            }

            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!("run task aborted: {e}");
                    }
                }
            }
        }

        info!(in_flight = in_flight.len(), "worker shutting down");
        while in_flight.join_next().await.is_some() {}
        Ok(())
    }

    /// Fill free capacity with deliveries from the configured queues.
    async fn dispatch(&self, in_flight: &mut JoinSet<()>) -> Result<()> {
        for queue in &self.config.queues {
            while in_flight.len() < self.config.concurrency {
                let Some(delivery) = self.broker.fetch(queue).await? else {
                    break;
                };
                let worker = self.clone();
                in_flight.spawn(async move { worker.handle(delivery).await });
            }
        }
        Ok(())
    }

    /// Process every currently visible delivery, one at a time. Returns how
    /// many were handled.
    pub async fn run_pending(&self) -> Result<usize> {
        let mut handled = 0;
        for queue in &self.config.queues {
            while let Some(delivery) = self.broker.fetch(queue).await? {
                self.handle(delivery).await;
                handled += 1;
            }
        }
        Ok(handled)
    }

    async fn handle(&self, delivery: Delivery) {
        let envelope = &delivery.envelope;
        let span = start_run_span(&envelope.task, &envelope.run_id, envelope.attempt);
        let outcome = self.process(&delivery).instrument(span.clone()).await;
        match outcome {
            Ok(status) => record_status(&span, status),
            Err(e) => span.in_scope(|| {
                error!(run_id = %envelope.run_id, "run left unacknowledged: {e}");
            }),
        }
    }

    /// Run one delivery to an outcome. Returns the status the run ended in.
    ///
    /// On `Err` the delivery is not acknowledged, so a broker with a
    /// visibility timeout hands it out again.
    async fn process(&self, delivery: &Delivery) -> Result<TaskStatus> {
        let envelope = &delivery.envelope;
        let run_id = &envelope.run_id;

        if self.broker.revocation(run_id).await?.is_some() {
            info!(run_id = %run_id, "run revoked before start, skipping");
            self.broker.ack(delivery).await?;
            return Ok(TaskStatus::Revoked);
        }

        let Some(unit) = self.registry.get(&envelope.task).cloned() else {
            warn!(task = %envelope.task, "no registered task, failing run");
            metrics::runs_unroutable().add(1, &[KeyValue::new("task", envelope.task.clone())]);
            let message = format!("task '{}' is not registered", envelope.task);
            self.tracker
                .update(run_id, TaskStatus::Failure, None, Some(&message))
                .await?;
            self.broker.ack(delivery).await?;
            return Ok(TaskStatus::Failure);
        };

        let attempt = tokio::select! {
            attempt = self.harness.run(run_id, unit.as_ref(), &envelope.params, envelope.attempt) => attempt?,
            _ = self.supervise(delivery) => {
                warn!(run_id = %run_id, "run terminated by revocation");
                return self.discard_revoked(delivery).await;
            }
            _ = tokio::time::sleep(self.config.time_limit) => {
                let message = format!(
                    "time limit of {}s exceeded",
                    self.config.time_limit.as_secs()
                );
                warn!(run_id = %run_id, "{message}");
                self.tracker
                    .update(run_id, TaskStatus::Failure, None, Some(&message))
                    .await?;
                self.broker.ack(delivery).await?;
                return Ok(TaskStatus::Failure);
            }
        };

        // Cancelled after the last revocation poll: the outcome was written
        // over cleaned state.
        if self.broker.revocation(run_id).await?.is_some() {
            info!(run_id = %run_id, "run revoked while in flight, discarding outcome");
            return self.discard_revoked(delivery).await;
        }

        if let Attempt::Retry { delay, .. } = &attempt {
            let next = envelope.next_attempt();
            self.broker.publish(&next, *delay).await?;
            info!(
                run_id = %run_id,
                attempt = next.attempt,
                delay_secs = delay.as_secs(),
                "retry scheduled"
            );
        }
        self.broker.ack(delivery).await?;
        Ok(attempt.status())
    }

    async fn discard_revoked(&self, delivery: &Delivery) -> Result<TaskStatus> {
        self.tracker.clean(&delivery.envelope.run_id).await?;
        self.broker.ack(delivery).await?;
        Ok(TaskStatus::Revoked)
    }

    /// Keep the delivery hidden while the run is in flight. Resolves once
    /// the run has been revoked with `terminate`.
    async fn supervise(&self, delivery: &Delivery) {
        let run_id = &delivery.envelope.run_id;
        let start = tokio::time::Instant::now();
        let mut revocation_poll =
            tokio::time::interval_at(start + self.config.revocation_poll, self.config.revocation_poll);
        let mut heartbeat = tokio::time::interval_at(
            start + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        loop {
            tokio::select! {
                _ = revocation_poll.tick() => match self.broker.revocation(run_id).await {
                    Ok(Some(revocation)) if revocation.terminate => return,
                    Ok(_) => {}
                    Err(e) => warn!(run_id = %run_id, "revocation check failed: {e}"),
                },
                _ = heartbeat.tick() => {
                    if let Err(e) = self.broker.extend(delivery).await {
                        warn!(run_id = %run_id, "visibility extension failed: {e}");
                    }
                }
            }
        }
    }
}

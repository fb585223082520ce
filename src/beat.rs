//! Beat: submits scheduled units through the task service when they fall due.
//!
//! Interval schedules fire on the first tick and then whenever the interval
//! has elapsed since the last submission. Cron schedules fire once their
//! next fire time after the last submission (or the beat's start) has
//! passed. Last-run times live in memory only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::{SubmitReceipt, Submission};
use crate::registry::ScheduledTaskInfo;
use crate::service::TaskService;

pub struct Beat {
    service: TaskService,
    schedules: Vec<ScheduledTaskInfo>,
    started_at: DateTime<Utc>,
    tick_interval: Duration,
    last_run: Mutex<HashMap<String, DateTime<Utc>>>,
    shutdown: Arc<Notify>,
}

impl Beat {
    pub fn new(service: TaskService, tick_interval: Duration) -> Self {
        Self {
            schedules: service.scheduled_tasks(),
            service,
            started_at: Utc::now(),
            tick_interval,
            last_run: Mutex::new(HashMap::new()),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Count cron schedules from `started_at` instead of construction time.
    pub fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn schedules(&self) -> &[ScheduledTaskInfo] {
        &self.schedules
    }

    pub fn last_run(&self, task: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.lock()?.get(task).copied())
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>>> {
        self.last_run
            .lock()
            .map_err(|_| Error::Other("beat state lock poisoned".to_string()))
    }

    /// Submit every schedule due at `now`. A failed submission is retried on
    /// the next tick.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<SubmitReceipt>> {
        let due: Vec<&ScheduledTaskInfo> = {
            let last_run = self.lock()?;
            self.schedules
                .iter()
                .filter(|s| {
                    s.periodic
                        .is_due(last_run.get(&s.name).copied(), self.started_at, now)
                })
                .collect()
        };

        let mut receipts = Vec::with_capacity(due.len());
        for schedule in due {
            let submission = Submission::new(&schedule.name).queue(&schedule.queue);
            match self.service.submit(submission).await {
                Ok(receipt) => {
                    info!(
                        task = %schedule.name,
                        run_id = %receipt.run_id,
                        schedule = %schedule.schedule,
                        "scheduled run submitted"
                    );
                    self.lock()?.insert(schedule.name.clone(), now);
                    receipts.push(receipt);
                }
                Err(e) => warn!(task = %schedule.name, "scheduled submission failed: {e}"),
            }
        }
        Ok(receipts)
    }

    /// Tick until shutdown.
    pub async fn run(&self) -> Result<()> {
        info!(schedules = self.schedules.len(), "beat started");
        loop {
            if let Err(e) = self.tick(Utc::now()).await {
                warn!("beat tick failed: {e}");
            }
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("beat shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.tick_interval) => {}
            }
        }
    }
}

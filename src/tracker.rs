//! Run-state tracker.
//!
//! Externalizes each run's lifecycle to a [`StateStore`] so that status
//! survives restarts and is visible to every producer and consumer. The
//! tracker is the only writer of run records; [`StateTracker::update`] is
//! the single mutation entry point.
//!
//! Two hashes per run:
//!
//! | Key | Fields |
//! |-----|--------|
//! | `{ns:}task:{run_id}` | `status` |
//! | `{ns:}task_meta:{run_id}` | `status`, `updated_at`, `start_time`, `first_start_time`, `end_time`, `runtime`, `result`, `error` |
//!
//! Existence of the status hash is what distinguishes "never written" from
//! a PENDING run.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{RunId, RunRecord, TaskStatus};
use crate::store::StateStore;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

const STATUS: &str = "status";
const UPDATED_AT: &str = "updated_at";
const START_TIME: &str = "start_time";
const FIRST_START_TIME: &str = "first_start_time";
const END_TIME: &str = "end_time";
const RUNTIME: &str = "runtime";
const RESULT: &str = "result";
const ERROR: &str = "error";

/// Reads and writes run records against an injected store.
#[derive(Clone)]
pub struct StateTracker {
    store: Arc<dyn StateStore>,
    status_prefix: String,
    meta_prefix: String,
}

impl StateTracker {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            status_prefix: "task:".to_string(),
            meta_prefix: "task_meta:".to_string(),
        }
    }

    /// Prefix every key with `{namespace}:` so several deployments can
    /// share one store.
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.status_prefix = format!("{namespace}:task:");
        self.meta_prefix = format!("{namespace}:task_meta:");
        self
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    fn status_key(&self, run_id: &RunId) -> String {
        format!("{}{}", self.status_prefix, run_id)
    }

    fn meta_key(&self, run_id: &RunId) -> String {
        format!("{}{}", self.meta_prefix, run_id)
    }

    /// Record a status change. Idempotent upsert.
    ///
    /// STARTED stamps `start_time` (always) and `first_start_time` (once), and
    /// clears any previous `end_time`/`runtime`. SUCCESS and FAILURE stamp
    /// `end_time` and, when a start exists, `runtime` in seconds.
    pub async fn update(
        &self,
        run_id: &RunId,
        status: TaskStatus,
        result: Option<&Value>,
        error: Option<&str>,
    ) -> Result<()> {
        let status_key = self.status_key(run_id);
        let meta_key = self.meta_key(run_id);
        let now = Utc::now();

        self.store
            .hset(&status_key, &[(STATUS, status.as_str().to_string())])
            .await?;

        let mut meta: Vec<(&str, String)> = vec![
            (STATUS, status.as_str().to_string()),
            (UPDATED_AT, now.to_rfc3339()),
        ];

        if status == TaskStatus::Started {
            meta.push((START_TIME, now.to_rfc3339()));
            if self.store.hget(&meta_key, FIRST_START_TIME).await?.is_none() {
                meta.push((FIRST_START_TIME, now.to_rfc3339()));
            }
            self.store.hdel(&meta_key, &[END_TIME, RUNTIME]).await?;
        }

        if status.completes_run() {
            meta.push((END_TIME, now.to_rfc3339()));
            if let Some(start) = self.store.hget(&meta_key, START_TIME).await? {
                let start = parse_time(run_id, START_TIME, &start)?;
                let runtime = (now - start).num_microseconds().unwrap_or(0) as f64 / 1e6;
                meta.push((RUNTIME, runtime.to_string()));
            }
        }

        if let Some(result) = result {
            meta.push((RESULT, render_result(result)));
        }
        if let Some(error) = error {
            meta.push((ERROR, error.to_string()));
        }

        self.store.hset(&meta_key, &meta).await?;

        metrics::run_status_updates().add(1, &[KeyValue::new("status", status.as_str())]);
        debug!(run_id = %run_id, %status, "run status updated");
        Ok(())
    }

    /// Read back a run. `None` if nothing was ever written for `run_id`.
    pub async fn get(&self, run_id: &RunId) -> Result<Option<RunRecord>> {
        let status_key = self.status_key(run_id);
        if !self.store.exists(&status_key).await? {
            return Ok(None);
        }

        let status_fields = self.store.hgetall(&status_key).await?;
        let meta = self.store.hgetall(&self.meta_key(run_id)).await?;

        let status = match status_fields.get(STATUS) {
            Some(raw) => raw.parse().map_err(|_| Error::InvalidRecord {
                run_id: run_id.to_string(),
                message: format!("unknown status '{raw}'"),
            })?,
            None => TaskStatus::Pending,
        };

        let runtime = meta
            .get(RUNTIME)
            .map(|raw| {
                raw.parse::<f64>().map_err(|e| Error::InvalidRecord {
                    run_id: run_id.to_string(),
                    message: format!("bad runtime '{raw}': {e}"),
                })
            })
            .transpose()?;

        Ok(Some(RunRecord {
            run_id: run_id.clone(),
            status,
            result: meta.get(RESULT).cloned(),
            error: meta.get(ERROR).cloned(),
            start_time: time_field(run_id, &meta, START_TIME)?,
            first_start_time: time_field(run_id, &meta, FIRST_START_TIME)?,
            end_time: time_field(run_id, &meta, END_TIME)?,
            updated_at: time_field(run_id, &meta, UPDATED_AT)?,
            runtime,
        }))
    }

    /// Delete everything stored for `run_id`.
    pub async fn clean(&self, run_id: &RunId) -> Result<()> {
        let status_key = self.status_key(run_id);
        let meta_key = self.meta_key(run_id);
        let removed = self.store.del(&[status_key.as_str(), meta_key.as_str()]).await?;
        debug!(run_id = %run_id, removed, "run state cleaned");
        Ok(())
    }
}

/// Textual form of a result: strings verbatim, everything else as compact JSON.
pub fn render_result(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn time_field(
    run_id: &RunId,
    meta: &HashMap<String, String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    meta.get(field)
        .map(|raw| parse_time(run_id, field, raw))
        .transpose()
}

fn parse_time(run_id: &RunId, field: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::InvalidRecord {
            run_id: run_id.to_string(),
            message: format!("bad {field} '{raw}': {e}"),
        })
}

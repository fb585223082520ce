//! Periodic units picked up by the beat.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use super::data::data_pipeline;
use super::etl::etl_workflow;
use crate::error::Result;
use crate::model::{CronSpec, PeriodicSchedule};
use crate::task::{Composite, TaskArgs, TaskError, TaskUnit, Workflow};

pub const HEALTH_CHECK: &str = "health_check_task";
pub const DATA_CLEANUP: &str = "data_cleanup_task";
pub const DAILY_ETL: &str = "daily_etl_task";
pub const WEEKLY_REPORT: &str = "weekly_report_task";

const MONDAY: u32 = 1;
const WEEKLY_RECORDS: usize = 7;

/// Reports component health every five minutes.
#[derive(Debug, Default)]
pub struct HealthCheckTask;

#[async_trait]
impl TaskUnit for HealthCheckTask {
    fn name(&self) -> &str {
        HEALTH_CHECK
    }

    async fn execute(&self, _args: &TaskArgs) -> std::result::Result<Value, TaskError> {
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(json!({
            "status": "healthy",
            "timestamp": Utc::now().to_rfc3339(),
            "checks": {"database": "ok", "redis": "ok", "api": "ok"},
        }))
    }

    fn schedule(&self) -> Option<PeriodicSchedule> {
        Some(PeriodicSchedule::every_secs(300).queue("monitoring"))
    }
}

/// Nightly removal of expired records (simulated).
#[derive(Debug, Default)]
pub struct DataCleanupTask;

#[async_trait]
impl TaskUnit for DataCleanupTask {
    fn name(&self) -> &str {
        DATA_CLEANUP
    }

    async fn execute(&self, _args: &TaskArgs) -> std::result::Result<Value, TaskError> {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(json!({
            "cleaned_records": 100,
            "timestamp": Utc::now().to_rfc3339(),
            "status": "success",
        }))
    }

    fn schedule(&self) -> Option<PeriodicSchedule> {
        Some(PeriodicSchedule::cron(CronSpec::daily_at(2, 0)).queue("maintenance"))
    }
}

/// Runs the ETL workflow from the daily feed into the warehouse.
pub struct DailyEtlTask {
    workflow: Workflow,
}

impl DailyEtlTask {
    pub fn new() -> Result<Self> {
        Ok(Self {
            workflow: etl_workflow()?,
        })
    }
}

#[async_trait]
impl TaskUnit for DailyEtlTask {
    fn name(&self) -> &str {
        DAILY_ETL
    }

    async fn execute(&self, _args: &TaskArgs) -> std::result::Result<Value, TaskError> {
        let mut args = TaskArgs::new();
        args.insert("source".to_string(), json!("daily_data"));
        args.insert("target".to_string(), json!("data_warehouse"));

        let result = self.workflow.execute(&args).await?;
        Ok(json!({
            "workflow_result": result,
            "timestamp": Utc::now().to_rfc3339(),
        }))
    }

    fn schedule(&self) -> Option<PeriodicSchedule> {
        Some(PeriodicSchedule::cron(CronSpec::daily_at(1, 0)).queue("etl"))
    }

    fn validate(&self) -> Result<()> {
        self.workflow.validate()
    }
}

/// Monday-morning report over the week's records.
pub struct WeeklyReportTask {
    pipeline: Composite,
}

impl WeeklyReportTask {
    pub fn new() -> Self {
        Self {
            pipeline: data_pipeline(),
        }
    }
}

impl Default for WeeklyReportTask {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskUnit for WeeklyReportTask {
    fn name(&self) -> &str {
        WEEKLY_REPORT
    }

    async fn execute(&self, _args: &TaskArgs) -> std::result::Result<Value, TaskError> {
        let records: Vec<Value> = (1..=WEEKLY_RECORDS)
            .map(|i| json!({"id": i, "value": format!("week_data_{i}")}))
            .collect();
        let mut args = TaskArgs::new();
        args.insert("data".to_string(), Value::Array(records));

        let stages = self.pipeline.run(&args).await?;
        tokio::time::sleep(Duration::from_secs(3)).await;

        let now = Utc::now();
        Ok(json!({
            "report_id": format!("WR-{}", now.format("%Y%m%d")),
            "data_processed": stages.len(),
            "status": "generated",
            "timestamp": now.to_rfc3339(),
        }))
    }

    fn schedule(&self) -> Option<PeriodicSchedule> {
        Some(PeriodicSchedule::cron(CronSpec::weekly_at(MONDAY, 7, 0)).queue("reporting"))
    }

    fn validate(&self) -> Result<()> {
        self.pipeline.validate()
    }
}

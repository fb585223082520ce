//! Record-processing units and the processing pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use crate::task::{Composite, TaskArgs, TaskError, TaskUnit, required_arg};

pub const DATA_PROCESS: &str = "data_process_task";
pub const DATA_VALIDATION: &str = "data_validation_task";
pub const DATA_PIPELINE: &str = "data_pipeline_task";

/// Fields a record needs to pass validation.
const REQUIRED_FIELDS: [&str; 2] = ["id", "value"];

/// Marks every record of `data` as processed.
#[derive(Debug, Default)]
pub struct DataProcessTask;

#[async_trait]
impl TaskUnit for DataProcessTask {
    fn name(&self) -> &str {
        DATA_PROCESS
    }

    async fn execute(&self, args: &TaskArgs) -> Result<Value, TaskError> {
        let data: Vec<TaskArgs> = required_arg(args, "data")?;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let processed = data
            .into_iter()
            .map(|mut record| {
                record.insert("processed".to_string(), Value::Bool(true));
                record.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
                Value::Object(record)
            })
            .collect();
        Ok(Value::Array(processed))
    }
}

/// Counts records that carry every required field.
#[derive(Debug, Default)]
pub struct DataValidationTask;

#[async_trait]
impl TaskUnit for DataValidationTask {
    fn name(&self) -> &str {
        DATA_VALIDATION
    }

    async fn execute(&self, args: &TaskArgs) -> Result<Value, TaskError> {
        let data: Vec<TaskArgs> = required_arg(args, "data")?;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut valid_count = 0usize;
        let mut errors = Vec::new();
        for record in &data {
            if REQUIRED_FIELDS.iter().all(|f| record.contains_key(*f)) {
                valid_count += 1;
            } else {
                errors.push(format!(
                    "Missing required fields in item: {}",
                    Value::Object(record.clone())
                ));
            }
        }

        Ok(json!({
            "valid_count": valid_count,
            "invalid_count": errors.len(),
            "errors": errors,
        }))
    }
}

/// Process then validate, over the same `data`.
pub fn data_pipeline() -> Composite {
    Composite::new(DATA_PIPELINE)
        .with_subtask(Arc::new(DataProcessTask))
        .with_subtask(Arc::new(DataValidationTask))
}

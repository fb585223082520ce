//! Extract / transform / load units and the ETL workflow.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::data::DataValidationTask;
use crate::error::Result;
use crate::task::{TaskArgs, TaskError, TaskUnit, Workflow, optional_arg, required_arg};

pub const EXTRACT: &str = "extract_task";
pub const TRANSFORM: &str = "transform_task";
pub const LOAD: &str = "load_task";
pub const ETL_WORKFLOW: &str = "etl_workflow_task";

const DEFAULT_TARGET: &str = "default_storage";

/// Pulls records from `source`.
#[derive(Debug, Default)]
pub struct ExtractTask;

#[async_trait]
impl TaskUnit for ExtractTask {
    fn name(&self) -> &str {
        EXTRACT
    }

    async fn execute(&self, args: &TaskArgs) -> std::result::Result<Value, TaskError> {
        let source: String = required_arg(args, "source")?;
        tokio::time::sleep(Duration::from_secs(2)).await;
        tracing::debug!(%source, "extracted records");

        Ok(json!([
            {"id": 1, "value": "data1"},
            {"id": 2, "value": "data2"},
            {"id": 3, "value": "data3"},
        ]))
    }
}

/// Flags each record as transformed and upper-cases its value.
#[derive(Debug, Default)]
pub struct TransformTask;

#[async_trait]
impl TaskUnit for TransformTask {
    fn name(&self) -> &str {
        TRANSFORM
    }

    async fn execute(&self, args: &TaskArgs) -> std::result::Result<Value, TaskError> {
        let data: Vec<TaskArgs> = required_arg(args, "data")?;
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let transformed = data
            .into_iter()
            .map(|mut record| {
                let upper = match record.get("value") {
                    Some(Value::String(s)) => s.to_uppercase(),
                    Some(other) => other.to_string().to_uppercase(),
                    None => {
                        return Err(TaskError::InvalidArgument {
                            name: "data".to_string(),
                            message: "record without 'value'".to_string(),
                        });
                    }
                };
                record.insert("transformed".to_string(), Value::Bool(true));
                record.insert("value_upper".to_string(), Value::String(upper));
                Ok(Value::Object(record))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Value::Array(transformed))
    }
}

/// Writes records to `target` (simulated).
#[derive(Debug, Default)]
pub struct LoadTask;

#[async_trait]
impl TaskUnit for LoadTask {
    fn name(&self) -> &str {
        LOAD
    }

    async fn execute(&self, args: &TaskArgs) -> std::result::Result<Value, TaskError> {
        let data: Vec<Value> = required_arg(args, "data")?;
        let target: String =
            optional_arg(args, "target")?.unwrap_or_else(|| DEFAULT_TARGET.to_string());
        tokio::time::sleep(Duration::from_secs(1)).await;

        Ok(json!({
            "loaded_count": data.len(),
            "success": true,
            "target": target,
        }))
    }
}

/// extract → transform → load, then validate the transformed records.
pub fn etl_workflow() -> Result<Workflow> {
    let mut workflow = Workflow::new(ETL_WORKFLOW);
    workflow.add_step("extract", Arc::new(ExtractTask), &[])?;
    workflow.add_step("transform", Arc::new(TransformTask), &["extract"])?;
    workflow.add_step("load", Arc::new(LoadTask), &["transform"])?;
    workflow.add_step("validate", Arc::new(DataValidationTask), &["transform", "load"])?;
    Ok(workflow)
}

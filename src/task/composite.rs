//! Composite unit: an ordered list of subtasks run one after another.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{TaskArgs, TaskError, TaskUnit};

/// Runs its subtasks strictly in registration order, each with the same
/// arguments. The first failure aborts the rest and propagates.
pub struct Composite {
    name: String,
    subtasks: Vec<Arc<dyn TaskUnit>>,
}

impl Composite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subtasks: Vec::new(),
        }
    }

    pub fn add_subtask(&mut self, task: Arc<dyn TaskUnit>) {
        self.subtasks.push(task);
    }

    /// Builder form of [`add_subtask`](Self::add_subtask).
    pub fn with_subtask(mut self, task: Arc<dyn TaskUnit>) -> Self {
        self.add_subtask(task);
        self
    }

    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    /// One result per subtask, in order.
    pub async fn run(&self, args: &TaskArgs) -> Result<Vec<Value>, TaskError> {
        let mut results = Vec::with_capacity(self.subtasks.len());
        for (index, subtask) in self.subtasks.iter().enumerate() {
            debug!(composite = %self.name, index, subtask = subtask.name(), "running subtask");
            let result = subtask
                .execute(args)
                .await
                .map_err(|source| TaskError::Subtask {
                    index,
                    name: subtask.name().to_string(),
                    source: Box::new(source),
                })?;
            results.push(result);
        }
        Ok(results)
    }
}

#[async_trait]
impl TaskUnit for Composite {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, args: &TaskArgs) -> Result<Value, TaskError> {
        self.run(args).await.map(Value::Array)
    }

    fn validate(&self) -> crate::error::Result<()> {
        self.subtasks.iter().try_for_each(|subtask| subtask.validate())
    }
}

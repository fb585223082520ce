//! Dependency-graph unit: named steps constrained by a dependency relation.
//!
//! Scheduling uses in-degree counters. The ready queue is seeded with the
//! steps that have no dependencies, in insertion order; finishing a step
//! decrements each dependent's counter and enqueues the ones that reach
//! zero. Steps left with a non-zero counter once the queue drains form (or
//! sit behind) a cycle, which is reported instead of waited on.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use serde_json::Value;
use tracing::{Instrument, debug, info_span};

use super::{TaskArgs, TaskError, TaskUnit};
use crate::error::{Error, Result};
use crate::telemetry::metrics;

/// Step results keyed by step id.
pub type WorkflowResults = BTreeMap<String, Value>;

struct Step {
    id: String,
    task: Arc<dyn TaskUnit>,
    depends_on: Vec<String>,
}

/// A workflow of named steps.
///
/// A step with dependencies receives the workflow arguments plus `data`
/// (the result of its first declared dependency) and `upstream` (every
/// dependency's result keyed by step id).
pub struct Workflow {
    name: String,
    steps: Vec<Step>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Add a step. Dependencies are resolved when the workflow is validated,
    /// so steps may be added in any order.
    pub fn add_step(
        &mut self,
        id: impl Into<String>,
        task: Arc<dyn TaskUnit>,
        depends_on: &[&str],
    ) -> Result<()> {
        let id = id.into();
        if self.steps.iter().any(|s| s.id == id) {
            return Err(Error::DuplicateStep(id));
        }
        self.steps.push(Step {
            id,
            task,
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        });
        Ok(())
    }

    /// Compute the execution order, rejecting unknown dependencies and
    /// cycles.
    pub fn plan(&self) -> Result<Vec<usize>> {
        let index: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();

        let mut in_degree = vec![0usize; self.steps.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.steps.len()];

        for (i, step) in self.steps.iter().enumerate() {
            for dep in &step.depends_on {
                let &d = index.get(dep.as_str()).ok_or_else(|| Error::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dep.clone(),
                })?;
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }

        let mut ready: VecDeque<usize> = (0..self.steps.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());

        while let Some(i) = ready.pop_front() {
            order.push(i);
            for &dependent in &dependents[i] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push_back(dependent);
                }
            }
        }

        if order.len() < self.steps.len() {
            let steps = self
                .steps
                .iter()
                .zip(&in_degree)
                .filter(|(_, degree)| **degree > 0)
                .map(|(s, _)| s.id.clone())
                .collect();
            return Err(Error::DependencyCycle { steps });
        }

        Ok(order)
    }

    /// Execute every step after its dependencies, one at a time.
    pub async fn run(&self, args: &TaskArgs) -> std::result::Result<WorkflowResults, TaskError> {
        let order = self
            .plan()
            .map_err(|e| TaskError::Configuration(e.to_string()))?;

        let mut results = WorkflowResults::new();
        for i in order {
            let step = &self.steps[i];
            let inputs = self.step_inputs(step, args, &results);

            debug!(workflow = %self.name, step = %step.id, "running step");
            let span = info_span!("workflow.step", workflow = %self.name, step = %step.id);
            let result = step
                .task
                .execute(&inputs)
                .instrument(span)
                .await
                .map_err(|source| TaskError::Step {
                    step: step.id.clone(),
                    source: Box::new(source),
                })?;

            metrics::workflow_steps().add(1, &[KeyValue::new("workflow", self.name.clone())]);
            results.insert(step.id.clone(), result);
        }
        Ok(results)
    }

    fn step_inputs(&self, step: &Step, args: &TaskArgs, results: &WorkflowResults) -> TaskArgs {
        let mut inputs = args.clone();
        if let Some(first) = step.depends_on.first() {
            if let Some(data) = results.get(first) {
                inputs.insert("data".to_string(), data.clone());
            }
            let upstream = step
                .depends_on
                .iter()
                .filter_map(|dep| results.get(dep).map(|r| (dep.clone(), r.clone())))
                .collect();
            inputs.insert("upstream".to_string(), Value::Object(upstream));
        }
        inputs
    }
}

#[async_trait]
impl TaskUnit for Workflow {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, args: &TaskArgs) -> std::result::Result<Value, TaskError> {
        let results = self.run(args).await?;
        Ok(Value::Object(results.into_iter().collect()))
    }

    fn validate(&self) -> Result<()> {
        self.plan()?;
        self.steps.iter().try_for_each(|s| s.task.validate())
    }
}

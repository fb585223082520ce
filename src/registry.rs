//! Task registry: startup-time map from task name to unit.
//!
//! Registration validates each unit (workflow graphs included), so a bad
//! definition or a duplicate name fails at startup rather than at dispatch.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::PeriodicSchedule;
use crate::task::TaskUnit;

/// A scheduled unit as exposed to the beat and to operators.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledTaskInfo {
    pub name: String,
    pub schedule: String,
    pub queue: String,
    #[serde(skip)]
    pub periodic: PeriodicSchedule,
}

/// Registry of units, indexed by name.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, Arc<dyn TaskUnit>>,
}

impl TaskRegistry {
    /// Create an empty registry with no tasks.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validate and add a unit under its own name.
    pub fn register(&mut self, task: Arc<dyn TaskUnit>) -> Result<()> {
        let name = task.name().to_string();
        if self.tasks.contains_key(&name) {
            return Err(Error::DuplicateTask(name));
        }
        task.validate()?;
        self.tasks.insert(name, task);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, task: Arc<dyn TaskUnit>) -> Result<Self> {
        self.register(task)?;
        Ok(self)
    }

    /// Look up a unit by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn TaskUnit>> {
        self.tasks.get(name)
    }

    /// Like [`get`](Self::get), but unknown names are an error.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn TaskUnit>> {
        self.get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownTask(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Every unit carrying a periodic schedule.
    pub fn scheduled(&self) -> Vec<ScheduledTaskInfo> {
        self.tasks
            .values()
            .filter_map(|task| {
                task.schedule().map(|periodic| ScheduledTaskInfo {
                    name: task.name().to_string(),
                    schedule: periodic.recurrence.to_string(),
                    queue: periodic.queue.clone(),
                    periodic,
                })
            })
            .collect()
    }
}

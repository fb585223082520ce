//! Built-in task catalogue.

pub mod data;
pub mod etl;
pub mod scheduled;

use std::sync::Arc;

pub use data::{DataProcessTask, DataValidationTask, data_pipeline};
pub use etl::{ExtractTask, LoadTask, TransformTask, etl_workflow};
pub use scheduled::{DailyEtlTask, DataCleanupTask, HealthCheckTask, WeeklyReportTask};

use crate::error::Result;
use crate::registry::TaskRegistry;

/// Registry holding every built-in unit, scheduled ones included.
pub fn builtin_registry() -> Result<TaskRegistry> {
    TaskRegistry::empty()
        .with(Arc::new(DataProcessTask))?
        .with(Arc::new(DataValidationTask))?
        .with(Arc::new(data_pipeline()))?
        .with(Arc::new(ExtractTask))?
        .with(Arc::new(TransformTask))?
        .with(Arc::new(LoadTask))?
        .with(Arc::new(etl_workflow()?))?
        .with(Arc::new(HealthCheckTask))?
        .with(Arc::new(DataCleanupTask))?
        .with(Arc::new(DailyEtlTask::new()?))?
        .with(Arc::new(WeeklyReportTask::new()))
}

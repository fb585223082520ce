//! Error types for powercap-rs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("task '{0}' is not registered")]
    UnknownTask(String),

    #[error("task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("workflow step '{0}' is already defined")]
    DuplicateStep(String),

    #[error("workflow step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("workflow dependency cycle among steps: {}", .steps.join(", "))]
    DependencyCycle { steps: Vec<String> },

    #[error("invalid run record {run_id}: {message}")]
    InvalidRecord { run_id: String, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("state store error: {0}")]
    Store(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

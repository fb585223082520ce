//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.
//!
//! Every setting is looked up with the environment's prefix first
//! (`TEST_REDIS_URL`, `PROD_REDIS_URL`, ...) and then bare.

pub mod secrets;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::DEFAULT_QUEUE;
use crate::task::RetryPolicy;
use secrecy::SecretString;

const DEFAULT_TEST_REDIS_URL: &str = "redis://localhost:6379/0";

/// Deployment environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Test,
    Prod,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Test => "test",
            Environment::Prod => "prod",
        }
    }

    /// Variable prefix for environment-specific overrides.
    pub fn prefix(self) -> &'static str {
        match self {
            Environment::Test => "TEST_",
            Environment::Prod => "PROD_",
        }
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "prod" => Ok(Environment::Prod),
            other => Err(Error::Config(format!(
                "ENVIRONMENT must be 'test' or 'prod', got '{other}'"
            ))),
        }
    }
}

/// Worker loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub queues: Vec<String>,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub visibility_timeout: Duration,
    /// Hard limit on one attempt of a run.
    pub time_limit: Duration,
}

impl WorkerSettings {
    /// Renewal period for in-flight deliveries: a third of the visibility
    /// timeout.
    pub fn heartbeat_interval(&self) -> Duration {
        self.visibility_timeout / 3
    }
}

#[derive(Debug)]
pub struct Config {
    pub environment: Environment,
    pub redis_url: SecretString,
    /// Required only by commands that talk to the pgmq broker.
    pub database_url: Option<SecretString>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Key namespace for run records.
    pub state_namespace: Option<String>,
    pub worker: WorkerSettings,
    pub retry: RetryPolicy,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call [`load_env_files`] before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let environment = match lookup("ENVIRONMENT") {
            Some(raw) => raw.parse()?,
            None => Environment::default(),
        };
        let vars = Vars {
            lookup: &lookup,
            environment,
        };

        let redis_url = match (vars.get("REDIS_URL"), environment) {
            (Some(url), _) => url,
            (None, Environment::Test) => DEFAULT_TEST_REDIS_URL.to_string(),
            (None, Environment::Prod) => return Err(vars.missing("REDIS_URL")),
        };

        let queues: Vec<String> = vars
            .get("WORKER_QUEUES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|q| !q.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let queues = if queues.is_empty() {
            vec![DEFAULT_QUEUE.to_string()]
        } else {
            queues
        };

        let concurrency: usize = vars.parsed("WORKER_CONCURRENCY", 2)?;
        if concurrency == 0 {
            return Err(Error::Config("WORKER_CONCURRENCY must be at least 1".to_string()));
        }
        let max_retries: u32 = vars.parsed("TASK_MAX_RETRIES", 3)?;
        let visibility_secs: u64 = vars.parsed("WORKER_VISIBILITY_TIMEOUT_SECS", 60)?;
        if visibility_secs < 3 {
            return Err(Error::Config(
                "WORKER_VISIBILITY_TIMEOUT_SECS must be at least 3".to_string(),
            ));
        }
        let time_limit_secs: u64 = vars.parsed("TASK_TIME_LIMIT_SECS", 3600)?;
        if time_limit_secs == 0 {
            return Err(Error::Config("TASK_TIME_LIMIT_SECS must be at least 1".to_string()));
        }

        Ok(Self {
            environment,
            redis_url: SecretString::from(redis_url),
            database_url: vars.get("DATABASE_URL").map(SecretString::from),
            otel_endpoint: vars.get("OTEL_ENDPOINT"),
            log_level: vars.get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            state_namespace: vars.get("STATE_NAMESPACE"),
            worker: WorkerSettings {
                queues,
                concurrency,
                poll_interval: Duration::from_millis(vars.parsed("WORKER_POLL_INTERVAL_MS", 1000)?),
                visibility_timeout: Duration::from_secs(visibility_secs),
                time_limit: Duration::from_secs(time_limit_secs),
            },
            retry: RetryPolicy {
                max_attempts: max_retries.max(1),
                delay: Duration::from_secs(vars.parsed("TASK_RETRY_DELAY_SECS", 60)?),
            },
        })
    }

    /// The database URL, or a config error naming the missing variable.
    pub fn require_database_url(&self) -> Result<&SecretString> {
        self.database_url.as_ref().ok_or_else(|| {
            Error::Config(format!(
                "required environment variable {}DATABASE_URL (or DATABASE_URL) is not set",
                self.environment.prefix()
            ))
        })
    }
}

struct Vars<'a, F> {
    lookup: &'a F,
    environment: Environment,
}

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{}{name}", self.environment.prefix()))
            .or_else(|| (self.lookup)(name))
            .filter(|v| !v.is_empty())
    }

    fn parsed<T: FromStr>(&self, name: &str, default: T) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("invalid value for {name}: {e}"))),
            None => Ok(default),
        }
    }

    fn missing(&self, name: &str) -> Error {
        Error::Config(format!(
            "required environment variable {}{name} (or {name}) is not set",
            self.environment.prefix()
        ))
    }
}

/// The env file for the selected environment: `ENV_FILE` if set, else
/// `{environment}.env`.
pub fn env_file() -> PathBuf {
    if let Ok(path) = std::env::var("ENV_FILE") {
        return PathBuf::from(path);
    }
    let environment = std::env::var("ENVIRONMENT")
        .ok()
        .and_then(|raw| raw.parse::<Environment>().ok())
        .unwrap_or_default();
    PathBuf::from(format!("{}.env", environment.as_str()))
}

/// Load the environment's env file, then `.env`. Variables already set in
/// the process win. Returns the files that were found.
pub fn load_env_files() -> Vec<PathBuf> {
    let mut loaded = Vec::new();
    if let Ok(path) = dotenvy::from_filename(env_file()) {
        loaded.push(path);
    }
    if let Ok(path) = dotenvy::dotenv() {
        loaded.push(path);
    }
    loaded
}

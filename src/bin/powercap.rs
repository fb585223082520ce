//! powercap CLI: operator interface to the task orchestration core.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use powercap_rs::beat::Beat;
use powercap_rs::broker::{Broker, PgmqBroker};
use powercap_rs::config::secrets::{ExposeSecret, redacted_url};
use powercap_rs::config::{Config, load_env_files};
use powercap_rs::model::{RunId, Submission};
use powercap_rs::service::{HealthReport, TaskService};
use powercap_rs::store::{RedisStore, StateStore};
use powercap_rs::tasks::builtin_registry;
use powercap_rs::telemetry::{TelemetryConfig, init_telemetry};
use powercap_rs::tracker::StateTracker;
use powercap_rs::worker::{Worker, WorkerConfig};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "powercap", about = "Async task orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a worker consuming task queues
    Worker {
        /// Comma-separated queues (overrides WORKER_QUEUES)
        #[arg(long, value_delimiter = ',')]
        queues: Option<Vec<String>>,
        /// Maximum concurrent runs (overrides WORKER_CONCURRENCY)
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Run the beat, submitting scheduled tasks when due
    Beat {
        /// Seconds between schedule checks
        #[arg(long, default_value_t = 1)]
        tick_secs: u64,
    },
    /// Task operations
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Check store and broker connectivity
    Health,
    /// Show registered, scheduled and active task counts
    Stats,
}

#[derive(Subcommand)]
enum TaskAction {
    /// Submit a task for asynchronous execution
    Submit {
        /// Registered task name
        task: String,
        /// JSON object of keyword arguments
        #[arg(long)]
        params: Option<String>,
        /// Destination queue
        #[arg(long, default_value = "default")]
        queue: String,
        /// Delay in seconds
        #[arg(long)]
        countdown: Option<u64>,
        /// Earliest execution time (RFC 3339)
        #[arg(long, value_parser = parse_eta)]
        eta: Option<DateTime<Utc>>,
    },
    /// Show the state of a run
    Status {
        run_id: String,
    },
    /// Revoke a run and discard its state
    Cancel {
        run_id: String,
    },
    /// List registered tasks
    List,
    /// List scheduled tasks
    Schedules,
}

fn parse_eta(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 time: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env_files();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "powercap".to_string(),
        log_level: config.log_level.clone(),
    })?;

    match cli.command {
        Command::Worker {
            queues,
            concurrency,
        } => cmd_worker(&config, queues, concurrency).await,
        Command::Beat { tick_secs } => cmd_beat(&config, tick_secs).await,
        Command::Task { action } => cmd_task(&config, action).await,
        Command::Health => cmd_health(&config).await,
        Command::Stats => cmd_stats(&config).await,
    }
}

async fn cmd_task(config: &Config, action: TaskAction) -> anyhow::Result<()> {
    match action {
        TaskAction::List => {
            for name in builtin_registry()?.names() {
                println!("{name}");
            }
            Ok(())
        }
        TaskAction::Schedules => cmd_schedules(),
        TaskAction::Submit {
            task,
            params,
            queue,
            countdown,
            eta,
        } => {
            let conns = Connections::open(config, &config.worker.queues).await?;
            let result = cmd_submit(&conns.service(config)?, task, params, queue, countdown, eta).await;
            conns.close().await;
            result
        }
        TaskAction::Status { run_id } => {
            let conns = Connections::open(config, &[]).await?;
            let result = cmd_status(&conns.service(config)?, run_id).await;
            conns.close().await;
            result
        }
        TaskAction::Cancel { run_id } => {
            let conns = Connections::open(config, &[]).await?;
            let result = conns
                .service(config)?
                .cancel(&RunId::from(run_id.as_str()))
                .await;
            conns.close().await;
            result?;
            println!("Run '{run_id}' has been cancelled");
            Ok(())
        }
    }
}

/// State store and broker, opened at command start and closed on exit.
struct Connections {
    store: RedisStore,
    broker: Arc<PgmqBroker>,
}

impl Connections {
    async fn open(config: &Config, queues: &[String]) -> anyhow::Result<Self> {
        let store = open_store(config).await?;
        let broker = open_broker(config, queues).await?;
        Ok(Self {
            store,
            broker: Arc::new(broker),
        })
    }

    fn tracker(&self, config: &Config) -> StateTracker {
        let tracker = StateTracker::new(Arc::new(self.store.clone()));
        match &config.state_namespace {
            Some(ns) => tracker.with_namespace(ns),
            None => tracker,
        }
    }

    fn service(&self, config: &Config) -> anyhow::Result<TaskService> {
        Ok(TaskService::new(
            Arc::new(builtin_registry()?),
            self.broker.clone(),
            self.tracker(config),
        ))
    }

    async fn close(self) {
        self.broker.close().await;
        self.store.close();
    }
}

async fn open_store(config: &Config) -> powercap_rs::error::Result<RedisStore> {
    tracing::info!(url = %redacted_url(&config.redis_url), "connecting to state store");
    RedisStore::connect(config.redis_url.expose_secret()).await
}

async fn open_broker(config: &Config, queues: &[String]) -> powercap_rs::error::Result<PgmqBroker> {
    let url = config.require_database_url()?;
    tracing::info!(url = %redacted_url(url), "connecting to broker");
    PgmqBroker::connect(url.expose_secret(), config.worker.visibility_timeout, queues).await
}

async fn cmd_worker(
    config: &Config,
    queues: Option<Vec<String>>,
    concurrency: Option<usize>,
) -> anyhow::Result<()> {
    let worker_config = WorkerConfig {
        queues: queues.unwrap_or_else(|| config.worker.queues.clone()),
        concurrency: concurrency.unwrap_or(config.worker.concurrency).max(1),
        poll_interval: config.worker.poll_interval,
        heartbeat_interval: config.worker.heartbeat_interval(),
        time_limit: config.worker.time_limit,
        retry: config.retry,
        ..WorkerConfig::default()
    };

    let conns = Connections::open(config, &worker_config.queues).await?;
    let worker = Worker::new(
        Arc::new(builtin_registry()?),
        conns.broker.clone(),
        conns.tracker(config),
        worker_config,
    );

    let w = worker.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        w.shutdown();
    });

    let result = worker.run().await;
    conns.close().await;
    result?;
    Ok(())
}

async fn cmd_beat(config: &Config, tick_secs: u64) -> anyhow::Result<()> {
    let conns = Connections::open(config, &[]).await?;
    let beat = Arc::new(Beat::new(
        conns.service(config)?,
        Duration::from_secs(tick_secs.max(1)),
    ));

    let b = Arc::clone(&beat);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        b.shutdown();
    });

    let result = beat.run().await;
    conns.close().await;
    result?;
    Ok(())
}

async fn cmd_submit(
    service: &TaskService,
    task: String,
    params: Option<String>,
    queue: String,
    countdown: Option<u64>,
    eta: Option<DateTime<Utc>>,
) -> anyhow::Result<()> {
    let params: serde_json::Map<String, serde_json::Value> = match params {
        Some(json) => serde_json::from_str(&json)?,
        None => serde_json::Map::new(),
    };

    let mut submission = Submission::new(task).params(params).queue(queue);
    if let Some(secs) = countdown {
        submission = submission.countdown(secs);
    }
    if let Some(eta) = eta {
        submission = submission.eta(eta);
    }

    let receipt = service.submit(submission).await?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

async fn cmd_status(service: &TaskService, run_id: String) -> anyhow::Result<()> {
    let record = service.status(&RunId::from(run_id.as_str())).await?;

    println!("Run:        {}", record.run_id);
    println!("Status:     {}", record.status);
    if let Some(ref result) = record.result {
        println!("Result:     {result}");
    }
    if let Some(ref error) = record.error {
        println!("Error:      {error}");
    }
    if let Some(start) = record.start_time {
        println!("Started:    {start}");
    }
    if record.first_start_time != record.start_time {
        if let Some(first) = record.first_start_time {
            println!("First:      {first}");
        }
    }
    if let Some(end) = record.end_time {
        println!("Ended:      {end}");
    }
    if let Some(runtime) = record.runtime {
        println!("Runtime:    {runtime:.3}s");
    }
    Ok(())
}

fn cmd_schedules() -> anyhow::Result<()> {
    let registry = builtin_registry()?;
    let scheduled = registry.scheduled();
    if scheduled.is_empty() {
        println!("No scheduled tasks.");
        return Ok(());
    }

    println!("{:<24}  {:<24}  QUEUE", "NAME", "SCHEDULE");
    println!("{}", "-".repeat(64));
    for info in &scheduled {
        println!("{:<24}  {:<24}  {}", info.name, info.schedule, info.queue);
    }
    Ok(())
}

async fn cmd_health(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config)
        .await
        .map(|store| Arc::new(store) as Arc<dyn StateStore>);
    let broker = open_broker(config, &[])
        .await
        .map(|broker| Arc::new(broker) as Arc<dyn Broker>);

    let report = HealthReport::check(store, broker).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_healthy() {
        anyhow::bail!("unhealthy");
    }
    Ok(())
}

async fn cmd_stats(config: &Config) -> anyhow::Result<()> {
    let conns = Connections::open(config, &[]).await?;
    let stats = conns.service(config)?.stats().await;
    conns.close().await;
    println!("{}", serde_json::to_string_pretty(&stats?)?);
    Ok(())
}

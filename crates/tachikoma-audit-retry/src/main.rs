//! `tachikoma-audit-retry`: standalone replay worker for dead-lettered audit events.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tachikoma_audit_delivery::SqliteAuditStore;
use tachikoma_audit_dlq::{DeadLetterQueue, DlqSettings, SqliteDeadLetterQueue, SystemClock};
use tachikoma_audit_retry::RetryWorker;
use tachikoma_common_async::{build_runtime, RuntimeConfig, ShutdownHandle};
use tachikoma_common_config::{ConfigLoader, DeliveryConfig, Environment};
use tachikoma_common_log::LogConfig;
use tracing::{error, info, warn};

mod cli;

use cli::{Cli, Command, DeadLettersArgs, RunArgs};

/// Process exit codes.
#[repr(u8)]
enum Exit {
    Success = 0,
    GeneralError = 1,
    ConfigError = 2,
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit as u8)
    }
}

fn main() -> ExitCode {
    // Before parsing, so `.env` can supply `TACHIKOMA_CONFIG_PATH`.
    if let Err(e) = Environment::init() {
        eprintln!("{e}");
        return Exit::ConfigError.into();
    }

    let cli = Cli::parse();

    if let Err(e) = tachikoma_common_log::init(LogConfig::from_env()) {
        eprintln!("{e}");
    }

    let runtime = match build_runtime(RuntimeConfig {
        thread_name: "audit-retry".to_string(),
        ..RuntimeConfig::default()
    }) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return Exit::GeneralError.into();
        }
    };

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{e:#}");
            return Exit::ConfigError.into();
        }
    };

    match runtime.block_on(run(cli, config)) {
        Ok(()) => Exit::Success.into(),
        Err(e) => {
            error!("{e:#}");
            Exit::GeneralError.into()
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<DeliveryConfig> {
    let loader = ConfigLoader::new(&cli.project_dir);
    let config = match &cli.config {
        Some(path) => loader
            .load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => loader
            .load()
            .with_context(|| format!("loading {}", loader.config_path().display()))?,
    };
    Ok(config)
}

async fn run(cli: Cli, config: DeliveryConfig) -> anyhow::Result<()> {
    let dlq = open_dlq(&cli.project_dir, &config)?;

    match cli.command {
        Command::Run(args) => run_worker(&cli.project_dir, config, dlq, args).await,
        Command::DeadLetters(args) => list_dead_letters(dlq, args).await,
        Command::Stats => stats(dlq).await,
    }
}

fn open_dlq(project_dir: &Path, config: &DeliveryConfig) -> anyhow::Result<Arc<dyn DeadLetterQueue>> {
    let path = project_dir.join(&config.dlq.path);
    let dlq = SqliteDeadLetterQueue::open(
        &path,
        Arc::new(SystemClock),
        DlqSettings::from_config(&config.dlq),
    )
    .with_context(|| format!("opening dead-letter queue at {}", path.display()))?;
    Ok(Arc::new(dlq))
}

async fn run_worker(
    project_dir: &Path,
    mut config: DeliveryConfig,
    dlq: Arc<dyn DeadLetterQueue>,
    args: RunArgs,
) -> anyhow::Result<()> {
    if let Some(group) = args.group {
        config.worker.consumer_group = group;
    }
    if let Some(consumer) = args.consumer {
        config.worker.consumer_name = Some(consumer);
    }

    let store_path = project_dir.join(&config.storage.path);
    let storage = SqliteAuditStore::open(&store_path)
        .with_context(|| format!("opening audit store at {}", store_path.display()))?;

    let worker = RetryWorker::new(&config.worker, dlq, Arc::new(storage), Arc::new(SystemClock))
        .context("building retry worker")?;
    info!(group = worker.group(), consumer = worker.consumer(), "Starting retry worker");

    if args.once {
        let summary = worker.poll_once().await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let shutdown = ShutdownHandle::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupt received, shutting down"),
                Err(e) => warn!(error = %e, "Could not listen for interrupt; shutting down"),
            }
            shutdown.shutdown();
        });
    }

    worker.run(shutdown.subscribe()).await;
    print!("{}", worker.metrics().render_prometheus());
    Ok(())
}

async fn list_dead_letters(dlq: Arc<dyn DeadLetterQueue>, args: DeadLettersArgs) -> anyhow::Result<()> {
    let records = dlq.dead_letters(args.limit).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No dead letters.");
        return Ok(());
    }

    for record in records {
        println!(
            "{}  {}  {}  attempts={}  correlation={}  error={}",
            record.dead_lettered_at.to_rfc3339(),
            record.event.id(),
            record.event.event_type(),
            record.attempts,
            record.event.correlation_id(),
            record.last_error,
        );
    }
    Ok(())
}

async fn stats(dlq: Arc<dyn DeadLetterQueue>) -> anyhow::Result<()> {
    let pending = dlq.pending_len().await?;
    let dead_letters = dlq.dead_letters(usize::MAX).await?.len();
    println!("pending:      {}", pending);
    println!("dead letters: {}", dead_letters);
    Ok(())
}

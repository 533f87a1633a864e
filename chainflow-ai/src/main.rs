//! chainflow-ai - adaptive multi-phase message chain analysis
//!
//! Subcommands:
//! - `run --input <file>`: process a batch of messages (resumes prior progress)
//! - `retry-failed --input <file>`: reprocess parked messages from their last good phase
//! - `show-config [--write <file>]`: print (and optionally save) the effective configuration

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chainflow_ai::config::{ChainflowConfig, MODULE_NAME};
use chainflow_ai::db::SqliteStore;
use chainflow_ai::metrics::TracingSink;
use chainflow_ai::services::HttpConnector;
use chainflow_ai::{ingest, Pipeline, RunSummary};
use chainflow_common::config::{
    load_toml_config, resolve_config_path, write_toml_config, LoggingConfig, RootFolderInitializer,
    RootFolderResolver,
};
use chainflow_common::events::EventBus;

/// Command-line arguments for chainflow-ai
#[derive(Parser, Debug)]
#[command(name = "chainflow-ai")]
#[command(about = "Adaptive multi-phase analysis of message chains")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "CHAINFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding the database
    #[arg(short, long, global = true, env = "CHAINFLOW_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Override worker count
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a batch of messages
    Run {
        /// JSON file with messages
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Retry parked messages from their last successful phase
    RetryFailed {
        /// JSON file with the messages of the parked chains
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Print the effective configuration
    ShowConfig {
        /// Also write it to this TOML file
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configuration errors are fatal before anything starts
    let config_path = resolve_config_path(args.config.as_deref(), MODULE_NAME);
    let mut config: ChainflowConfig =
        load_toml_config(config_path.as_deref()).context("Failed to load configuration")?;
    config
        .apply_env_overrides()
        .context("Invalid environment override")?;
    if let Some(workers) = args.workers {
        config.pipeline.workers = workers;
    }
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging)?;

    info!("Starting chainflow-ai");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Config: {}", path.display());
    }

    let (input, retry_failed) = match args.command {
        Command::ShowConfig { write } => {
            println!("{}", toml::to_string_pretty(&config)?);
            if let Some(path) = write {
                write_toml_config(&config, &path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!("Configuration written to {}", path.display());
            }
            return Ok(());
        }
        Command::Run { input } => (input, false),
        Command::RetryFailed { input } => (input, true),
    };
    let chains = ingest::load_chains(&input)?;

    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder.clone())
        .with_toml_root(config.root_folder.clone())
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;
    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());

    let pool = chainflow_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;
    let store = Arc::new(SqliteStore::new(pool, config.database.max_lock_wait_ms));
    let connector = Arc::new(HttpConnector::new(
        config.inference.clone(),
        config.pipeline.rate.max_requests_per_minute,
    ));
    info!(
        endpoint = %config.inference.endpoint,
        model = %config.inference.model,
        workers = config.pipeline.workers,
        "Inference endpoint configured"
    );

    let event_bus = EventBus::new(256);
    let mut events = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(?event, "Pipeline event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event log lagging");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let pipeline = Pipeline::new(config, store, connector)?
        .with_event_bus(event_bus)
        .with_sink(Arc::new(TracingSink));

    let shutdown = pipeline.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received, finishing in-flight tasks");
        shutdown.cancel();
    });

    let summary = if retry_failed {
        pipeline.retry_parked(chains).await?
    } else {
        pipeline.run_batch(chains).await?
    };

    report(&summary);
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("chainflow_ai={0},chainflow_common={0}", logging.level)));

    match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
    Ok(())
}

fn report(summary: &RunSummary) {
    info!(
        run_id = %summary.run_id,
        chains = summary.chains,
        complete_chains = summary.complete_chains,
        messages = summary.messages,
        enqueued = summary.messages_enqueued,
        skipped = summary.messages_skipped,
        completed = summary.messages_completed,
        parked = summary.messages_parked,
        fallback_rate = format!("{:.2}", summary.metrics.fallback_rate),
        "Run finished"
    );
    if summary.drained_by_shutdown {
        warn!("Run drained by shutdown; rerun to resume remaining messages");
    }
    if summary.halted {
        warn!("Run halted: store unreachable");
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

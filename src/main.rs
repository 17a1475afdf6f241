//! gridbroker - command queue broker for grid and cloud task execution.
//!
//! Main entry point: loads configuration, opens the queue store and
//! runs the polling and controller loops until interrupted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gridbroker_core::ExecutorAdapter;
use gridbroker_daemon::{ControllerLoop, HandlerRegistry, PollingLoop};
use gridbroker_store::QueueStore;

use crate::adapters::EchoExecutor;
use crate::config::{BrokerConfig, ConfigLoader};

mod adapters;
mod config;

/// gridbroker CLI.
#[derive(Parser)]
#[command(name = "gridbroker")]
#[command(about = "Command queue broker for grid and cloud task execution")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the broker in foreground (default)
    Run {
        /// Database file path (overrides the configuration file)
        #[arg(long)]
        database: Option<PathBuf>,
    },
}

/// Initialize tracing with console and file output.
///
/// Log files are written to the configured log directory with daily
/// rotation, keeping 30 days of history.
fn init_tracing(log_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("gridbroker")
        .filename_suffix("log")
        .max_log_files(30)
        .build(log_dir)?;

    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer guard alive for the program duration.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(_guard);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        // Console layer (human-readable text format with colors)
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(true)
        )
        // File layer (text format without colors)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
        )
        .init();

    Ok(())
}

/// Load the configuration file, falling back to defaults when the
/// default path does not exist.
fn load_config(path: &Path) -> Result<BrokerConfig, Box<dyn std::error::Error>> {
    if path.exists() {
        Ok(ConfigLoader::load(path)?)
    } else {
        Ok(BrokerConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;

    match cli.command {
        None => {}
        Some(Commands::Run { database }) => {
            if let Some(path) = database {
                config.database.path = path;
            }
        }
    }

    init_tracing(&config.log.dir)?;
    config.daemon.validate()?;

    run_broker(config).await
}

/// Run the broker in foreground until Ctrl-C.
async fn run_broker(config: BrokerConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting gridbroker v{}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database.path.display());

    if let Some(parent) = config.database.path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let store = Arc::new(QueueStore::open(&config.database.path).await?);
    info!("Queue store ready (schema patch {})", store.schema_version().await?);

    let adapter: Arc<dyn ExecutorAdapter> = Arc::new(EchoExecutor::new());
    info!("Executor adapter: {}", adapter.target());

    let registry = Arc::new(HandlerRegistry::standard(
        adapter.clone(),
        config.daemon.max_retry,
    ));

    let polling = Arc::new(PollingLoop::new(
        store.clone(),
        registry,
        config.daemon.clone(),
    ));
    let controller = Arc::new(ControllerLoop::new(store, adapter, config.daemon.clone()));

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let polling_handle = tokio::spawn(polling.run(shutdown_tx.subscribe()));
    let controller_handle = tokio::spawn(controller.run(shutdown_tx.subscribe()));

    info!("gridbroker ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    if shutdown_tx.send(()).is_err() {
        error!("Both loops already stopped");
    }
    let _ = tokio::join!(polling_handle, controller_handle);

    info!("gridbroker stopped");
    Ok(())
}

//! Main entry point for the Duo Matchmaker service
//!
//! Without a subcommand the binary runs as the supervisor: it launches one
//! worker process per slot by re-executing itself with `worker --slot N`,
//! and relaunches any worker that exits.

use anyhow::Result;
use clap::{Parser, Subcommand};
use duo_matchmaker::config::AppConfig;
use duo_matchmaker::error::STARTUP_FAILURE_EXIT_CODE;
use duo_matchmaker::service::WorkerApp;
use duo_matchmaker::supervisor::{ProcessLauncher, WorkerPool};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, info_span, Instrument};

/// Duo Matchmaker - pairs waiting players into game rooms
#[derive(Parser)]
#[command(
    name = "duo-matchmaker",
    version,
    about = "Pairs waiting players two at a time and assigns each pair a game room",
    long_about = "Duo Matchmaker runs a pool of identical worker processes. Each worker \
                 atomically takes two waiting players and one available room from a shared \
                 Redis store, hands each player one of the room's credentials, and publishes \
                 the match."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(
        short,
        long,
        global = true,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Enable debug mode
    #[arg(short, long, global = true, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Store URL override
    #[arg(long, global = true, value_name = "URL", help = "Override Redis URL")]
    store_url: Option<String>,

    /// Worker count override
    #[arg(
        short,
        long,
        global = true,
        value_name = "N",
        help = "Number of worker processes (0 = one per CPU)"
    )]
    workers: Option<usize>,

    /// Metrics port override
    #[arg(
        long,
        global = true,
        value_name = "PORT",
        help = "Override base metrics port (worker N binds PORT + N)"
    )]
    metrics_port: Option<u16>,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        global = true,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Run the worker pool supervisor (default)
    Supervise,
    /// Run a single matchmaking worker
    Worker {
        /// Slot of this worker in the pool
        #[arg(long, default_value_t = 0)]
        slot: usize,
    },
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    info!("Duo Matchmaker");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Workers: {}", config.worker_count());
    info!("   Store: {}", config.store.url);
    info!(
        "   Queues: {} / {}",
        config.store.waiting_queue_key, config.store.room_queue_key
    );
    info!("   Cadence: {}ms", config.matchmaking.target_period_ms);
    if config.service.metrics_enabled {
        info!("   Metrics base port: {}", config.service.metrics_port);
    }
}

/// Load and merge configuration from environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    // Apply CLI overrides
    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(store_url) = &args.store_url {
        config.store.url = store_url.clone();
    }

    if let Some(workers) = args.workers {
        config.service.workers = workers;
    }

    if let Some(metrics_port) = args.metrics_port {
        config.service.metrics_port = metrics_port;
    }

    duo_matchmaker::config::validate_config(&config)?;
    Ok(config)
}

/// Arguments that make a worker resolve the same configuration as its supervisor
fn worker_args(args: &Args, config: &AppConfig) -> Vec<String> {
    let mut forwarded = Vec::new();
    if let Some(path) = &args.config {
        forwarded.push("--config".to_string());
        forwarded.push(path.display().to_string());
    }
    forwarded.push("--log-level".to_string());
    forwarded.push(config.service.log_level.clone());
    forwarded.push("--store-url".to_string());
    forwarded.push(config.store.url.clone());
    forwarded.push("--metrics-port".to_string());
    forwarded.push(config.service.metrics_port.to_string());
    forwarded
}

async fn run_supervisor(args: &Args, config: AppConfig) -> Result<()> {
    let launcher = ProcessLauncher::current_exe(worker_args(args, &config))?;
    let pool = WorkerPool::new(config.worker_count(), Arc::new(launcher));

    tokio::select! {
        result = pool.run() => result?,
        _ = wait_for_shutdown_signal() => {
            info!("Shutdown signal received, stopping {} workers", pool.size());
        }
    }

    // Dropping the pool's tasks kills their child processes
    Ok(())
}

async fn run_worker(config: AppConfig, slot: usize) {
    let mut app = match WorkerApp::connect(config, slot).await {
        Ok(app) => app,
        Err(e) => {
            error!("Worker failed to start: {}", e);
            std::process::exit(e.exit_code());
        }
    };

    tokio::select! {
        result = app.run() => {
            if let Err(e) = result {
                error!("Worker stopped: {}", e);
                std::process::exit(e.exit_code());
            }
        }
        _ = wait_for_shutdown_signal() => {}
    }

    app.shutdown().await;
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {:#}", e);
        std::process::exit(STARTUP_FAILURE_EXIT_CODE);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(STARTUP_FAILURE_EXIT_CODE);
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    match args.command.unwrap_or(Command::Supervise) {
        Command::Supervise => {
            display_startup_banner(&config);
            if let Err(e) = run_supervisor(&args, config).await {
                error!("Supervisor failed: {:#}", e);
                std::process::exit(STARTUP_FAILURE_EXIT_CODE);
            }
        }
        Command::Worker { slot } => {
            let span = info_span!("worker", slot, pid = std::process::id());
            run_worker(config, slot).instrument(span).await;
        }
    }

    Ok(())
}

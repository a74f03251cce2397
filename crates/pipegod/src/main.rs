//! pipegod: the pipego scheduler daemon.
//!
//! Loads a scheduler config, brings up the plugin manager and the scheduling
//! pipeline, and serves scheduling requests over HTTP.
//!
//! # Usage
//!
//! ```text
//! pipegod serve --config-file pipego.toml --listen-url 127.0.0.1:28082
//! pipegod validate --config-file pipego.toml
//! ```

mod logger;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pipego_core::{SchedulerConfig, Stage};
use pipego_plugin::{PluginExecutor, PluginManager, Registry};
use pipego_scheduler::Scheduler;

#[derive(Parser)]
#[command(name = "pipegod", version, about = "pipego scheduler daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve scheduling requests over HTTP.
    Serve {
        /// Scheduler config file (.toml).
        #[arg(long)]
        config_file: PathBuf,

        /// Listen address (host:port).
        #[arg(long)]
        listen_url: String,
    },
    /// Check a config file and load every plugin it names.
    Validate {
        /// Scheduler config file (.toml).
        #[arg(long)]
        config_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config_file,
            listen_url,
        } => run_serve(&config_file, &listen_url).await,
        Command::Validate { config_file } => run_validate(&config_file).await,
    }
}

fn load_config(path: &Path) -> anyhow::Result<SchedulerConfig> {
    let config = SchedulerConfig::from_file(path)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

async fn run_serve(config_file: &Path, listen_url: &str) -> anyhow::Result<()> {
    let config = load_config(config_file)?;
    let _log_guard = logger::init(&config.spec.logger).context("failed to initialize logger")?;

    info!(name = %config.metadata.name, "pipego scheduler starting");

    let manager = Arc::new(PluginManager::new(&config, Registry::with_builtins()));
    let scheduler = Arc::new(Scheduler::new(&config, manager));
    scheduler
        .init()
        .await
        .context("failed to initialize scheduler")?;

    let shutdown = CancellationToken::new();
    let router = pipego_api::build_router(scheduler.clone(), shutdown.clone());

    let listener = tokio::net::TcpListener::bind(listen_url)
        .await
        .with_context(|| format!("failed to bind {listen_url}"))?;
    info!(addr = %listen_url, "API server starting");

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await;

    shutdown.cancel();
    scheduler
        .deinit()
        .await
        .context("failed to release plugins")?;
    served.context("API server failed")?;

    info!("pipego scheduler stopped");
    Ok(())
}

async fn run_validate(config_file: &Path) -> anyhow::Result<()> {
    let config = load_config(config_file)?;
    let _log_guard = logger::init(&config.spec.logger).context("failed to initialize logger")?;

    let manager = PluginManager::new(&config, Registry::with_builtins());
    manager.init().await.context("failed to load plugins")?;

    println!("config {} is valid", config_file.display());
    println!("parallelism: {}", config.spec.parallelism);
    for stage in Stage::ALL {
        let names = manager.loaded_names(stage).await;
        println!("{stage}: {}", names.join(", "));
    }

    manager.deinit().await.context("failed to release plugins")?;
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM and cancels in-flight scheduling calls.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
    shutdown.cancel();
}

//! silo-worker - consumes the provisioning queue and builds tenant databases.
//!
//! Settings come from `--config` (TOML, JSON or .env), the process `.env`
//! file and `SILO_*` variables. Logging is configured through `SILO_LOG_*`.
//! The worker runs until SIGINT or SIGTERM, finishing the message in hand.

use clap::Parser;
use silo::DataPlane;
use silo::config::Settings;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

mod error;

use error::WorkerResult;

/// Tenant database provisioning worker
#[derive(Debug, Parser)]
#[command(name = "silo-worker")]
#[command(author, version)]
#[command(about = "Provisions tenant databases from the provisioning queue")]
struct Cli {
    /// Settings file (.toml, .json or .env)
    #[arg(short, long, env = "SILO_CONFIG")]
    config: Option<PathBuf>,

    /// Create the control-plane tables before starting
    #[arg(long)]
    migrate: bool,

    /// Validate settings, check connectivity and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = silo::log::init() {
        eprintln!("silo-worker: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "silo-worker exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> WorkerResult<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    let plane = DataPlane::connect(settings).await?;

    if cli.check {
        let health = plane.health_check().await;
        plane.shutdown().await;
        health?;
        info!("Settings are valid and every backend answered");
        return Ok(());
    }

    if cli.migrate {
        plane.store().migrate().await?;
    }

    let worker = Arc::new(plane.worker()?);
    let handle = worker.start()?;

    let signal = shutdown_signal().await;
    info!("Shutdown requested, waiting for the worker to finish");
    handle.stop().await;
    plane.shutdown().await;

    signal?;
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

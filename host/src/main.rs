//! Tandem host binary
//!
//! Starts the API and web frontend servers and stops both process trees on
//! Ctrl+C (or SIGTERM).

#![allow(unused_crate_dependencies)]

use clap::Parser;
use schema::LaunchMode;
use std::path::PathBuf;
use std::process::ExitCode;
use tandem_core::config::{DATA_DIR_ENV, MODE_ENV};
use tandem_core::Secrets;
use tandem_host::HostOptions;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(about = "Run the Tandem API and web frontend servers")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Launch mode: development or packaged
    #[arg(long, env = MODE_ENV)]
    mode: Option<LaunchMode>,

    /// Directory holding `servers/` (development) or `resources/` (packaged)
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Application data directory shared with the servers
    #[arg(long, env = DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Do not wait for the servers to accept connections
    #[arg(long)]
    no_wait_ready: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = tandem_core::utils::init_tracing(&cli.log_level) {
        eprintln!("Failed to initialize logging [{}]: {}", e.code(), e);
        return ExitCode::from(2);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("[{}] {}", e.code(), e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> tandem_host::Result<()> {
    let options = HostOptions {
        config: cli.config,
        mode: cli.mode,
        base_dir: cli.base_dir,
        data_dir: cli.data_dir,
        wait_ready: !cli.no_wait_ready,
    };

    let file = tandem_host::load_config(options.config.as_deref())?;
    let config = tandem_host::resolve_config(&options, &file, Secrets::from_env())?;
    let mut orchestrator = tandem_core::Orchestrator::system(config);

    let started =
        tandem_host::serve(&mut orchestrator, options.wait_ready, shutdown_signal()).await?;
    info!(
        "Servers on ports {} and {} stopped",
        started.ports.api(),
        started.ports.web()
    );
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on Unix
async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        }
        _ = terminate => info!("Received SIGTERM"),
    }
}

//! `collector` CLI (§6): the external boundary around the
//! [`marketprism_collector::Supervisor`] library. Config + logging live here,
//! not in the library, so the pipeline stays embeddable; the bus transport is
//! out of scope, so this binary plugs in a logging-only [`LoggingBus`] rather
//! than a real message-bus client.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use marketprism_collector::config::{CollectorConfig, LOG_LEVEL_ENV};
use marketprism_collector::{Bus, Supervisor};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "collector", about = "Cryptocurrency market-data ingestion collector")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Starts the collector and runs until SIGINT.
    Run {
        #[arg(long)]
        config: Option<String>,
    },
    /// Parses and validates config without starting anything.
    Validate {
        #[arg(long)]
        config: Option<String>,
    },
}

/// Placeholder [`Bus`] for the boundary binary: the wire format and real
/// transport are out of scope (§1), so this logs every publish instead of
/// shipping it anywhere. A production deployment swaps this for a concrete
/// message-bus client without touching the library.
struct LoggingBus;

#[async_trait::async_trait]
impl Bus for LoggingBus {
    async fn publish(
        &self,
        subject: &str,
        key: &str,
        payload: Vec<u8>,
        _timeout: std::time::Duration,
    ) -> marketprism_collector::publisher::Result<()> {
        info!(subject, key, bytes = payload.len(), "publish");
        Ok(())
    }
}

fn init_logging() {
    let filter = std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Validate { config } => {
            init_logging();
            match CollectorConfig::load(config.as_deref()) {
                Ok(_) => {
                    info!("configuration is valid");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!(error = %e, "configuration is invalid");
                    ExitCode::from(2)
                }
            }
        }
        Command::Run { config } => run(config),
    }
}

fn run(config_path: Option<String>) -> ExitCode {
    init_logging();

    let config = match CollectorConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration is invalid");
            return ExitCode::from(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::from(3);
        }
    };

    runtime.block_on(run_async(config))
}

async fn run_async(config: CollectorConfig) -> ExitCode {
    let supervisor = match Supervisor::new(config, LoggingBus) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            error!(error = %e, "fatal startup error");
            return ExitCode::from(3);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut run_handle = tokio::spawn(supervisor.run(shutdown_rx));

    let mut received_sigint = false;
    let result = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if result.is_err() {
                error!("failed to install SIGINT handler");
            }
            received_sigint = true;
            info!("SIGINT received, shutting down");
            let _ = shutdown_tx.send(true);
            (&mut run_handle).await
        }
        result = &mut run_handle => result,
    };

    let exit = match result {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            error!(error = %e, "supervisor exited with a fatal error");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "supervisor task panicked");
            ExitCode::FAILURE
        }
    };

    if received_sigint {
        ExitCode::from(130)
    } else {
        exit
    }
}

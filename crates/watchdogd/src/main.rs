//! watchdogd - launches the configured programs, relaunches watched ones
//! when they die, and tears everything down on SIGTERM/SIGINT.

mod logging;
mod pidfile;

use anyhow::{Context, Result};
use clap::Parser;
use logging::LogTarget;
use pidfile::PidFile;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal::unix::{signal, SignalKind};
use watchdog_core::{daemon, SupervisorConfig};
use watchdog_supervisor::SupervisorContext;

#[derive(Debug, Parser)]
#[command(name = "watchdogd", version, about = "Minimal process watchdog")]
struct Cli {
    /// TOML configuration; the compiled-in program table is used without one
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Detach from the terminal before starting any program
    #[arg(short, long)]
    daemon: bool,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let target = match LogTarget::select(cli.log_file.as_deref(), cli.daemon) {
        Ok(target) => target,
        Err(e) => {
            eprintln!("watchdogd: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(target);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => SupervisorConfig::load(path)?,
        None => SupervisorConfig::default(),
    };

    // Detaching forks, so it has to happen while the process is single-threaded
    if cli.daemon {
        daemon::daemonize()?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    runtime.block_on(supervise(config))
}

async fn supervise(config: SupervisorConfig) -> Result<()> {
    let mut ctx = SupervisorContext::new(config);
    let terminate = ctx.terminate_token();

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to listen for SIGINT")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            _ = sigint.recv() => tracing::info!("received SIGINT"),
        }
        terminate.cancel();
    });

    // Written after the signal listeners are in place
    let _pid_file = ctx
        .config()
        .pid_file
        .as_deref()
        .map(PidFile::create)
        .transpose()?;

    tracing::info!(pid = std::process::id(), "watchdogd starting");
    let reaped = ctx.run().await?;
    tracing::info!(reaped = reaped.len(), "watchdogd stopped");
    Ok(())
}

//! Logging setup for the daemon
//!
//! Stderr by default. Once detached the standard streams point at
//! `/dev/null`, so a daemon without `--log-file` discards its logs.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "watchdogd=info,watchdog_supervisor=info,watchdog_core=info";

/// Where log lines go
pub enum LogTarget {
    Stderr,
    File(File),
    Discard,
}

impl LogTarget {
    /// Pick the target before daemonizing, so an opened log file never
    /// lands on a standard stream descriptor that gets closed.
    pub fn select(log_file: Option<&Path>, detach: bool) -> Result<Self> {
        match log_file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open log file {}", path.display()))?;
                Ok(Self::File(file))
            }
            None if detach => Ok(Self::Discard),
            None => Ok(Self::Stderr),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init(target: LogTarget) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let (writer, ansi) = match target {
        LogTarget::Stderr => (BoxMakeWriter::new(std::io::stderr), true),
        LogTarget::File(file) => (BoxMakeWriter::new(Mutex::new(file)), false),
        LogTarget::Discard => (BoxMakeWriter::new(std::io::sink), false),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .init();
}

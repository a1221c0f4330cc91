//! Error types for the watchdog primitives

use nix::errno::Errno;
use nix::unistd::Pid;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the request channel
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to create request pipe: {0}")]
    Create(#[source] Errno),

    #[error("request channel is already initialized")]
    AlreadyInitialized,

    #[error("request channel is not initialized")]
    NotInitialized,

    #[error("request channel is closed")]
    Closed,

    #[error("request channel I/O failed: {0}")]
    Io(#[source] Errno),

    #[error("short write on request channel ({written} of {expected} bytes)")]
    ShortWrite { written: usize, expected: usize },

    #[error("request channel ended in the middle of a record ({read} of {expected} bytes)")]
    TruncatedRecord { read: usize, expected: usize },
}

/// Failure to start a program
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to spawn {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("spawned {} but the OS reported no usable pid", path.display())]
    MissingPid { path: PathBuf },
}

/// A genuine failure of the reap primitive, as opposed to "nothing to reap"
#[derive(Debug, Error)]
#[error("waitpid failed: {0}")]
pub struct ReapError(#[source] pub Errno);

/// Signal delivery failed, usually because the target is already gone
#[derive(Debug, Error)]
#[error("failed to kill pid {pid}: {source}")]
pub struct TerminateError {
    pub pid: Pid,
    #[source]
    pub source: Errno,
}

/// Daemonization misuse; OS failures while detaching exit the process instead
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("process has already been daemonized")]
    AlreadyDetached,
}

/// Problems loading or validating a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("program #{index} has an empty path")]
    EmptyPath { index: usize },

    #[error("backoff multiplier must be >= 1.0, got {0}")]
    InvalidMultiplier(f64),
}

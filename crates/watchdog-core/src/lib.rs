//! Watchdog Core
//!
//! OS-facing building blocks for a minimal process watchdog:
//! - Launching programs with a fully blocked signal mask
//! - A pipe-backed request channel carrying process identifiers
//! - Non-blocking reaping and forced termination of children
//! - One-shot daemonization
//! - Program descriptors, the registry and configuration

pub mod channel;
pub mod config;
pub mod daemon;
pub mod error;
pub mod launcher;
pub mod program;
pub mod reap;

pub use channel::RequestChannel;
pub use config::{BackoffConfig, RestartPolicy, SupervisorConfig};
pub use error::{ChannelError, ConfigError, DaemonError, LaunchError, ReapError, TerminateError};
pub use program::{ProgramDescriptor, ProgramSpec, Registry, StdoutMode};
pub use reap::{ExitKind, TerminationRecord};

pub use nix::unistd::Pid;

//! One-shot daemonization
//!
//! Forks once, lets the parent exit successfully, makes the child a session
//! leader and closes its standard streams. Descriptors 0-2 are then pointed
//! at `/dev/null` so later descriptors (runtime internals, log files) never
//! land on them. A supervisor that cannot detach
//! cannot run as a daemon, so any OS failure in this sequence ends the
//! process with a failure status.
//!
//! Must run before any other thread exists (in particular before an async
//! runtime is built) and before any child is spawned.

use crate::error::DaemonError;
use nix::errno::Errno;
use nix::libc;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{close, dup2, fork, setsid, ForkResult};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

static DETACHED: AtomicBool = AtomicBool::new(false);

/// Steps of the detach sequence, named in the fatal error log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStep {
    Fork,
    NewSession,
    CloseStdio,
    NullStdio,
}

impl fmt::Display for DaemonStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fork => f.write_str("fork"),
            Self::NewSession => f.write_str("setsid"),
            Self::CloseStdio => f.write_str("close stdio"),
            Self::NullStdio => f.write_str("reopen stdio on /dev/null"),
        }
    }
}

/// Detach from the controlling terminal. Returns in the detached child only.
pub fn daemonize() -> Result<(), DaemonError> {
    if DETACHED.swap(true, Ordering::SeqCst) {
        return Err(DaemonError::AlreadyDetached);
    }

    // SAFETY: callers guarantee the process is still single-threaded, so the
    // child may keep running arbitrary code after the fork.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            tracing::debug!(%child, "detached; parent exiting");
            std::process::exit(libc::EXIT_SUCCESS);
        }
        Ok(ForkResult::Child) => {}
        Err(e) => fatal(DaemonStep::Fork, e),
    }

    if let Err(e) = setsid() {
        fatal(DaemonStep::NewSession, e);
    }

    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if let Err(e) = close(fd) {
            fatal(DaemonStep::CloseStdio, e);
        }
    }

    if let Err(e) = null_stdio() {
        fatal(DaemonStep::NullStdio, e);
    }

    Ok(())
}

/// Whether [`daemonize`] has already run in this process
pub fn is_detached() -> bool {
    DETACHED.load(Ordering::SeqCst)
}

fn null_stdio() -> Result<(), Errno> {
    let null = open("/dev/null", OFlag::O_RDWR, Mode::empty())?;
    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if fd != null {
            dup2(null, fd)?;
        }
    }
    if null > libc::STDERR_FILENO {
        close(null)?;
    }
    Ok(())
}

fn fatal(step: DaemonStep, errno: Errno) -> ! {
    tracing::error!(%step, error = %errno, "daemonization failed");
    std::process::exit(libc::EXIT_FAILURE);
}

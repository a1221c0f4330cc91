//! Reaping and terminating child processes
//!
//! Reaping is always non-blocking (`WNOHANG` on any child). "No child has
//! exited yet" and "no children exist" are both ordinary outcomes; only a
//! genuine `waitpid` failure is reported as [`ReapError`].

use crate::error::{ReapError, TerminateError};
use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fmt;
use std::time::Duration;

/// How a child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    NormalExit(i32),
    /// Raw signal number; realtime signals have no [`Signal`] variant
    Signaled(i32),
}

impl ExitKind {
    /// The terminating signal, when it is one `nix` can name
    pub fn signal(&self) -> Option<Signal> {
        match *self {
            Self::Signaled(raw) => Signal::try_from(raw).ok(),
            Self::NormalExit(_) => None,
        }
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self, self.signal()) {
            (Self::NormalExit(code), _) => write!(f, "exited with code {code}"),
            (Self::Signaled(_), Some(signal)) => write!(f, "killed by {}", signal.as_str()),
            (Self::Signaled(raw), None) => write!(f, "killed by signal {raw}"),
        }
    }
}

/// A reaped child and how it ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationRecord {
    pub pid: Pid,
    pub exit: ExitKind,
}

/// Outcome of a single non-blocking reap attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapPoll {
    Reaped(TerminationRecord),
    /// Children exist but none has terminated
    Pending,
    /// The process has no children left
    NoChildren,
}

/// One non-blocking reap of any child
///
/// The wait status is decoded from the raw value: `nix::sys::wait::waitpid`
/// rejects signals outside its `Signal` enum after the child is already
/// gone, which would lose the record.
pub fn poll_child() -> Result<ReapPoll, ReapError> {
    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: `status` is a valid out-pointer for the duration of the call.
        let reaped = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };

        match reaped {
            0 => return Ok(ReapPoll::Pending),
            -1 => match Errno::last() {
                Errno::ECHILD => return Ok(ReapPoll::NoChildren),
                Errno::EINTR => continue,
                e => return Err(ReapError(e)),
            },
            raw => {
                let exit = if libc::WIFEXITED(status) {
                    ExitKind::NormalExit(libc::WEXITSTATUS(status))
                } else if libc::WIFSIGNALED(status) {
                    ExitKind::Signaled(libc::WTERMSIG(status))
                } else {
                    // Stop/continue notifications are not terminations
                    tracing::trace!(pid = raw, status, "ignoring non-terminal wait status");
                    continue;
                };
                return Ok(ReapPoll::Reaped(TerminationRecord {
                    pid: Pid::from_raw(raw),
                    exit,
                }));
            }
        }
    }
}

/// Reap one terminated child if there is one
pub fn find_terminated() -> Result<Option<TerminationRecord>, ReapError> {
    match poll_child()? {
        ReapPoll::Reaped(record) => Ok(Some(record)),
        ReapPoll::Pending | ReapPoll::NoChildren => Ok(None),
    }
}

/// Deliver `SIGKILL` to `pid`
pub fn terminate(pid: Pid) -> Result<(), TerminateError> {
    kill(pid, Signal::SIGKILL).map_err(|source| TerminateError { pid, source })
}

/// Reap until the process has no children, sleeping `poll_interval` between
/// attempts while children are still alive. Returns everything reaped.
pub fn wait_exit_all(poll_interval: Duration) -> Result<Vec<TerminationRecord>, ReapError> {
    let mut reaped = Vec::new();
    loop {
        match poll_child()? {
            ReapPoll::Reaped(record) => reaped.push(record),
            ReapPoll::Pending => std::thread::sleep(poll_interval),
            ReapPoll::NoChildren => return Ok(reaped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_lookup() {
        assert_eq!(ExitKind::Signaled(libc::SIGTERM).signal(), Some(Signal::SIGTERM));
        assert_eq!(ExitKind::Signaled(libc::SIGRTMIN()).signal(), None);
        assert_eq!(ExitKind::NormalExit(0).signal(), None);
    }

    #[test]
    fn test_exit_kind_display() {
        assert_eq!(ExitKind::NormalExit(3).to_string(), "exited with code 3");
        assert_eq!(
            ExitKind::Signaled(libc::SIGKILL).to_string(),
            "killed by SIGKILL"
        );
        assert_eq!(
            ExitKind::Signaled(libc::SIGRTMIN() + 2).to_string(),
            format!("killed by signal {}", libc::SIGRTMIN() + 2)
        );
    }
}

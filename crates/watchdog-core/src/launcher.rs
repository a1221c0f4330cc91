//! Program launcher
//!
//! Starts a program image with `argv = [path, args...]` and the inherited
//! environment. Every signal is blocked in the child before the new image
//! takes over, so no handler can run before the program has initialized
//! itself. The returned pid is reaped through [`crate::reap`], never through
//! a `Child` handle.

use crate::error::LaunchError;
use crate::program::{ProgramDescriptor, StdoutMode};
use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow};
use nix::unistd::Pid;
use std::ffi::OsStr;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};

/// Launch `path` with `args`; no retry is attempted on failure
pub fn launch<P, S>(path: P, args: &[S], stdout: StdoutMode) -> Result<Pid, LaunchError>
where
    P: AsRef<Path>,
    S: AsRef<OsStr>,
{
    let path = path.as_ref();
    let mut command = Command::new(path);
    command.args(args);

    match stdout {
        StdoutMode::Null => {
            command.stdout(Stdio::null());
        }
        StdoutMode::Inherit | StdoutMode::Closed => {}
    }

    let mask = SigSet::all();
    let close_stdout = stdout == StdoutMode::Closed;

    // SAFETY: the hook runs between fork and exec and only makes
    // async-signal-safe calls (sigprocmask, close) on stack data.
    unsafe {
        command.pre_exec(move || {
            pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&mask), None)?;
            // Already closed in the parent counts as closed
            if close_stdout {
                match nix::unistd::close(libc::STDOUT_FILENO) {
                    Ok(()) | Err(Errno::EBADF) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(())
        });
    }

    let child = command.spawn().map_err(|source| LaunchError::Spawn {
        path: path.to_path_buf(),
        source,
    })?;

    let pid = i32::try_from(child.id())
        .ok()
        .filter(|raw| *raw > 0)
        .map(Pid::from_raw)
        .ok_or_else(|| LaunchError::MissingPid {
            path: path.to_path_buf(),
        })?;

    tracing::debug!(path = %path.display(), %pid, "launched program");
    Ok(pid)
}

/// Launch the program a registry entry describes
pub fn launch_descriptor(program: &ProgramDescriptor) -> Result<Pid, LaunchError> {
    launch(&program.path, &program.args, program.stdout)
}

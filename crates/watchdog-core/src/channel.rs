//! Request channel
//!
//! A close-on-exec pipe carrying fixed-width pid records from producers to
//! the monitoring context. Both endpoints are owned descriptors, so they are
//! closed exactly once whether the channel is destroyed explicitly or
//! dropped on an early return.
//!
//! Any number of producers may write and any number of consumers may read.
//! A record is the native-endian `pid_t`, well below `PIPE_BUF`, so
//! concurrent writes never interleave and each record reaches exactly one
//! reader. The read end is non-blocking; a blocking [`RequestChannel::recv`]
//! parks in `poll` under a shared lock, so it never stalls a concurrent
//! [`RequestChannel::try_recv`].

use crate::error::ChannelError;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd::Pid;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Size in bytes of one pid record on the wire
pub const RECORD_LEN: usize = std::mem::size_of::<nix::libc::pid_t>();

pub struct RequestChannel {
    reader: RwLock<Option<OwnedFd>>,
    writer: RwLock<Option<OwnedFd>>,
}

impl RequestChannel {
    /// Allocate the pipe. Fails when the descriptor table is exhausted.
    pub fn open() -> Result<Self, ChannelError> {
        let (reader, writer) = nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(ChannelError::Create)?;
        fcntl(reader.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK))
            .map_err(ChannelError::Create)?;
        tracing::debug!(
            read_fd = reader.as_raw_fd(),
            write_fd = writer.as_raw_fd(),
            "request channel opened"
        );
        Ok(Self {
            reader: RwLock::new(Some(reader)),
            writer: RwLock::new(Some(writer)),
        })
    }

    /// Write one pid record
    pub fn send(&self, pid: Pid) -> Result<(), ChannelError> {
        let writer = shared(&self.writer);
        let fd = writer.as_ref().ok_or(ChannelError::Closed)?;
        let record = pid.as_raw().to_ne_bytes();

        loop {
            match nix::unistd::write(fd, &record) {
                Ok(written) if written == RECORD_LEN => return Ok(()),
                Ok(written) => {
                    return Err(ChannelError::ShortWrite {
                        written,
                        expected: RECORD_LEN,
                    })
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(ChannelError::Io(e)),
            }
        }
    }

    /// Block until one record arrives. `Ok(None)` means every writer is gone.
    pub fn recv(&self) -> Result<Option<Pid>, ChannelError> {
        let reader = shared(&self.reader);
        let fd = reader.as_ref().ok_or(ChannelError::Closed)?;
        read_record(fd, true)
    }

    /// Read one record only if it is available right now.
    ///
    /// `Ok(None)` covers both an empty pipe and end of stream.
    pub fn try_recv(&self) -> Result<Option<Pid>, ChannelError> {
        let reader = shared(&self.reader);
        let fd = reader.as_ref().ok_or(ChannelError::Closed)?;
        read_record(fd, false)
    }

    /// Close the write end only, waking every blocked [`recv`](Self::recv)
    /// with end of stream. Later sends fail with [`ChannelError::Closed`].
    pub fn close_writer(&self) -> bool {
        exclusive(&self.writer).take().is_some()
    }

    /// Close both endpoints. The writer goes first so readers blocked in
    /// `recv` are released before their endpoint is reclaimed.
    pub fn destroy(&self) -> Result<(), ChannelError> {
        let had_writer = self.close_writer();
        let had_reader = exclusive(&self.reader).take().is_some();
        if had_writer || had_reader {
            tracing::debug!("request channel destroyed");
            Ok(())
        } else {
            Err(ChannelError::Closed)
        }
    }

    pub fn is_open(&self) -> bool {
        shared(&self.reader).is_some()
    }
}

impl std::fmt::Debug for RequestChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestChannel")
            .field("reader_open", &shared(&self.reader).is_some())
            .field("writer_open", &shared(&self.writer).is_some())
            .finish()
    }
}

/// Read one whole record. An empty pipe yields `Ok(None)` unless `block`
/// is set; a record already started is always completed.
fn read_record(fd: &OwnedFd, block: bool) -> Result<Option<Pid>, ChannelError> {
    let mut record = [0u8; RECORD_LEN];
    let mut filled = 0;

    while filled < RECORD_LEN {
        match nix::unistd::read(fd.as_raw_fd(), &mut record[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(ChannelError::TruncatedRecord {
                    read: filled,
                    expected: RECORD_LEN,
                })
            }
            Ok(n) => filled += n,
            Err(Errno::EAGAIN) if filled == 0 && !block => return Ok(None),
            Err(Errno::EAGAIN) => wait_readable(fd)?,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(ChannelError::Io(e)),
        }
    }

    Ok(Some(Pid::from_raw(i32::from_ne_bytes(record))))
}

fn wait_readable(fd: &OwnedFd) -> Result<(), ChannelError> {
    let mut fds = [PollFd::new(fd.as_fd(), PollFlags::POLLIN)];
    match poll(&mut fds, PollTimeout::NONE) {
        Ok(_) | Err(Errno::EINTR) => Ok(()),
        Err(e) => Err(ChannelError::Io(e)),
    }
}

fn shared<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn exclusive<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let channel = RequestChannel::open().unwrap();
        channel.send(Pid::from_raw(1234)).unwrap();
        assert_eq!(channel.recv().unwrap(), Some(Pid::from_raw(1234)));
    }

    #[test]
    fn test_try_recv_on_empty_channel() {
        let channel = RequestChannel::open().unwrap();
        assert_eq!(channel.try_recv().unwrap(), None);

        channel.send(Pid::from_raw(9)).unwrap();
        assert_eq!(channel.try_recv().unwrap(), Some(Pid::from_raw(9)));
        assert_eq!(channel.try_recv().unwrap(), None);
    }

    #[test]
    fn test_close_writer_signals_end_of_stream() {
        let channel = RequestChannel::open().unwrap();
        channel.send(Pid::from_raw(5)).unwrap();
        assert!(channel.close_writer());

        assert_eq!(channel.recv().unwrap(), Some(Pid::from_raw(5)));
        assert_eq!(channel.recv().unwrap(), None);
        assert!(matches!(
            channel.send(Pid::from_raw(6)),
            Err(ChannelError::Closed)
        ));
    }

    #[test]
    fn test_destroy_twice() {
        let channel = RequestChannel::open().unwrap();
        channel.destroy().unwrap();
        assert!(!channel.is_open());
        assert!(matches!(channel.destroy(), Err(ChannelError::Closed)));
    }
}

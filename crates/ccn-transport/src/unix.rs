//! Non-blocking unix stream transport with poll(2) readiness.

use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::path::Path;

use log::debug;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::config::socket_path;
use crate::error::TransportError;

/// What a poll round observed on the socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// The stream socket to the local daemon.
///
/// All I/O is non-blocking: reads and writes return `Ok(0)` on would-block,
/// and the caller decides whether to queue or to poll.
#[derive(Debug)]
pub struct UnixTransport {
    stream: UnixStream,
}

impl UnixTransport {
    /// Connect to the daemon; `None` resolves the path from the environment.
    pub fn connect(name: Option<&str>) -> crate::Result<UnixTransport> {
        let path = socket_path(name);
        debug!("connecting to daemon at {}", path.display());
        Self::connect_path(&path)
    }

    pub fn connect_path(path: &Path) -> crate::Result<UnixTransport> {
        let stream = UnixStream::connect(path)?;
        Self::from_stream(stream)
    }

    /// Wrap an existing stream (used by tests with socketpairs).
    pub fn from_stream(stream: UnixStream) -> crate::Result<UnixTransport> {
        stream.set_nonblocking(true)?;
        Ok(UnixTransport { stream })
    }

    /// Read into `buf`. `Ok(0)` means nothing available right now; a closed
    /// peer is an error.
    pub fn read(&mut self, buf: &mut [u8]) -> crate::Result<usize> {
        match self.stream.read(buf) {
            Ok(0) if !buf.is_empty() => Err(TransportError::ConnectionClosed),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Write from `buf`, returning how many bytes were taken. `Ok(0)` means
    /// the socket would block.
    pub fn write(&mut self, buf: &[u8]) -> crate::Result<usize> {
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Wait up to `timeout_ms` for readability (and writability when
    /// `want_write`). A negative timeout waits indefinitely.
    pub fn poll(&self, want_write: bool, timeout_ms: i32) -> crate::Result<Readiness> {
        let mut events = PollFlags::POLLIN;
        if want_write {
            events |= PollFlags::POLLOUT;
        }
        let timeout = if timeout_ms < 0 {
            PollTimeout::NONE
        } else {
            PollTimeout::from(timeout_ms.min(i32::from(u16::MAX)) as u16)
        };
        let mut fds = [PollFd::new(self.stream.as_fd(), events)];
        match poll(&mut fds, timeout) {
            Ok(0) => Ok(Readiness::default()),
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                Ok(Readiness {
                    readable: revents
                        .intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR),
                    writable: revents.contains(PollFlags::POLLOUT),
                })
            }
            Err(nix::errno::Errno::EINTR) => Ok(Readiness::default()),
            Err(e) => Err(TransportError::Io(e.into())),
        }
    }
}

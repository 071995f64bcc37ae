use crate::buffer::{Buffer, Transitions};
use crate::error::ChannelError;
use crate::reactor::Direction;
use crate::reactor::poller::platform::{sys_read, sys_write};

use std::io;
use std::os::fd::RawFd;

use tracing::trace;

/// Result of one readiness-driven syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// The syscall moved `bytes` (zero on a read means end of stream) and the
    /// buffer reported `transitions`.
    Moved {
        bytes: usize,
        transitions: Transitions,
    },

    /// Nothing to do now: the call would block, was interrupted, or the
    /// buffer had no room (read) or no data (write).
    Idle,
}

/// Couples one descriptor and one direction to the reactor.
///
/// A binding only performs the syscall and reports what the buffer saw. It
/// never changes its own interest; the owning channel does that through
/// [`Readiness`](crate::Readiness) and records the result here.
#[derive(Debug)]
pub struct Binding {
    fd: RawFd,
    direction: Direction,
    armed: bool,
}

impl Binding {
    pub(crate) fn new(fd: RawFd, direction: Direction) -> Self {
        Self {
            fd,
            direction,
            armed: false,
        }
    }

    /// The descriptor this binding performs syscalls on.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Whether this binding reads or writes.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether the reactor is watching this descriptor for this direction.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Records the interest state; returns `true` if it changed.
    pub(crate) fn set_armed(&mut self, armed: bool) -> bool {
        let changed = self.armed != armed;
        self.armed = armed;
        changed
    }

    /// Performs one non-blocking syscall between the descriptor and `buffer`.
    ///
    /// Reads go into the free tail of the buffer and writes take the stored
    /// prefix, so the byte counts handed to the buffer always respect its
    /// bounds.
    pub(crate) fn transfer(&self, buffer: &mut Buffer) -> Result<Transfer, ChannelError> {
        match self.direction {
            Direction::Read => self.pull(buffer),
            Direction::Write => self.push(buffer),
        }
    }

    fn pull(&self, buffer: &mut Buffer) -> Result<Transfer, ChannelError> {
        if buffer.remaining() == 0 || buffer.is_eof() {
            return Ok(Transfer::Idle);
        }

        let bytes = match sys_read(self.fd, buffer.spare_mut()) {
            Ok(n) => n,
            Err(e) if is_transient(&e) => return Ok(Transfer::Idle),
            Err(e) => return Err(e.into()),
        };

        trace!(fd = self.fd, bytes, "read");

        let transitions = buffer.appended(bytes)?;
        Ok(Transfer::Moved { bytes, transitions })
    }

    fn push(&self, buffer: &mut Buffer) -> Result<Transfer, ChannelError> {
        if buffer.is_empty() {
            return Ok(Transfer::Idle);
        }

        let bytes = match sys_write(self.fd, buffer.filled()) {
            Ok(n) => n,
            Err(e) if is_transient(&e) => return Ok(Transfer::Idle),
            Err(e) => return Err(e.into()),
        };

        trace!(fd = self.fd, bytes, "wrote");

        let transitions = buffer.removed(bytes)?;
        Ok(Transfer::Moved { bytes, transitions })
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

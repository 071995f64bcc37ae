//! Readiness reactor.
//!
//! This module owns everything that talks to the operating system's
//! readiness facility:
//! - the platform poller (epoll on Linux, kqueue on macOS and FreeBSD),
//! - the per-descriptor interest table,
//! - the command queue through which channels arm and disarm interest.
//!
//! Channels never see the poller. They only hold something implementing
//! [`Readiness`], normally a [`ReactorHandle`], and the reactor applies the
//! queued interest changes between two polls.

mod core;

pub(crate) mod command;
pub(crate) mod event;
pub(crate) mod poller;

pub use core::{Failure, Reactor, ReactorHandle};
pub use event::Event;

use std::fmt;
use std::io;
use std::os::fd::RawFd;

/// The two readiness directions a descriptor can be watched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

/// The minimal reactor capability a channel needs: starting and stopping
/// interest in one direction of one descriptor.
///
/// Implementations must not call back into the channel; the reactor reports
/// readiness later, by the caller invoking
/// [`Channel::on_ready`](crate::Channel::on_ready).
pub trait Readiness {
    /// Starts watching `fd` for `direction`.
    fn arm(&self, fd: RawFd, direction: Direction) -> io::Result<()>;

    /// Stops watching `fd` for `direction`.
    fn disarm(&self, fd: RawFd, direction: Direction) -> io::Result<()>;
}

impl<R: Readiness + ?Sized> Readiness for std::rc::Rc<R> {
    fn arm(&self, fd: RawFd, direction: Direction) -> io::Result<()> {
        (**self).arm(fd, direction)
    }

    fn disarm(&self, fd: RawFd, direction: Direction) -> io::Result<()> {
        (**self).disarm(fd, direction)
    }
}

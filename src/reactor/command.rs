use super::Direction;

use std::os::fd::RawFd;

/// A request queued for the reactor by a [`ReactorHandle`](super::ReactorHandle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Arm { fd: RawFd, direction: Direction },
    Disarm { fd: RawFd, direction: Direction },
    Shutdown,
}

impl Command {
    /// The descriptor this command targets, if any.
    pub(crate) fn fd(&self) -> Option<RawFd> {
        match *self {
            Command::Arm { fd, .. } | Command::Disarm { fd, .. } => Some(fd),
            Command::Shutdown => None,
        }
    }
}

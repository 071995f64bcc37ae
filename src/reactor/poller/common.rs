use crate::reactor::Direction;

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// Directions a descriptor is currently registered for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    pub(crate) fn contains(self, direction: Direction) -> bool {
        match direction {
            Direction::Read => self.read,
            Direction::Write => self.write,
        }
    }

    /// Returns a copy with `direction` switched on or off.
    pub(crate) fn with(mut self, direction: Direction, on: bool) -> Self {
        match direction {
            Direction::Read => self.read = on,
            Direction::Write => self.write = on,
        }
        self
    }

    pub(crate) fn is_empty(self) -> bool {
        !self.read && !self.write
    }
}

/// Wake-up source shared between the poller and reactor handles.
///
/// The descriptor is closed when the last owner drops, so a handle that
/// outlives its reactor never writes into a recycled descriptor.
pub(crate) struct Waker(pub(crate) OwnedFd);

impl Waker {
    pub(crate) fn fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

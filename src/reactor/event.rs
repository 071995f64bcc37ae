use std::os::fd::RawFd;

/// An I/O event reported by the poller.
///
/// Hang-up and error conditions are folded into both flags so the armed
/// direction gets to observe them through its next syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// The descriptor that became ready.
    pub fd: RawFd,

    /// Indicates that the descriptor is readable.
    pub readable: bool,

    /// Indicates that the descriptor is writable.
    pub writable: bool,
}

//! Error types.
//!
//! Two layers are distinguished:
//! - [`BufferError`] reports a broken buffer contract (a caller asked for more
//!   room or more bytes than exist). It is a programming error, surfaced as a
//!   value so it cannot silently corrupt the buffer.
//! - [`ChannelError`] is what channel operations and handler hooks return. An
//!   error reaching the channel dispatch path force-closes that channel only.

use std::io;

use thiserror::Error;

/// A broken [`Buffer`](crate::Buffer) contract.
///
/// The buffer state is left untouched when one of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    /// More bytes were reported appended than the buffer has room for.
    #[error("appended {requested} bytes but only {available} are free")]
    Overflow { requested: usize, available: usize },

    /// More bytes were reported removed than the buffer holds.
    #[error("removed {requested} bytes but only {length} are stored")]
    Underflow { requested: usize, length: usize },

    /// Data was appended after end of stream was recorded.
    #[error("appended {requested} bytes after end of stream")]
    AfterEndOfStream { requested: usize },
}

/// Errors produced by channel operations and handler hooks.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A buffer contract was broken.
    #[error("buffer contract violated: {0}")]
    Buffer(#[from] BufferError),

    /// A read, write or interest change failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The application protocol rejected the peer.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The channel has already closed.
    #[error("channel is closed")]
    Closed,
}

impl ChannelError {
    /// Builds a [`ChannelError::Protocol`] from any displayable message.
    pub fn protocol(message: impl Into<String>) -> Self {
        ChannelError::Protocol(message.into())
    }
}

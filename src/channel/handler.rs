use super::Channel;
use crate::error::ChannelError;

/// Application hooks invoked by a [`Channel`].
///
/// The channel is passed back to every hook together with its typed
/// context, so a handler can serve any number of channels.
pub trait Handler {
    /// Per-channel application state.
    type Context;

    /// New inbound data is available in [`Channel::input`].
    ///
    /// The hook consumes what it handled with [`Channel::consume`] (possibly
    /// nothing, if no complete unit is available or its answer does not fit
    /// yet) and queues output with [`Channel::send`]. Bytes left unconsumed
    /// are offered again when more data arrives or when a write frees output
    /// room.
    ///
    /// Once the peer has finished sending, the write that empties the
    /// outbound buffer closes the channel instead: input still held at that
    /// point is dropped without another call.
    ///
    /// Returning an error force-closes the channel with that error.
    fn on_data(&mut self, channel: &mut Channel<Self::Context>) -> Result<(), ChannelError>;

    /// The channel closed; [`Channel::close_reason`] says why.
    ///
    /// Called exactly once per channel. The owner should release the
    /// channel's descriptors once this returns.
    fn on_close(&mut self, channel: &mut Channel<Self::Context>) {
        let _ = channel;
    }
}

/// Why a channel closed.
#[derive(Debug)]
pub enum CloseReason {
    /// The peer finished sending and every queued byte was written.
    Finished,

    /// The channel was torn down early.
    Forced(ChannelError),
}

impl CloseReason {
    /// Returns `true` unless the channel finished normally.
    pub fn is_forced(&self) -> bool {
        matches!(self, CloseReason::Forced(_))
    }
}

//! Connection driver.
//!
//! The [`Driver`] is the owner the channel layer assumes but never names: it
//! runs the reactor loop, accepts connections, keeps one [`Channel`] per
//! connection in a bounded registry and releases each channel's descriptors
//! once the channel reports it has closed.
//!
//! [`Channel`]: crate::Channel

mod builder;
mod driver;
mod listener;

pub use builder::DriverBuilder;
pub use driver::Driver;
pub use listener::Peer;

use crate::channel::Handler;

/// A [`Handler`] that can also admit new connections.
pub trait Accept: Handler {
    /// Builds the context for a connection from `peer`, or returns `None`
    /// to turn it away.
    fn on_accept(&mut self, peer: &Peer) -> Option<Self::Context>;
}

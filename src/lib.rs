//! Flow-controlled duplex byte channels over a readiness reactor.
//!
//! The crate is layered bottom-up:
//! - [`buffer`]: a fixed-capacity byte buffer that reports edge-triggered
//!   [`Transition`]s,
//! - [`reactor`]: epoll/kqueue readiness with a command queue,
//! - [`channel`]: the [`Channel`] state machine that turns buffer transitions
//!   into reactor interest (backpressure) and closes exactly once,
//! - [`server`]: a [`Driver`] that accepts connections and owns channels.

pub mod buffer;
pub mod channel;
pub mod error;
pub mod reactor;
pub mod server;

mod utils;

pub use buffer::{Buffer, Transition, Transitions};
pub use channel::{Binding, Channel, CloseReason, Endpoints, Handler, Transfer};
pub use error::{BufferError, ChannelError};
pub use reactor::{Direction, Event, Failure, Reactor, ReactorHandle, Readiness};
pub use server::{Accept, Driver, DriverBuilder, Peer};
pub use utils::slab::Token;

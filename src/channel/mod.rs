//! Duplex channels.
//!
//! A [`Channel`] pairs an inbound buffer, filled from a read descriptor, with
//! an outbound buffer, drained into a write descriptor. It turns the
//! buffers' transitions into reactor interest changes:
//!
//! | buffer signal        | effect                                          |
//! |----------------------|-------------------------------------------------|
//! | inbound full         | stop reading                                    |
//! | inbound non-full     | resume reading (unless end of stream was seen)  |
//! | inbound end of stream| stop reading for good; close if nothing to send |
//! | inbound data         | [`Handler::on_data`]                            |
//! | outbound non-empty   | start writing                                   |
//! | outbound empty       | stop writing; close if the peer has finished    |
//!
//! A channel closes exactly once, when the inbound side has reached end of
//! stream *and* the outbound side has been flushed, whichever happens last.
//! It never frees anything itself: it calls [`Handler::on_close`] and leaves
//! the release of descriptors to its owner.

mod binding;
mod handler;

pub use binding::{Binding, Transfer};
pub use handler::{CloseReason, Handler};

use crate::buffer::{Buffer, Transition, Transitions};
use crate::error::ChannelError;
use crate::reactor::{Direction, Readiness};

use std::fmt;
use std::os::fd::RawFd;

use tracing::{debug, info, trace, warn};

/// The descriptors a channel reads from and writes to.
///
/// Sockets use the same descriptor for both directions; pipes and standard
/// streams use two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub read: RawFd,
    pub write: RawFd,
}

impl Endpoints {
    /// One descriptor used in both directions.
    pub fn duplex(fd: RawFd) -> Self {
        Self { read: fd, write: fd }
    }

    /// Separate descriptors for each direction.
    pub fn split(read: RawFd, write: RawFd) -> Self {
        Self { read, write }
    }
}

enum State {
    Open,
    Closed {
        reason: CloseReason,
        /// Whether `on_close` has run.
        notified: bool,
    },
}

/// A flow-controlled, bidirectional byte channel.
///
/// Created with reading armed and writing disarmed: there is nothing to send
/// yet, and arming a writable socket with an empty buffer would spin.
pub struct Channel<C> {
    inbound: Buffer,
    outbound: Buffer,

    reader: Binding,
    writer: Binding,

    reactor: Box<dyn Readiness>,

    context: C,

    state: State,
}

impl<C> Channel<C> {
    /// Creates a channel and arms its read side.
    ///
    /// Both buffers must start empty and without end of stream; the
    /// descriptors must be non-blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the reactor refuses the initial read interest.
    pub fn new(
        endpoints: Endpoints,
        inbound: Buffer,
        outbound: Buffer,
        context: C,
        reactor: impl Readiness + 'static,
    ) -> Result<Self, ChannelError> {
        debug_assert!(inbound.is_empty() && !inbound.is_eof());
        debug_assert!(outbound.is_empty() && !outbound.is_eof());

        let mut channel = Self {
            inbound,
            outbound,
            reader: Binding::new(endpoints.read, Direction::Read),
            writer: Binding::new(endpoints.write, Direction::Write),
            reactor: Box::new(reactor),
            context,
            state: State::Open,
        };

        channel.set_interest(Direction::Read, true)?;

        Ok(channel)
    }

    /// The application state attached to this channel.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Mutable access to the application state.
    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// The descriptors this channel reads from and writes to.
    pub fn endpoints(&self) -> Endpoints {
        Endpoints::split(self.reader.fd(), self.writer.fd())
    }

    /// The buffer filled from the read descriptor.
    pub fn inbound(&self) -> &Buffer {
        &self.inbound
    }

    /// The buffer drained into the write descriptor.
    pub fn outbound(&self) -> &Buffer {
        &self.outbound
    }

    /// The read side's reactor binding.
    pub fn reader(&self) -> &Binding {
        &self.reader
    }

    /// The write side's reactor binding.
    pub fn writer(&self) -> &Binding {
        &self.writer
    }

    /// Bytes received and not consumed yet.
    pub fn input(&self) -> &[u8] {
        self.inbound.filled()
    }

    /// Returns `true` once the channel has closed, gracefully or not.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed { .. })
    }

    /// Why the channel closed, once it has.
    pub fn close_reason(&self) -> Option<&CloseReason> {
        match &self.state {
            State::Open => None,
            State::Closed { reason, .. } => Some(reason),
        }
    }

    /// Marks the first `n` input bytes as handled.
    ///
    /// Freeing room in a full inbound buffer resumes reading.
    pub fn consume(&mut self, n: usize) -> Result<(), ChannelError> {
        let transitions = self.inbound.removed(n)?;
        self.inbound_changed(transitions)?;
        Ok(())
    }

    /// Queues `bytes` for writing.
    ///
    /// All or nothing: if `bytes` does not fit in the free outbound space,
    /// nothing is queued and [`BufferError::Overflow`](crate::BufferError::Overflow)
    /// is returned.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let transitions = self.outbound.extend_from_slice(bytes)?;
        self.outbound_changed(transitions)
    }

    /// The free outbound space, for writing output in place.
    ///
    /// Bytes written here are queued by [`commit_output`](Self::commit_output).
    pub fn output_space(&mut self) -> &mut [u8] {
        self.outbound.spare_mut()
    }

    /// Queues the first `n` bytes of [`output_space`](Self::output_space).
    ///
    /// Committing zero bytes does nothing.
    pub fn commit_output(&mut self, n: usize) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        if n == 0 {
            return Ok(());
        }

        let transitions = self.outbound.appended(n)?;
        self.outbound_changed(transitions)
    }

    /// Stops reading as if the peer had finished sending.
    ///
    /// Queued output is still flushed; the channel closes once it is.
    pub fn close_input(&mut self) -> Result<(), ChannelError> {
        if self.inbound.is_eof() {
            return Ok(());
        }

        let transitions = self.inbound.appended(0)?;
        self.inbound_changed(transitions)?;
        Ok(())
    }

    /// Tears the channel down immediately.
    ///
    /// End of stream is forced on the inbound side, queued output is
    /// discarded and both interests are dropped. Has no effect on a channel
    /// that is already closed. [`Handler::on_close`] runs at the end of the
    /// current dispatch, or straight away through [`abort`](Self::abort).
    pub fn force_close(&mut self, error: ChannelError) {
        if self.is_closed() {
            debug!(fd = self.reader.fd(), %error, "error after close ignored");
            return;
        }

        warn!(
            read_fd = self.reader.fd(),
            write_fd = self.writer.fd(),
            %error,
            "channel force-closed"
        );

        self.state = State::Closed {
            reason: CloseReason::Forced(error),
            notified: false,
        };

        if !self.inbound.is_eof() {
            let _ = self.inbound.appended(0);
        }
        let _ = self.outbound.removed(self.outbound.len());

        for direction in [Direction::Read, Direction::Write] {
            if let Err(error) = self.set_interest(direction, false) {
                debug!(%direction, %error, "disarm during forced close failed");
            }
        }
    }

    /// Force-closes the channel and runs [`Handler::on_close`] if it has not
    /// run yet.
    pub fn abort<H>(&mut self, error: ChannelError, handler: &mut H)
    where
        H: Handler<Context = C> + ?Sized,
    {
        self.force_close(error);
        self.notify_close(handler);
    }

    /// Reactor dispatch entry point: `direction` of this channel is ready.
    ///
    /// Performs at most one syscall, reacts to the resulting transitions and
    /// invokes the handler hooks. Readiness for a direction that is not
    /// armed (a stale event) is ignored. Any error force-closes the channel.
    pub fn on_ready<H>(&mut self, direction: Direction, handler: &mut H)
    where
        H: Handler<Context = C> + ?Sized,
    {
        if !self.is_closed() {
            let outcome = match direction {
                Direction::Read => self.ready_to_read(handler),
                Direction::Write => self.ready_to_write(handler),
            };

            if let Err(error) = outcome {
                self.force_close(error);
            }
        }

        self.notify_close(handler);
    }

    fn ready_to_read<H>(&mut self, handler: &mut H) -> Result<(), ChannelError>
    where
        H: Handler<Context = C> + ?Sized,
    {
        if !self.reader.is_armed() {
            trace!(fd = self.reader.fd(), "stale read readiness");
            return Ok(());
        }

        match self.reader.transfer(&mut self.inbound)? {
            Transfer::Idle => Ok(()),
            Transfer::Moved { bytes, transitions } => {
                if bytes == 0 {
                    debug!(fd = self.reader.fd(), "peer finished sending");
                }

                if self.inbound_changed(transitions)? {
                    handler.on_data(self)?;
                }

                Ok(())
            }
        }
    }

    fn ready_to_write<H>(&mut self, handler: &mut H) -> Result<(), ChannelError>
    where
        H: Handler<Context = C> + ?Sized,
    {
        if !self.writer.is_armed() {
            trace!(fd = self.writer.fd(), "stale write readiness");
            return Ok(());
        }

        match self.writer.transfer(&mut self.outbound)? {
            Transfer::Idle => Ok(()),
            Transfer::Moved { bytes, transitions } => {
                self.outbound_changed(transitions)?;

                // Output room was freed: offer input the handler left behind.
                if bytes > 0 && !self.is_closed() && !self.inbound.is_empty() {
                    handler.on_data(self)?;
                }

                Ok(())
            }
        }
    }

    /// Applies inbound transitions; returns `true` if new data landed.
    fn inbound_changed(&mut self, transitions: Transitions) -> Result<bool, ChannelError> {
        let mut data = false;

        for transition in transitions {
            match transition {
                Transition::Full => self.set_interest(Direction::Read, false)?,
                Transition::NonFull => {
                    if !self.inbound.is_eof() {
                        self.set_interest(Direction::Read, true)?;
                    }
                }
                Transition::Eof => {
                    self.set_interest(Direction::Read, false)?;
                    self.settle();
                }
                Transition::Data => data = true,
                Transition::NonEmpty | Transition::Empty => {}
            }
        }

        Ok(data)
    }

    fn outbound_changed(&mut self, transitions: Transitions) -> Result<(), ChannelError> {
        for transition in transitions {
            match transition {
                Transition::NonEmpty => self.set_interest(Direction::Write, true)?,
                Transition::Empty => {
                    self.set_interest(Direction::Write, false)?;
                    self.settle();
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Closes the channel if the peer has finished and nothing is queued.
    fn settle(&mut self) {
        if matches!(self.state, State::Open) && self.inbound.is_eof() && self.outbound.is_empty() {
            info!(
                read_fd = self.reader.fd(),
                write_fd = self.writer.fd(),
                "channel finished"
            );

            self.state = State::Closed {
                reason: CloseReason::Finished,
                notified: false,
            };
        }
    }

    fn notify_close<H>(&mut self, handler: &mut H)
    where
        H: Handler<Context = C> + ?Sized,
    {
        match &mut self.state {
            State::Closed { notified, .. } if !*notified => *notified = true,
            _ => return,
        }

        handler.on_close(self);
    }

    /// Arms or disarms one direction, talking to the reactor only when the
    /// state actually changes.
    fn set_interest(&mut self, direction: Direction, armed: bool) -> Result<(), ChannelError> {
        let binding = match direction {
            Direction::Read => &mut self.reader,
            Direction::Write => &mut self.writer,
        };

        if !binding.set_armed(armed) {
            return Ok(());
        }

        let fd = binding.fd();
        debug!(fd, %direction, armed, "interest");

        let result = if armed {
            self.reactor.arm(fd, direction)
        } else {
            self.reactor.disarm(fd, direction)
        };

        if let Err(error) = result {
            binding.set_armed(!armed);
            return Err(error.into());
        }

        Ok(())
    }
}

impl<C> fmt::Debug for Channel<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("inbound", &self.inbound)
            .field("outbound", &self.outbound)
            .field("reader", &self.reader)
            .field("writer", &self.writer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

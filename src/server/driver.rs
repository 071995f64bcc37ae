use super::Accept;
use super::builder::Settings;
use super::listener::Listener;

use crate::buffer::Buffer;
use crate::channel::{Channel, Endpoints};
use crate::error::ChannelError;
use crate::reactor::poller::platform::sys_set_nonblocking;
use crate::reactor::{Direction, Event, Failure, Reactor, ReactorHandle, Readiness};
use crate::utils::slab::{Slab, Token};

use std::collections::HashMap;
use std::io;
use std::mem;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

/// How long a listener stays disarmed after `accept` failed for a reason
/// other than an empty queue.
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// A channel together with the descriptors it runs on.
///
/// Dropping a connection closes its descriptors, so it must only be dropped
/// after the reactor has forgotten them.
struct Connection<C> {
    channel: Channel<C>,
    _fds: Vec<OwnedFd>,
}

/// Single-threaded event loop serving channels with one handler.
///
/// Built by [`DriverBuilder`](super::DriverBuilder).
pub struct Driver<H: Accept> {
    reactor: Reactor,
    handle: ReactorHandle,

    handler: H,
    settings: Settings,

    connections: Slab<Connection<H::Context>>,

    /// Every descriptor of every open channel, mapped to its channel.
    routes: HashMap<RawFd, Token>,

    listeners: HashMap<RawFd, Listener>,

    /// Listeners disarmed after a failed `accept`, re-armed at `resume_at`
    /// or as soon as a channel is released.
    paused: Vec<RawFd>,
    resume_at: Option<Instant>,

    events: Vec<Event>,
    next_heartbeat: Option<Instant>,
}

impl<H: Accept> Driver<H> {
    pub(crate) fn new(settings: Settings, handler: H) -> io::Result<Self> {
        let reactor = Reactor::new()?;
        let handle = reactor.handle();

        Ok(Self {
            reactor,
            handle,
            handler,
            settings,
            connections: Slab::new(settings.max_channels),
            routes: HashMap::new(),
            listeners: HashMap::new(),
            paused: Vec::new(),
            resume_at: None,
            events: Vec::new(),
            next_heartbeat: settings.heartbeat.map(|period| Instant::now() + period),
        })
    }

    /// A handle for stopping the driver from another thread.
    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// The handler shared by every channel.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Mutable access to the handler, between turns.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Number of open channels.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if no channel is open.
    pub fn is_empty(&self) -> bool {
        self.connections.len() == 0
    }

    /// The open channel behind `token`, or `None` once it was released.
    pub fn channel(&self, token: Token) -> Option<&Channel<H::Context>> {
        self.connections.get(token).map(|c| &c.channel)
    }

    /// Serves a socket (or any descriptor usable in both directions).
    pub fn attach(&mut self, fd: impl Into<OwnedFd>, context: H::Context) -> io::Result<Token> {
        let fd = fd.into();
        let endpoints = Endpoints::duplex(fd.as_raw_fd());

        self.register(vec![fd], endpoints, context)
    }

    /// Serves a pair of one-way descriptors, such as two pipes.
    pub fn attach_split(
        &mut self,
        read: impl Into<OwnedFd>,
        write: impl Into<OwnedFd>,
        context: H::Context,
    ) -> io::Result<Token> {
        let (read, write) = (read.into(), write.into());
        let endpoints = Endpoints::split(read.as_raw_fd(), write.as_raw_fd());

        self.register(vec![read, write], endpoints, context)
    }

    /// Serves standard input and output through duplicated descriptors.
    ///
    /// Both streams are switched to non-blocking mode, which the duplicates
    /// share with the originals.
    pub fn attach_stdio(&mut self, context: H::Context) -> io::Result<Token> {
        let read = io::stdin().as_fd().try_clone_to_owned()?;
        let write = io::stdout().as_fd().try_clone_to_owned()?;

        self.attach_split(read, write, context)
    }

    /// Accepts connections on a Unix socket at `path`.
    ///
    /// A file already at `path` is removed first; the socket file is removed
    /// again when the driver is dropped.
    pub fn listen_unix(&mut self, path: impl AsRef<Path>) -> io::Result<()> {
        let listener = Listener::bind_unix(path.as_ref())?;
        self.listen(listener)?;
        Ok(())
    }

    /// Accepts TCP connections; returns the bound address.
    pub fn listen_tcp(&mut self, addr: impl ToSocketAddrs) -> io::Result<SocketAddr> {
        let listener = Listener::bind_tcp(addr)?;
        let local = listener.local_addr()?;
        self.listen(listener)?;
        Ok(local)
    }

    fn listen(&mut self, listener: Listener) -> io::Result<()> {
        let fd = listener.fd();
        self.handle.arm(fd, Direction::Read)?;

        info!(fd, listener = %listener, "listening");
        self.listeners.insert(fd, listener);
        Ok(())
    }

    /// Runs until shut down through a [`handle`](Self::handle), or until no
    /// listener and no channel is left.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.apply_commands();

            if self.reactor.is_shutdown() {
                info!(channels = self.len(), "driver stopped");
                return Ok(());
            }
            if self.listeners.is_empty() && self.is_empty() {
                info!("nothing left to serve");
                return Ok(());
            }

            self.turn(None)?;
        }
    }

    /// One loop iteration: applies queued interest changes, waits for
    /// readiness at most `timeout` (`None` waits indefinitely) and dispatches
    /// every event.
    ///
    /// Does nothing once the driver has been shut down.
    pub fn turn(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.apply_commands();

        if self.reactor.is_shutdown() {
            return Ok(());
        }

        let timeout = self.clamp_to_deadlines(timeout);

        let mut events = mem::take(&mut self.events);
        let polled = self.reactor.poll(&mut events, timeout);

        if polled.is_ok() {
            for event in &events {
                self.dispatch(*event);
            }
        }

        self.events = events;
        polled?;

        if self.resume_at.is_some_and(|at| Instant::now() >= at) {
            self.resume_listeners();
        }
        self.heartbeat();
        Ok(())
    }

    fn apply_commands(&mut self) {
        for Failure {
            fd,
            direction,
            error,
        } in self.reactor.apply_commands()
        {
            if let Some(&token) = self.routes.get(&fd) {
                if let Some(connection) = self.connections.get_mut(token) {
                    connection
                        .channel
                        .abort(ChannelError::Io(error), &mut self.handler);
                }
                self.release(token);
            } else if let Some(listener) = self.listeners.remove(&fd) {
                error!(fd, %direction, %listener, %error, "listener dropped");
                self.reactor.forget(fd);
            } else {
                debug!(fd, %direction, %error, "failure for unknown descriptor");
            }
        }
    }

    fn dispatch(&mut self, event: Event) {
        if self.listeners.contains_key(&event.fd) {
            if event.readable {
                self.accept_all(event.fd);
            }
            return;
        }

        let Some(&token) = self.routes.get(&event.fd) else {
            trace!(fd = event.fd, "event for released descriptor");
            return;
        };

        if event.readable {
            self.ready(token, event.fd, Direction::Read);
        }
        if event.writable {
            self.ready(token, event.fd, Direction::Write);
        }
    }

    fn ready(&mut self, token: Token, fd: RawFd, direction: Direction) {
        let Some(connection) = self.connections.get_mut(token) else {
            return;
        };

        let endpoints = connection.channel.endpoints();
        let bound = match direction {
            Direction::Read => endpoints.read,
            Direction::Write => endpoints.write,
        };
        if bound != fd {
            return;
        }

        connection.channel.on_ready(direction, &mut self.handler);

        if connection.channel.is_closed() {
            self.release(token);
        }
    }

    fn accept_all(&mut self, fd: RawFd) {
        loop {
            let Some(listener) = self.listeners.get(&fd) else {
                return;
            };

            let (stream, peer) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(fd, error = %e, backoff = ?ACCEPT_BACKOFF, "accept failed, pausing listener");
                    self.pause_listener(fd);
                    return;
                }
            };

            if self.connections.is_full() {
                warn!(%peer, limit = self.settings.max_channels, "channel limit reached, connection dropped");
                continue;
            }

            let Some(context) = self.handler.on_accept(&peer) else {
                info!(%peer, "connection refused by handler");
                continue;
            };

            let endpoints = Endpoints::duplex(stream.as_raw_fd());
            match self.register(vec![stream], endpoints, context) {
                Ok(token) => info!(%peer, %token, "connection accepted"),
                Err(e) => warn!(%peer, error = %e, "could not serve connection"),
            }
        }
    }

    fn register(
        &mut self,
        fds: Vec<OwnedFd>,
        endpoints: Endpoints,
        context: H::Context,
    ) -> io::Result<Token> {
        if self.connections.is_full() {
            return Err(io::Error::other("channel limit reached"));
        }

        for fd in &fds {
            sys_set_nonblocking(fd.as_raw_fd())?;
        }

        let channel = Channel::new(
            endpoints,
            Buffer::with_capacity(self.settings.inbound_capacity),
            Buffer::with_capacity(self.settings.outbound_capacity),
            context,
            self.handle.clone(),
        )
        .map_err(|e| match e {
            ChannelError::Io(e) => e,
            other => io::Error::other(other),
        })?;

        let connection = Connection {
            channel,
            _fds: fds,
        };

        let token = match self.connections.insert(connection) {
            Ok(token) => token,
            Err(connection) => {
                self.reactor.forget(endpoints.read);
                self.reactor.forget(endpoints.write);
                drop(connection);
                return Err(io::Error::other("channel limit reached"));
            }
        };

        self.routes.insert(endpoints.read, token);
        self.routes.insert(endpoints.write, token);

        debug!(%token, read_fd = endpoints.read, write_fd = endpoints.write, "channel registered");
        Ok(token)
    }

    /// Forgets a closed channel's descriptors, then closes them.
    fn release(&mut self, token: Token) {
        let Some(connection) = self.connections.remove(token) else {
            return;
        };

        let endpoints = connection.channel.endpoints();
        for fd in [endpoints.read, endpoints.write] {
            self.routes.remove(&fd);
            self.reactor.forget(fd);
        }

        drop(connection);

        info!(%token, channels = self.len(), "channel released");

        // A descriptor was just freed, so a failed accept may succeed now.
        if !self.paused.is_empty() {
            self.resume_listeners();
        }
    }

    /// Stops watching a listener whose pending connection cannot be
    /// accepted. Left armed, the level-triggered poller would report it
    /// ready on every turn.
    fn pause_listener(&mut self, fd: RawFd) {
        if let Err(error) = self.handle.disarm(fd, Direction::Read) {
            error!(fd, %error, "could not pause listener");
            return;
        }

        if !self.paused.contains(&fd) {
            self.paused.push(fd);
        }
        self.resume_at = Some(Instant::now() + ACCEPT_BACKOFF);
    }

    fn resume_listeners(&mut self) {
        self.resume_at = None;

        for fd in mem::take(&mut self.paused) {
            if !self.listeners.contains_key(&fd) {
                continue;
            }

            match self.handle.arm(fd, Direction::Read) {
                Ok(()) => debug!(fd, "listener resumed"),
                Err(error) => error!(fd, %error, "could not resume listener"),
            }
        }
    }

    /// Shortens `timeout` so the poll returns in time for the next
    /// heartbeat or listener resumption.
    fn clamp_to_deadlines(&self, timeout: Option<Duration>) -> Option<Duration> {
        let now = Instant::now();

        [self.next_heartbeat, self.resume_at]
            .into_iter()
            .flatten()
            .map(|deadline| deadline.saturating_duration_since(now))
            .fold(timeout, |timeout, until| {
                Some(timeout.map_or(until, |t| t.min(until)))
            })
    }

    fn heartbeat(&mut self) {
        let (Some(deadline), Some(period)) = (self.next_heartbeat, self.settings.heartbeat) else {
            return;
        };

        let now = Instant::now();
        if now < deadline {
            return;
        }

        info!(
            channels = self.len(),
            listeners = self.listeners.len(),
            "heartbeat"
        );
        self.next_heartbeat = Some(now + period);
    }
}

use super::command::Command;
use super::event::Event;
use super::poller::Poller;
use super::poller::common::{Interest, Waker};
use super::{Direction, Readiness};

use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::time::Duration;

use tracing::{debug, error, trace};

/// A queued interest change the poller refused.
#[derive(Debug)]
pub struct Failure {
    pub fd: RawFd,
    pub direction: Direction,
    pub error: io::Error,
}

/// The readiness reactor.
///
/// The reactor owns the platform poller and the interest table. Interest
/// changes arrive as commands through [`ReactorHandle`]s and take effect when
/// [`apply_commands`](Self::apply_commands) runs, which the driving loop does
/// before every [`poll`](Self::poll).
pub struct Reactor {
    receiver: Receiver<Command>,
    sender: Sender<Command>,

    /// Commands drained from the receiver but not applied yet.
    pending: VecDeque<Command>,

    poller: Poller,

    /// Current registration of every watched descriptor.
    interests: HashMap<RawFd, Interest>,

    shutdown: bool,
}

impl Reactor {
    /// Creates a reactor with its own poller instance.
    pub fn new() -> io::Result<Self> {
        let (sender, receiver) = channel();

        Ok(Self {
            receiver,
            sender,
            pending: VecDeque::new(),
            poller: Poller::new()?,
            interests: HashMap::new(),
            shutdown: false,
        })
    }

    /// Returns a handle that queues commands for this reactor.
    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            sender: self.sender.clone(),
            waker: self.poller.waker(),
        }
    }

    /// Applies every queued command to the poller, in submission order.
    ///
    /// Interest changes the poller rejects are returned so the caller can
    /// close whatever owns the descriptor; the table entry is left as it was.
    pub fn apply_commands(&mut self) -> Vec<Failure> {
        self.drain_receiver();

        let mut failures = Vec::new();

        while let Some(command) = self.pending.pop_front() {
            let (fd, direction, on) = match command {
                Command::Arm { fd, direction } => (fd, direction, true),
                Command::Disarm { fd, direction } => (fd, direction, false),
                Command::Shutdown => {
                    debug!("reactor shutdown requested");
                    self.shutdown = true;
                    continue;
                }
            };

            let previous = self.interests.get(&fd).copied().unwrap_or_default();
            let next = previous.with(direction, on);

            if previous == next {
                continue;
            }

            match self.poller.update(fd, previous, next) {
                Ok(()) => {
                    trace!(fd, %direction, armed = on, "interest updated");

                    if next.is_empty() {
                        self.interests.remove(&fd);
                    } else {
                        self.interests.insert(fd, next);
                    }
                }
                Err(error) => {
                    error!(fd, %direction, armed = on, %error, "interest update rejected");
                    failures.push(Failure {
                        fd,
                        direction,
                        error,
                    });
                }
            }
        }

        failures
    }

    /// Drops every trace of `fd`: its registration, its table entry and any
    /// command still queued for it.
    ///
    /// Call this before closing a descriptor. The kernel reuses descriptor
    /// numbers, so a stale command would otherwise land on the next owner.
    pub fn forget(&mut self, fd: RawFd) {
        self.drain_receiver();
        self.pending.retain(|command| command.fd() != Some(fd));

        if self.interests.remove(&fd).is_some() {
            self.poller.remove(fd);
        }
    }

    /// Returns `true` if `fd` is currently registered for `direction`.
    pub fn is_armed(&self, fd: RawFd, direction: Direction) -> bool {
        self.interests
            .get(&fd)
            .is_some_and(|interest| interest.contains(direction))
    }

    /// Returns `true` once a shutdown command has been applied.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Waits for readiness and fills `events`.
    ///
    /// Blocks until a registered descriptor is ready, a handle wakes the
    /// reactor, or `timeout` expires. Queued commands are not applied here.
    pub fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        self.poller.poll(events, timeout)
    }

    fn drain_receiver(&mut self) {
        while let Ok(command) = self.receiver.try_recv() {
            self.pending.push_back(command);
        }
    }
}

/// A cloneable handle queueing commands for a [`Reactor`].
///
/// Interest changes are meant for the reactor thread. [`shutdown`](Self::shutdown)
/// may be called from anywhere and interrupts a blocking poll.
#[derive(Clone)]
pub struct ReactorHandle {
    sender: Sender<Command>,
    waker: Arc<Waker>,
}

impl ReactorHandle {
    /// Asks the reactor to stop and wakes it up.
    pub fn shutdown(&self) -> io::Result<()> {
        self.send(Command::Shutdown)?;
        self.waker.wake();
        Ok(())
    }

    fn send(&self, command: Command) -> io::Result<()> {
        self.sender
            .send(command)
            .map_err(|_| io::Error::new(io::ErrorKind::NotConnected, "reactor has been dropped"))
    }
}

impl Readiness for ReactorHandle {
    fn arm(&self, fd: RawFd, direction: Direction) -> io::Result<()> {
        self.send(Command::Arm { fd, direction })
    }

    fn disarm(&self, fd: RawFd, direction: Direction) -> io::Result<()> {
        self.send(Command::Disarm { fd, direction })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    fn pair() -> (UnixStream, UnixStream) {
        let (a, b) = UnixStream::pair().expect("socketpair");
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        (a, b)
    }

    #[test]
    fn armed_read_reports_incoming_data() {
        let mut reactor = Reactor::new().unwrap();
        let handle = reactor.handle();
        let (a, mut b) = pair();

        handle.arm(a.as_raw_fd(), Direction::Read).unwrap();
        assert!(reactor.apply_commands().is_empty());
        assert!(reactor.is_armed(a.as_raw_fd(), Direction::Read));

        b.write_all(b"ping").unwrap();

        let mut events = Vec::new();
        reactor
            .poll(&mut events, Some(Duration::from_secs(1)))
            .unwrap();

        assert_eq!(
            events,
            vec![Event {
                fd: a.as_raw_fd(),
                readable: true,
                writable: false,
            }]
        );
    }

    #[test]
    fn disarmed_descriptor_is_not_reported() {
        let mut reactor = Reactor::new().unwrap();
        let handle = reactor.handle();
        let (a, mut b) = pair();

        handle.arm(a.as_raw_fd(), Direction::Read).unwrap();
        handle.arm(a.as_raw_fd(), Direction::Write).unwrap();
        handle.disarm(a.as_raw_fd(), Direction::Write).unwrap();
        handle.disarm(a.as_raw_fd(), Direction::Read).unwrap();
        assert!(reactor.apply_commands().is_empty());
        assert!(!reactor.is_armed(a.as_raw_fd(), Direction::Read));
        assert!(!reactor.is_armed(a.as_raw_fd(), Direction::Write));

        b.write_all(b"ping").unwrap();

        let mut events = Vec::new();
        reactor
            .poll(&mut events, Some(Duration::from_millis(20)))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn forget_drops_queued_commands() {
        let mut reactor = Reactor::new().unwrap();
        let handle = reactor.handle();
        let (a, _b) = pair();

        handle.arm(a.as_raw_fd(), Direction::Write).unwrap();
        reactor.forget(a.as_raw_fd());
        assert!(reactor.apply_commands().is_empty());
        assert!(!reactor.is_armed(a.as_raw_fd(), Direction::Write));
    }

    #[test]
    fn arming_an_invalid_descriptor_is_reported() {
        let mut reactor = Reactor::new().unwrap();
        let handle = reactor.handle();
        let fd: RawFd = -1;

        handle.arm(fd, Direction::Read).unwrap();
        let failures = reactor.apply_commands();

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].fd, fd);
        assert_eq!(failures[0].direction, Direction::Read);
        assert!(!reactor.is_armed(fd, Direction::Read));
    }

    #[test]
    fn shutdown_wakes_a_blocked_poll() {
        let mut reactor = Reactor::new().unwrap();
        let handle = reactor.handle();

        let waker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.shutdown().unwrap();
        });

        let mut events = Vec::new();
        reactor
            .poll(&mut events, Some(Duration::from_secs(5)))
            .unwrap();
        waker.join().unwrap();

        assert!(events.is_empty());
        reactor.apply_commands();
        assert!(reactor.is_shutdown());
    }
}

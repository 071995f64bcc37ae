use iochannel::{Buffer, Channel, ChannelError, Direction, Endpoints, Handler, Readiness};

use std::cell::RefCell;
use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::rc::Rc;

/// Records interest changes instead of talking to a poller.
#[derive(Clone, Default)]
struct Recorder {
    armed: Rc<RefCell<HashSet<(RawFd, Direction)>>>,
    calls: Rc<RefCell<usize>>,
}

impl Recorder {
    fn is_armed(&self, fd: RawFd, direction: Direction) -> bool {
        self.armed.borrow().contains(&(fd, direction))
    }

    fn calls(&self) -> usize {
        *self.calls.borrow()
    }
}

impl Readiness for Recorder {
    fn arm(&self, fd: RawFd, direction: Direction) -> io::Result<()> {
        *self.calls.borrow_mut() += 1;
        self.armed.borrow_mut().insert((fd, direction));
        Ok(())
    }

    fn disarm(&self, fd: RawFd, direction: Direction) -> io::Result<()> {
        *self.calls.borrow_mut() += 1;
        self.armed.borrow_mut().remove(&(fd, direction));
        Ok(())
    }
}

struct Refuse;

impl Readiness for Refuse {
    fn arm(&self, _: RawFd, _: Direction) -> io::Result<()> {
        Err(io::Error::other("refused"))
    }

    fn disarm(&self, _: RawFd, _: Direction) -> io::Result<()> {
        Ok(())
    }
}

/// Echoes whatever fits in the outbound buffer.
#[derive(Default)]
struct Echo {
    data_calls: usize,
    closes: usize,
    forced: Option<bool>,
}

impl Handler for Echo {
    type Context = ();

    fn on_data(&mut self, channel: &mut Channel<()>) -> Result<(), ChannelError> {
        self.data_calls += 1;

        let n = channel.input().len().min(channel.outbound().remaining());
        let bytes = channel.input()[..n].to_vec();
        channel.send(&bytes)?;
        channel.consume(n)
    }

    fn on_close(&mut self, channel: &mut Channel<()>) {
        self.closes += 1;
        self.forced = channel.close_reason().map(|reason| reason.is_forced());
    }
}

/// Never consumes anything.
#[derive(Default)]
struct Hold {
    data_calls: usize,
}

impl Handler for Hold {
    type Context = ();

    fn on_data(&mut self, _: &mut Channel<()>) -> Result<(), ChannelError> {
        self.data_calls += 1;
        Ok(())
    }
}

/// Upper-cases complete lines, leaving a line in place until its answer fits.
#[derive(Default)]
struct Shout {
    data_calls: usize,
}

impl Handler for Shout {
    type Context = usize;

    fn on_data(&mut self, channel: &mut Channel<usize>) -> Result<(), ChannelError> {
        self.data_calls += 1;

        while let Some(end) = channel.input().iter().position(|&b| b == b'\n') {
            if channel.outbound().remaining() < end + 1 {
                break;
            }

            let reply = channel.input()[..=end].to_ascii_uppercase();
            channel.send(&reply)?;
            channel.consume(end + 1)?;
            *channel.context_mut() += 1;
        }

        Ok(())
    }
}

/// Rejects the first byte it sees.
struct Strict;

impl Handler for Strict {
    type Context = ();

    fn on_data(&mut self, _: &mut Channel<()>) -> Result<(), ChannelError> {
        Err(ChannelError::protocol("unexpected input"))
    }
}

fn socket_pair() -> (UnixStream, UnixStream) {
    let (local, peer) = UnixStream::pair().unwrap();
    local.set_nonblocking(true).unwrap();
    (local, peer)
}

fn open<C>(
    local: &UnixStream,
    inbound: usize,
    outbound: usize,
    context: C,
    recorder: &Recorder,
) -> Channel<C> {
    Channel::new(
        Endpoints::duplex(local.as_raw_fd()),
        Buffer::with_capacity(inbound),
        Buffer::with_capacity(outbound),
        context,
        recorder.clone(),
    )
    .unwrap()
}

#[test]
fn test_new_channel_only_reads() {
    let (local, _peer) = socket_pair();
    let recorder = Recorder::default();
    let fd = local.as_raw_fd();

    let channel = open(&local, 16, 16, (), &recorder);

    assert!(recorder.is_armed(fd, Direction::Read));
    assert!(!recorder.is_armed(fd, Direction::Write));
    assert!(channel.reader().is_armed());
    assert!(!channel.writer().is_armed());
    assert_eq!(channel.reader().direction(), Direction::Read);
    assert_eq!(channel.writer().direction(), Direction::Write);
    assert_eq!(channel.endpoints(), Endpoints::duplex(fd));
    assert!(!channel.is_closed());
}

#[test]
fn test_shared_reactor_serves_several_channels() {
    let (first, _first_peer) = socket_pair();
    let (second, _second_peer) = socket_pair();
    let recorder = Rc::new(Recorder::default());

    let channels: Vec<Channel<()>> = [&first, &second]
        .into_iter()
        .map(|local| {
            Channel::new(
                Endpoints::duplex(local.as_raw_fd()),
                Buffer::with_capacity(8),
                Buffer::with_capacity(8),
                (),
                Rc::clone(&recorder),
            )
            .unwrap()
        })
        .collect();

    assert_eq!(channels.len(), 2);
    assert!(recorder.is_armed(first.as_raw_fd(), Direction::Read));
    assert!(recorder.is_armed(second.as_raw_fd(), Direction::Read));
    assert_eq!(recorder.calls(), 2);
}

#[test]
fn test_refused_interest_fails_construction() {
    let (local, _peer) = socket_pair();

    let result = Channel::new(
        Endpoints::duplex(local.as_raw_fd()),
        Buffer::with_capacity(8),
        Buffer::with_capacity(8),
        (),
        Refuse,
    );

    assert!(matches!(result, Err(ChannelError::Io(_))));
}

#[test]
fn test_echo_round_trip() {
    let (local, mut peer) = socket_pair();
    let recorder = Recorder::default();
    let fd = local.as_raw_fd();
    let mut echo = Echo::default();
    let mut channel = open(&local, 64, 64, (), &recorder);

    peer.write_all(b"ping").unwrap();
    channel.on_ready(Direction::Read, &mut echo);

    assert_eq!(echo.data_calls, 1);
    assert!(channel.input().is_empty(), "Echo should consume its input");
    assert!(
        recorder.is_armed(fd, Direction::Write),
        "Queued output should arm writing"
    );

    channel.on_ready(Direction::Write, &mut echo);

    let mut reply = [0u8; 4];
    peer.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"ping");
    assert!(
        !recorder.is_armed(fd, Direction::Write),
        "Drained output should disarm writing"
    );
    assert!(recorder.is_armed(fd, Direction::Read));
}

#[test]
fn test_peer_end_of_stream_closes_an_idle_channel_once() {
    let (local, peer) = socket_pair();
    let recorder = Recorder::default();
    let fd = local.as_raw_fd();
    let mut echo = Echo::default();
    let mut channel = open(&local, 16, 16, (), &recorder);

    peer.shutdown(Shutdown::Write).unwrap();
    channel.on_ready(Direction::Read, &mut echo);

    assert!(channel.is_closed());
    assert!(channel.inbound().is_eof());
    assert_eq!(echo.closes, 1);
    assert_eq!(echo.forced, Some(false));
    assert_eq!(echo.data_calls, 0, "End of stream carries no data");
    assert!(!recorder.is_armed(fd, Direction::Read));

    channel.on_ready(Direction::Read, &mut echo);
    channel.on_ready(Direction::Write, &mut echo);
    assert_eq!(echo.closes, 1, "on_close must run exactly once");
}

#[test]
fn test_close_waits_for_queued_output() {
    let (local, mut peer) = socket_pair();
    let recorder = Recorder::default();
    let mut echo = Echo::default();
    let mut channel = open(&local, 16, 16, (), &recorder);

    peer.write_all(b"bye").unwrap();
    peer.shutdown(Shutdown::Write).unwrap();

    channel.on_ready(Direction::Read, &mut echo);
    channel.on_ready(Direction::Read, &mut echo);

    assert!(channel.inbound().is_eof());
    assert!(!channel.is_closed(), "Output is still queued");
    assert_eq!(echo.closes, 0);

    channel.on_ready(Direction::Write, &mut echo);

    assert!(channel.is_closed());
    assert_eq!(echo.closes, 1);
    assert_eq!(echo.forced, Some(false));

    let mut reply = [0u8; 3];
    peer.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"bye");
}

#[test]
fn test_full_inbound_stops_reading_independently_of_writing() {
    let (local, mut peer) = socket_pair();
    let recorder = Recorder::default();
    let fd = local.as_raw_fd();
    let mut hold = Hold::default();
    let mut channel = open(&local, 1024, 64, (), &recorder);

    peer.write_all(&[b'a'; 1500]).unwrap();
    channel.on_ready(Direction::Read, &mut hold);

    assert!(channel.inbound().is_full());
    assert_eq!(hold.data_calls, 1);
    assert!(
        !recorder.is_armed(fd, Direction::Read),
        "A full inbound buffer should disarm reading"
    );

    channel.send(&[b'x'; 50]).unwrap();

    assert!(recorder.is_armed(fd, Direction::Write));
    assert!(
        !recorder.is_armed(fd, Direction::Read),
        "Queuing output must not re-arm reading"
    );

    channel.consume(200).unwrap();

    assert_eq!(channel.inbound().len(), 824);
    assert!(
        recorder.is_armed(fd, Direction::Read),
        "Freeing inbound room should re-arm reading"
    );
}

#[test]
fn test_interest_is_only_sent_on_change() {
    let (local, _peer) = socket_pair();
    let recorder = Recorder::default();
    let mut channel = open(&local, 16, 16, (), &recorder);
    assert_eq!(recorder.calls(), 1);

    channel.send(b"a").unwrap();
    channel.send(b"b").unwrap();
    channel.send(b"c").unwrap();

    assert_eq!(recorder.calls(), 2, "Only the first send arms writing");
}

#[test]
fn test_stale_readiness_is_ignored() {
    let (local, _peer) = socket_pair();
    let recorder = Recorder::default();
    let mut echo = Echo::default();
    let mut channel = open(&local, 16, 16, (), &recorder);

    channel.on_ready(Direction::Write, &mut echo);
    channel.on_ready(Direction::Read, &mut echo);

    assert!(!channel.is_closed());
    assert_eq!(echo.data_calls, 0);
    assert_eq!(echo.closes, 0);
}

#[test]
fn test_write_failure_forces_close() {
    let (local, mut peer) = socket_pair();
    let recorder = Recorder::default();
    let fd = local.as_raw_fd();
    let mut echo = Echo::default();
    let mut channel = open(&local, 16, 16, (), &recorder);

    peer.write_all(b"x").unwrap();
    channel.on_ready(Direction::Read, &mut echo);
    assert!(recorder.is_armed(fd, Direction::Write));

    drop(peer);
    channel.on_ready(Direction::Write, &mut echo);

    assert!(channel.is_closed());
    assert_eq!(echo.closes, 1);
    assert_eq!(echo.forced, Some(true));
    assert!(matches!(
        channel.close_reason(),
        Some(iochannel::CloseReason::Forced(ChannelError::Io(_)))
    ));
    assert!(channel.inbound().is_eof());
    assert!(channel.outbound().is_empty(), "Forced close discards output");
    assert!(!recorder.is_armed(fd, Direction::Read));
    assert!(!recorder.is_armed(fd, Direction::Write));
}

#[test]
fn test_handler_error_forces_close() {
    let (local, mut peer) = socket_pair();
    let recorder = Recorder::default();
    let mut channel = open(&local, 16, 16, (), &recorder);

    peer.write_all(b"?").unwrap();
    channel.on_ready(Direction::Read, &mut Strict);

    assert!(channel.is_closed());
    assert!(matches!(
        channel.close_reason(),
        Some(iochannel::CloseReason::Forced(ChannelError::Protocol(_)))
    ));
}

#[test]
fn test_send_after_close_fails() {
    let (local, _peer) = socket_pair();
    let recorder = Recorder::default();
    let mut channel = open(&local, 16, 16, (), &recorder);

    channel.force_close(ChannelError::protocol("done"));

    assert!(matches!(channel.send(b"late"), Err(ChannelError::Closed)));
    assert!(matches!(channel.commit_output(1), Err(ChannelError::Closed)));
}

#[test]
fn test_forced_close_keeps_the_first_reason() {
    let (local, _peer) = socket_pair();
    let recorder = Recorder::default();
    let mut echo = Echo::default();
    let mut channel = open(&local, 16, 16, (), &recorder);

    channel.abort(ChannelError::protocol("first"), &mut echo);
    channel.abort(ChannelError::protocol("second"), &mut echo);

    assert_eq!(echo.closes, 1);
    match channel.close_reason() {
        Some(iochannel::CloseReason::Forced(ChannelError::Protocol(message))) => {
            assert_eq!(message, "first")
        }
        other => panic!("unexpected close reason: {other:?}"),
    }
}

#[test]
fn test_local_close_input_finishes_after_flush() {
    let (local, mut peer) = socket_pair();
    let recorder = Recorder::default();
    let fd = local.as_raw_fd();
    let mut echo = Echo::default();
    let mut channel = open(&local, 16, 16, (), &recorder);

    channel.send(b"so long").unwrap();
    channel.close_input().unwrap();

    assert!(!recorder.is_armed(fd, Direction::Read));
    assert!(!channel.is_closed());

    channel.on_ready(Direction::Write, &mut echo);

    assert!(channel.is_closed());
    assert_eq!(echo.closes, 1);

    let mut reply = [0u8; 7];
    peer.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"so long");
}

#[test]
fn test_zero_copy_output() {
    let (local, mut peer) = socket_pair();
    let recorder = Recorder::default();
    let mut echo = Echo::default();
    let mut channel = open(&local, 16, 16, (), &recorder);

    channel.output_space()[..3].copy_from_slice(b"abc");
    channel.commit_output(0).unwrap();
    assert!(channel.outbound().is_empty(), "Committing nothing is a no-op");
    assert!(!channel.outbound().is_eof());

    channel.commit_output(3).unwrap();
    channel.on_ready(Direction::Write, &mut echo);

    let mut reply = [0u8; 3];
    peer.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"abc");
}

#[test]
fn test_unanswered_input_is_offered_again_when_output_drains() {
    let (local, mut peer) = socket_pair();
    let recorder = Recorder::default();
    let mut shout = Shout::default();
    let mut channel = open(&local, 64, 8, 0usize, &recorder);

    peer.write_all(b"aaaa\nbbbb\n").unwrap();
    channel.on_ready(Direction::Read, &mut shout);

    assert_eq!(*channel.context(), 1, "Only one answer fits at first");
    assert_eq!(channel.input(), b"bbbb\n");

    channel.on_ready(Direction::Write, &mut shout);

    assert_eq!(shout.data_calls, 2);
    assert_eq!(*channel.context(), 2, "The held line is answered once room frees up");
    assert!(channel.input().is_empty());

    channel.on_ready(Direction::Write, &mut shout);

    let mut reply = [0u8; 10];
    peer.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"AAAA\nBBBB\n");
}

#[test]
fn test_held_input_is_dropped_once_the_peer_has_finished() {
    let (local, mut peer) = socket_pair();
    let recorder = Recorder::default();
    let mut shout = Shout::default();
    let mut channel = open(&local, 64, 8, 0usize, &recorder);

    peer.write_all(b"aaaa\nbbbb\n").unwrap();
    peer.shutdown(Shutdown::Write).unwrap();

    channel.on_ready(Direction::Read, &mut shout);
    channel.on_ready(Direction::Read, &mut shout);
    assert!(channel.inbound().is_eof());
    assert!(!channel.is_closed(), "The first answer is still queued");

    channel.on_ready(Direction::Write, &mut shout);

    assert!(channel.is_closed(), "Draining output after end of stream closes");
    assert_eq!(shout.data_calls, 1, "No redelivery on the closing write");
    assert_eq!(*channel.context(), 1);
    assert_eq!(channel.input(), b"bbbb\n");

    let mut reply = [0u8; 5];
    peer.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"AAAA\n");
}

//! Example: a line protocol served over a Unix socket and standard I/O.
//!
//! Every line `hello` is answered with `world`, any other line with `error`.
//!
//! ```text
//! cargo run --example line_server -- /tmp/line.sock --stdio
//! socat - UNIX-CONNECT:/tmp/line.sock
//! ```

use clap::Parser;
use iochannel::{Accept, Channel, ChannelError, DriverBuilder, Handler, Peer};

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(about = "Answers `hello` with `world` on every connection")]
struct Args {
    /// Unix socket to listen on.
    socket: PathBuf,

    /// Also serve standard input and output.
    #[arg(long)]
    stdio: bool,

    #[arg(long, default_value_t = 3)]
    max_clients: usize,

    /// Capacity of each direction's buffer, in bytes.
    #[arg(long, default_value_t = 1024)]
    buffer_size: usize,

    /// Seconds between status lines.
    #[arg(long, default_value_t = 5)]
    heartbeat: u64,
}

/// Per-connection state.
#[derive(Default)]
struct Session {
    answered: u64,
}

struct LineProtocol;

impl LineProtocol {
    fn answer(line: &[u8]) -> &'static [u8] {
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        if line == b"hello" { b"world\n" } else { b"error\n" }
    }
}

impl Handler for LineProtocol {
    type Context = Session;

    fn on_data(&mut self, channel: &mut Channel<Session>) -> Result<(), ChannelError> {
        while let Some(end) = channel.input().iter().position(|&b| b == b'\n') {
            let reply = Self::answer(&channel.input()[..end]);

            // Keep the line until its answer fits; it comes back once
            // output drains.
            if channel.outbound().remaining() < reply.len() {
                return Ok(());
            }

            channel.send(reply)?;
            channel.consume(end + 1)?;
            channel.context_mut().answered += 1;
        }

        // A full buffer without a newline can never complete.
        if channel.inbound().is_full() {
            if channel.outbound().remaining() < b"error\n".len() {
                return Ok(());
            }

            channel.send(b"error\n")?;
            let len = channel.input().len();
            channel.consume(len)?;
        }

        Ok(())
    }

    fn on_close(&mut self, channel: &mut Channel<Session>) {
        info!(
            fd = channel.reader().fd(),
            answered = channel.context().answered,
            reason = ?channel.close_reason(),
            "session over"
        );
    }
}

impl Accept for LineProtocol {
    fn on_accept(&mut self, peer: &Peer) -> Option<Session> {
        info!(%peer, "new session");
        Some(Session::default())
    }
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut driver = DriverBuilder::new()
        .max_channels(args.max_clients)
        .buffer_capacity(args.buffer_size)
        .heartbeat(Duration::from_secs(args.heartbeat.max(1)))
        .build(LineProtocol)?;

    if args.stdio {
        driver.attach_stdio(Session::default())?;
    }
    driver.listen_unix(&args.socket)?;

    driver.run()
}

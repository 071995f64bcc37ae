use std::fmt;
use std::fs;
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::{self, UnixListener};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// The remote end of an accepted connection.
#[derive(Debug)]
pub enum Peer {
    Unix(net::SocketAddr),
    Tcp(SocketAddr),
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Unix(addr) => match addr.as_pathname() {
                Some(path) => write!(f, "unix:{}", path.display()),
                None => f.write_str("unix:(unnamed)"),
            },
            Peer::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

/// A non-blocking listening socket.
pub(crate) enum Listener {
    /// The socket file is removed again when the listener is dropped.
    Unix {
        listener: UnixListener,
        path: PathBuf,
    },
    Tcp(TcpListener),
}

impl Listener {
    /// Binds a Unix stream socket at `path`, replacing a stale socket file.
    pub(crate) fn bind_unix(path: &Path) -> io::Result<Self> {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed stale socket file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let listener = UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;

        Ok(Listener::Unix {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub(crate) fn bind_tcp(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;

        Ok(Listener::Tcp(listener))
    }

    pub(crate) fn fd(&self) -> RawFd {
        match self {
            Listener::Unix { listener, .. } => listener.as_raw_fd(),
            Listener::Tcp(listener) => listener.as_raw_fd(),
        }
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr(),
            Listener::Unix { .. } => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix listeners have no inet address",
            )),
        }
    }

    /// Accepts one pending connection as a non-blocking descriptor.
    pub(crate) fn accept(&self) -> io::Result<(OwnedFd, Peer)> {
        match self {
            Listener::Unix { listener, .. } => {
                let (stream, addr) = listener.accept()?;
                stream.set_nonblocking(true)?;
                Ok((stream.into(), Peer::Unix(addr)))
            }
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept()?;
                stream.set_nonblocking(true)?;
                Ok((stream.into(), Peer::Tcp(addr)))
            }
        }
    }
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Listener::Unix { path, .. } => write!(f, "unix:{}", path.display()),
            Listener::Tcp(listener) => match listener.local_addr() {
                Ok(addr) => write!(f, "tcp:{addr}"),
                Err(_) => f.write_str("tcp:(unknown)"),
            },
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix { path, .. } = self {
            if let Err(e) = fs::remove_file(&*path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "could not remove socket file");
                }
            }
        }
    }
}

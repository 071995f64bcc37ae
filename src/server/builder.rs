use super::{Accept, Driver};

use std::io;
use std::time::Duration;

/// Limits and sizes applied to every channel a [`Driver`] creates.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Settings {
    pub(crate) max_channels: usize,
    pub(crate) inbound_capacity: usize,
    pub(crate) outbound_capacity: usize,
    pub(crate) heartbeat: Option<Duration>,
}

/// Configures and builds a [`Driver`].
///
/// ```no_run
/// # use iochannel::{Accept, Channel, ChannelError, DriverBuilder, Handler, Peer};
/// # struct Echo;
/// # impl Handler for Echo {
/// #     type Context = ();
/// #     fn on_data(&mut self, _: &mut Channel<()>) -> Result<(), ChannelError> { Ok(()) }
/// # }
/// # impl Accept for Echo {
/// #     fn on_accept(&mut self, _: &Peer) -> Option<()> { Some(()) }
/// # }
/// let mut driver = DriverBuilder::new()
///     .max_channels(16)
///     .buffer_capacity(4096)
///     .build(Echo)?;
/// driver.listen_unix("/tmp/echo.sock")?;
/// driver.run()?;
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct DriverBuilder {
    settings: Settings,
}

impl DriverBuilder {
    /// Starts from three channels with 1 KiB buffers and no heartbeat.
    pub fn new() -> Self {
        Self {
            settings: Settings {
                max_channels: 3,
                inbound_capacity: 1024,
                outbound_capacity: 1024,
                heartbeat: None,
            },
        }
    }

    /// How many channels may be open at once. Connections beyond the limit
    /// are accepted and dropped straight away.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn max_channels(mut self, n: usize) -> Self {
        assert!(n > 0, "max_channels must be > 0");

        self.settings.max_channels = n;
        self
    }

    /// Capacity of each channel's inbound buffer, in bytes.
    ///
    /// # Panics
    ///
    /// Panics if `bytes == 0`.
    pub fn inbound_capacity(mut self, bytes: usize) -> Self {
        assert!(bytes > 0, "inbound_capacity must be > 0");

        self.settings.inbound_capacity = bytes;
        self
    }

    /// Capacity of each channel's outbound buffer, in bytes.
    ///
    /// # Panics
    ///
    /// Panics if `bytes == 0`.
    pub fn outbound_capacity(mut self, bytes: usize) -> Self {
        assert!(bytes > 0, "outbound_capacity must be > 0");

        self.settings.outbound_capacity = bytes;
        self
    }

    /// Sets both buffer capacities.
    ///
    /// # Panics
    ///
    /// Panics if `bytes == 0`.
    pub fn buffer_capacity(self, bytes: usize) -> Self {
        self.inbound_capacity(bytes).outbound_capacity(bytes)
    }

    /// Logs a status line every `period` while the driver runs.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero.
    pub fn heartbeat(mut self, period: Duration) -> Self {
        assert!(!period.is_zero(), "heartbeat period must be > 0");

        self.settings.heartbeat = Some(period);
        self
    }

    /// Creates the driver and its reactor.
    ///
    /// # Errors
    ///
    /// Returns an error if the poller cannot be created.
    pub fn build<H: Accept>(self, handler: H) -> io::Result<Driver<H>> {
        Driver::new(self.settings, handler)
    }
}

impl Default for DriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

use crate::error::Result;
use std::time::Duration;

/// Line-oriented byte link to the filter device
///
/// Implementations never block past the timeout given to `read_line` and do
/// not retry; retry and recovery live in the session and collector.
pub trait Transport {
    /// Write one line; the newline terminator is appended by the transport.
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Read one line without its terminator.
    ///
    /// `Ok(None)` means nothing arrived within `timeout`. `Ok(Some(""))` is a
    /// genuinely empty line.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>>;

    /// Drop anything buffered on the inbound side (boot banners, stale replies).
    fn discard_input(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the link. Calling it more than once is harmless.
    fn close(&mut self);
}

/// Opens transports; the session owns one of these and opens on `connect()`
pub trait Connector {
    type Transport: Transport;

    /// Fails with `LinkError::LinkUnavailable` when the link cannot be opened.
    fn open(&mut self, address: &str, baud_rate: u32, timeout: Duration) -> Result<Self::Transport>;
}

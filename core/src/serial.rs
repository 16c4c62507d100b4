//! Serial port transport backed by the `serialport` crate

use crate::error::{LinkError, Result};
use crate::transport::{Connector, Transport};
use log::debug;
use serialport::{ClearBuffer, SerialPort};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 256;
const MIN_READ_WINDOW: Duration = Duration::from_millis(1);

/// Opens real serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    type Transport = SerialTransport;

    fn open(
        &mut self,
        address: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<SerialTransport> {
        let port = serialport::new(address, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| LinkError::LinkUnavailable(format!("{}: {}", address, e)))?;
        debug!("opened {} at {} baud", address, baud_rate);
        Ok(SerialTransport {
            port: Some(port),
            pending: Vec::new(),
        })
    }
}

/// Newline-delimited text over a serial port.
///
/// Bytes that arrive without a terminator stay buffered until the next read,
/// so a line split across two timeouts is still delivered whole.
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    pending: Vec<u8>,
}

impl SerialTransport {
    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or_else(|| {
            LinkError::Io(std::io::Error::new(ErrorKind::NotConnected, "port closed"))
        })
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=end).collect();
        Some(decode_line(&raw))
    }
}

impl Transport for SerialTransport {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let port = self.port()?;
        port.write_all(line.as_bytes())?;
        port.write_all(b"\n")?;
        port.flush()?;
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; READ_CHUNK];

        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let port = self.port.as_mut().ok_or_else(|| {
                LinkError::Io(std::io::Error::new(ErrorKind::NotConnected, "port closed"))
            })?;
            port.set_timeout(remaining.max(MIN_READ_WINDOW))
                .map_err(|e| LinkError::Io(e.into()))?;

            if !read_chunk(port, &mut buf, &mut self.pending)? {
                return Ok(self.take_line());
            }
        }
    }

    fn discard_input(&mut self) -> Result<()> {
        self.pending.clear();
        self.port()?
            .clear(ClearBuffer::Input)
            .map_err(|e| LinkError::Io(e.into()))
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("serial port closed");
        }
        self.pending.clear();
    }
}

/// One read into `pending`. `Ok(false)` when the read window passed with no
/// data; end of stream means the device went away and is an error.
fn read_chunk<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
    pending: &mut Vec<u8>,
) -> Result<bool> {
    match reader.read(buf) {
        Ok(0) => Err(LinkError::Io(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            "serial port returned end of stream",
        ))),
        Ok(n) => {
            pending.extend_from_slice(&buf[..n]);
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => Ok(false),
        Err(e) if e.kind() == ErrorKind::Interrupted => Ok(true),
        Err(e) => Err(e.into()),
    }
}

/// Strip the terminator (`\n` or `\r\n`) and decode, replacing invalid UTF-8
fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    while end > 0 && (raw[end - 1] == b'\n' || raw[end - 1] == b'\r') {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_line_strips_terminators() {
        assert_eq!(decode_line(b"FIN_DATOS\r\n"), "FIN_DATOS");
        assert_eq!(decode_line(b"1,2,3\n"), "1,2,3");
        assert_eq!(decode_line(b"\n"), "");
    }

    #[test]
    fn test_decode_line_lossy() {
        let line = decode_line(b"ENV\xC3\x8DO COMPLETADO\n");
        assert_eq!(line, "ENVÍO COMPLETADO");
        let broken = decode_line(b"ab\xFFcd\n");
        assert!(broken.starts_with("ab") && broken.ends_with("cd"));
    }

    #[test]
    fn test_open_missing_port_is_link_unavailable() {
        let mut connector = SerialConnector;
        let timeout = Duration::from_millis(10);
        let result = connector.open("/dev/does-not-exist-filterlink", 115_200, timeout);
        assert!(matches!(result, Err(LinkError::LinkUnavailable(_))));
    }

    #[test]
    fn test_read_chunk_appends_bytes() {
        let mut reader: &[u8] = b"0,512,500\n";
        let mut buf = [0u8; READ_CHUNK];
        let mut pending = b"FIN".to_vec();
        assert!(read_chunk(&mut reader, &mut buf, &mut pending).unwrap());
        assert_eq!(pending, b"FIN0,512,500\n");
    }

    #[test]
    fn test_read_chunk_end_of_stream_is_error() {
        let mut reader: &[u8] = b"";
        let mut buf = [0u8; READ_CHUNK];
        let mut pending = Vec::new();
        let result = read_chunk(&mut reader, &mut buf, &mut pending);
        assert!(matches!(result, Err(LinkError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof));
    }

    struct TimingOut;

    impl Read for TimingOut {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::TimedOut, "no data"))
        }
    }

    #[test]
    fn test_read_chunk_timeout_is_not_error() {
        let mut buf = [0u8; READ_CHUNK];
        let mut pending = Vec::new();
        assert!(!read_chunk(&mut TimingOut, &mut buf, &mut pending).unwrap());
        assert!(pending.is_empty());
    }
}

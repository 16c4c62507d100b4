//! Scripted transport that replays recorded device traffic
//!
//! A script is a queue of steps. `Line` steps are handed out by `read_line`,
//! `Silence` steps make one read time out, and `AwaitWrite` steps hold back
//! everything after them until the host writes the matching line. This keeps
//! replies from being consumed by an earlier phase (e.g. handshake polling
//! swallowing a batch response), the same way real replies only exist after
//! the command that provokes them.

use crate::error::{LinkError, Result};
use crate::transport::{Connector, Transport};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Line(String),
    Silence,
    AwaitWrite(String),
}

#[derive(Debug, Default)]
struct Traffic {
    written: Vec<String>,
    opens: usize,
    closes: usize,
}

/// Shared record of everything the host did to a scripted transport
#[derive(Debug, Clone, Default)]
pub struct TrafficLog(Arc<Mutex<Traffic>>);

impl TrafficLog {
    fn lock(&self) -> MutexGuard<'_, Traffic> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every line written, in order, without terminators
    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    /// Number of `DATA:` lines written
    pub fn samples_written(&self) -> usize {
        self.lock().written.iter().filter(|l| l.starts_with("DATA:")).count()
    }

    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }
}

/// Builds a script and hands it to the transport on `open`
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    steps: VecDeque<Step>,
    refuse_open: bool,
    write_limit: Option<usize>,
    log: TrafficLog,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one inbound line
    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.steps.push_back(Step::Line(line.into()));
        self
    }

    pub fn lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps.extend(lines.into_iter().map(|l| Step::Line(l.into())));
        self
    }

    /// Make the next read time out
    pub fn silence(mut self) -> Self {
        self.steps.push_back(Step::Silence);
        self
    }

    /// Hold the rest of the script until the host writes exactly `line`
    pub fn after(mut self, line: impl Into<String>) -> Self {
        self.steps.push_back(Step::AwaitWrite(line.into()));
        self
    }

    /// `open` fails with `LinkUnavailable`
    pub fn refusing(mut self) -> Self {
        self.refuse_open = true;
        self
    }

    /// Writes fail with a broken-pipe error once `limit` lines have been written
    pub fn failing_writes_after(mut self, limit: usize) -> Self {
        self.write_limit = Some(limit);
        self
    }

    pub fn log(&self) -> TrafficLog {
        self.log.clone()
    }
}

impl Connector for ScriptedConnector {
    type Transport = ScriptedTransport;

    fn open(
        &mut self,
        address: &str,
        _baud_rate: u32,
        _timeout: Duration,
    ) -> Result<ScriptedTransport> {
        self.log.lock().opens += 1;
        if self.refuse_open {
            return Err(LinkError::LinkUnavailable(format!("{}: refused by script", address)));
        }
        Ok(ScriptedTransport {
            steps: std::mem::take(&mut self.steps),
            write_limit: self.write_limit,
            log: self.log.clone(),
            closed: false,
        })
    }
}

pub struct ScriptedTransport {
    steps: VecDeque<Step>,
    write_limit: Option<usize>,
    log: TrafficLog,
    closed: bool,
}

impl ScriptedTransport {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "scripted transport closed",
            )));
        }
        Ok(())
    }
}

impl Transport for ScriptedTransport {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.ensure_open()?;
        let mut traffic = self.log.lock();
        if let Some(limit) = self.write_limit {
            if traffic.written.len() >= limit {
                return Err(LinkError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "scripted write failure",
                )));
            }
        }
        traffic.written.push(line.to_string());
        drop(traffic);

        if matches!(self.steps.front(), Some(Step::AwaitWrite(expected)) if expected == line) {
            self.steps.pop_front();
        }
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        self.ensure_open()?;
        if matches!(self.steps.front(), Some(Step::AwaitWrite(_)) | None) {
            std::thread::sleep(timeout);
            return Ok(None);
        }
        match self.steps.pop_front() {
            Some(Step::Line(line)) => Ok(Some(line)),
            _ => {
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    /// Drops queued lines and silences up to the next `AwaitWrite`; anything
    /// behind it has not been "sent" by the device yet.
    fn discard_input(&mut self) -> Result<()> {
        self.ensure_open()?;
        while matches!(self.steps.front(), Some(Step::Line(_) | Step::Silence)) {
            self.steps.pop_front();
        }
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.lock().closes += 1;
        }
    }
}

/// Device reply for one batch: header, one record per pair, then the sentinel
pub fn response_table(pairs: &[(u16, u16)]) -> Vec<String> {
    let mut lines = Vec::with_capacity(pairs.len() + 2);
    lines.push("index,input,output".to_string());
    lines.extend(
        pairs
            .iter()
            .enumerate()
            .map(|(i, (input, output))| format!("{},{},{}", i, input, output)),
    );
    lines.push("FIN_DATOS".to_string());
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(connector: &mut ScriptedConnector) -> ScriptedTransport {
        connector.open("scripted", 115_200, Duration::ZERO).unwrap()
    }

    #[test]
    fn test_lines_replayed_in_order() {
        let mut connector = ScriptedConnector::new().line("a").silence().line("b");
        let mut transport = open(&mut connector);
        let t = Duration::from_millis(1);
        assert_eq!(transport.read_line(t).unwrap(), Some("a".to_string()));
        assert_eq!(transport.read_line(t).unwrap(), None);
        assert_eq!(transport.read_line(t).unwrap(), Some("b".to_string()));
        assert_eq!(transport.read_line(t).unwrap(), None);
    }

    #[test]
    fn test_await_write_holds_replies() {
        let mut connector = ScriptedConnector::new().after("t").line("COMUNICACIÓN OK");
        let log = connector.log();
        let mut transport = open(&mut connector);
        let t = Duration::from_millis(1);

        assert_eq!(transport.read_line(t).unwrap(), None);
        transport.write_line("x").unwrap();
        assert_eq!(transport.read_line(t).unwrap(), None);
        transport.write_line("t").unwrap();
        assert_eq!(transport.read_line(t).unwrap(), Some("COMUNICACIÓN OK".to_string()));
        assert_eq!(log.written(), vec!["x", "t"]);
    }

    #[test]
    fn test_discard_stops_at_pending_reply() {
        let mut connector = ScriptedConnector::new()
            .line("tarde")
            .silence()
            .line("FIN_DATOS")
            .after("s")
            .line("index,input,output");
        let mut transport = open(&mut connector);
        let t = Duration::from_millis(1);

        transport.discard_input().unwrap();
        assert_eq!(transport.read_line(t).unwrap(), None);
        transport.write_line("s").unwrap();
        assert_eq!(transport.read_line(t).unwrap(), Some("index,input,output".to_string()));
    }

    #[test]
    fn test_refusing_open() {
        let mut connector = ScriptedConnector::new().refusing();
        let result = connector.open("COM4", 115_200, Duration::ZERO);
        assert!(matches!(result, Err(LinkError::LinkUnavailable(_))));
        assert_eq!(connector.log().open_count(), 1);
    }

    #[test]
    fn test_write_failure_and_close_accounting() {
        let mut connector = ScriptedConnector::new().failing_writes_after(1);
        let log = connector.log();
        let mut transport = open(&mut connector);
        assert!(transport.write_line("t").is_ok());
        assert!(matches!(transport.write_line("r"), Err(LinkError::Io(_))));

        transport.close();
        transport.close();
        assert_eq!(log.close_count(), 1);
        assert!(transport.read_line(Duration::ZERO).is_err());
    }

    #[test]
    fn test_response_table_shape() {
        let lines = response_table(&[(500, 480), (510, 490)]);
        assert_eq!(lines, vec!["index,input,output", "0,500,480", "1,510,490", "FIN_DATOS"]);
    }
}

//! Connection lifecycle and command issuance for one streaming session

use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::framing::{encode_sample, Command};
use crate::sample::{FilterMode, Sample};
use crate::transport::{Connector, Transport};
use log::{debug, info, warn};
use std::thread;
use std::time::Duration;

/// Reply fragments that confirm the test command
pub const CONFIRMATION_TOKENS: [&str; 2] = ["COMUNICACIÓN OK", "COMUNICACION OK"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    ConnectedConfirmed,
    ConnectedUnconfirmed,
    Streaming,
    Closed,
}

/// How the test command was answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    /// A reply carried a confirmation token
    Confirmed { reply: String },
    /// No token arrived within the polling window. The link is usable but
    /// nothing proves the firmware understood the test command; `lines_seen`
    /// is zero when the device stayed silent.
    Unconfirmed { lines_seen: usize },
}

impl Handshake {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Handshake::Confirmed { .. })
    }
}

pub struct LinkSession<C: Connector> {
    connector: C,
    config: LinkConfig,
    transport: Option<C::Transport>,
    state: SessionState,
    handshake: Option<Handshake>,
}

impl<C: Connector> LinkSession<C> {
    pub fn new(connector: C, config: LinkConfig) -> Self {
        Self {
            connector,
            config,
            transport: None,
            state: SessionState::Disconnected,
            handshake: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handshake(&self) -> Option<&Handshake> {
        self.handshake.as_ref()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Open the link and run the test-command handshake
    pub fn connect(&mut self) -> Result<Handshake> {
        match self.state {
            SessionState::Closed => return Err(LinkError::SessionClosed),
            SessionState::Disconnected => {}
            _ => return Err(LinkError::AlreadyConnected),
        }

        self.state = SessionState::Connecting;
        info!("connecting to {} at {} baud", self.config.port, self.config.baud_rate);

        let transport = match self.connector.open(
            &self.config.port,
            self.config.baud_rate,
            self.config.open_timeout,
        ) {
            Ok(transport) => transport,
            Err(e) => {
                self.state = SessionState::Disconnected;
                return Err(into_link_unavailable(e));
            }
        };
        self.transport = Some(transport);

        let handshake = match self.run_handshake() {
            Ok(handshake) => handshake,
            Err(e) => {
                self.drop_transport();
                self.state = SessionState::Disconnected;
                return Err(into_link_unavailable(e));
            }
        };

        match &handshake {
            Handshake::Confirmed { reply } => {
                info!("device confirmed link: {}", reply);
                self.state = SessionState::ConnectedConfirmed;
            }
            Handshake::Unconfirmed { lines_seen } => {
                if self.config.strict_handshake {
                    self.drop_transport();
                    self.state = SessionState::Disconnected;
                    return Err(LinkError::HandshakeRejected {
                        lines_seen: *lines_seen,
                    });
                }
                warn!(
                    "no confirmation token after {} polls ({} lines seen); continuing unconfirmed",
                    self.config.handshake_attempts, lines_seen
                );
                self.state = SessionState::ConnectedUnconfirmed;
            }
        }

        self.handshake = Some(handshake.clone());
        Ok(handshake)
    }

    fn run_handshake(&mut self) -> Result<Handshake> {
        let settle = self.config.settle_delay;
        let wait = self.config.handshake_wait;
        let poll = self.config.handshake_poll;
        let attempts = self.config.handshake_attempts;

        pause(settle);
        let transport = self.transport.as_mut().ok_or(LinkError::NotConnected)?;
        transport.discard_input()?;
        transport.write_line(&Command::Test.to_line())?;
        pause(wait);

        let mut lines_seen = 0;
        for _ in 0..attempts {
            if let Some(line) = transport.read_line(poll)? {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                debug!("handshake <- {}", line);
                lines_seen += 1;
                if CONFIRMATION_TOKENS.iter().any(|t| line.contains(t)) {
                    return Ok(Handshake::Confirmed {
                        reply: line.to_string(),
                    });
                }
            }
        }

        Ok(Handshake::Unconfirmed { lines_seen })
    }

    fn transport_mut(&mut self) -> Result<&mut C::Transport> {
        match self.state {
            SessionState::Closed => Err(LinkError::SessionClosed),
            SessionState::Disconnected | SessionState::Connecting => Err(LinkError::NotConnected),
            _ => self.transport.as_mut().ok_or(LinkError::NotConnected),
        }
    }

    fn send(&mut self, command: Command) -> Result<()> {
        let line = command.to_line();
        debug!("-> {}", line);
        self.transport_mut()?.write_line(&line)
    }

    /// Clear device state and let it settle
    pub fn reset(&mut self) -> Result<()> {
        self.send(Command::Reset)?;
        pause(self.config.reset_delay);
        Ok(())
    }

    /// Select the device filter. Returns the acknowledgement line if one arrived;
    /// a missing acknowledgement is not an error.
    pub fn select_filter(&mut self, mode: FilterMode) -> Result<Option<String>> {
        self.send(Command::SelectFilter(mode))?;
        pause(self.config.select_delay);

        let poll = self.config.handshake_poll;
        match self.transport_mut()?.read_line(poll) {
            Ok(Some(ack)) => {
                info!("filter {} selected: {}", mode, ack.trim());
                Ok(Some(ack.trim().to_string()))
            }
            Ok(None) => {
                debug!("filter {} selected, no acknowledgement", mode);
                Ok(None)
            }
            Err(e) => {
                warn!("reading acknowledgement for filter {} failed: {}", mode, e);
                Ok(None)
            }
        }
    }

    /// Arm the device for the next batch
    pub fn start_capture(&mut self) -> Result<()> {
        self.send(Command::Capture)?;
        self.state = SessionState::Streaming;
        pause(self.config.capture_delay);
        Ok(())
    }

    /// Write one `DATA:` line. Pacing is the caller's job.
    pub fn send_sample(&mut self, sample: Sample) -> Result<()> {
        self.transport_mut()?.write_line(&encode_sample(sample))
    }

    /// Ask the device to send back the recorded batch
    pub fn request_send(&mut self) -> Result<()> {
        self.send(Command::RequestSend)
    }

    /// Drop inbound lines still queued from an earlier exchange, such as a
    /// reply that arrived after its collection budget ran out
    pub fn discard_input(&mut self) -> Result<()> {
        self.transport_mut()?.discard_input()
    }

    pub fn read_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        self.transport_mut()?.read_line(timeout)
    }

    /// Close the transport. Safe to call any number of times, from any state.
    pub fn disconnect(&mut self) {
        if self.state != SessionState::Closed {
            self.drop_transport();
            self.state = SessionState::Closed;
            debug!("session closed");
        }
    }

    fn drop_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }
}

impl<C: Connector> Drop for LinkSession<C> {
    fn drop(&mut self) {
        self.drop_transport();
    }
}

fn into_link_unavailable(e: LinkError) -> LinkError {
    match e {
        LinkError::LinkUnavailable(_) => e,
        other => LinkError::LinkUnavailable(other.to_string()),
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

use crate::error::{LinkError, Result};
use crate::{
    ACCEPTANCE_RATIO, BATCH_CAPACITY, BAUD_RATE, CAPTURE_DELAY_MS, COLLECT_BUDGET_MS,
    HANDSHAKE_ATTEMPTS, HANDSHAKE_POLL_MS, HANDSHAKE_WAIT_MS, OPEN_TIMEOUT_MS,
    PROCESSING_DELAY_MS, READ_POLL_MS, RESET_DELAY_MS, SAMPLE_PACING_MS, SELECT_DELAY_MS,
    SETTLE_DELAY_MS,
};
use std::time::Duration;

/// Timing and protocol parameters for one streaming session
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Serial port name (e.g. `/dev/ttyACM0`, `COM4`)
    pub port: String,
    pub baud_rate: u32,
    pub open_timeout: Duration,
    /// Wait after opening the port; the board resets when the port opens
    pub settle_delay: Duration,
    /// Wait after the test command before polling for a reply
    pub handshake_wait: Duration,
    pub handshake_attempts: usize,
    pub handshake_poll: Duration,
    /// Fail the connect instead of accepting an unconfirmed handshake
    pub strict_handshake: bool,
    pub reset_delay: Duration,
    pub select_delay: Duration,
    pub capture_delay: Duration,
    /// Delay after every `DATA:` line
    pub sample_pacing: Duration,
    /// Wait between the last sample and the send request
    pub processing_delay: Duration,
    pub collect_budget: Duration,
    /// Upper bound on a single read while collecting
    pub read_poll: Duration,
    pub batch_capacity: usize,
    pub acceptance_ratio: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: BAUD_RATE,
            open_timeout: Duration::from_millis(OPEN_TIMEOUT_MS),
            settle_delay: Duration::from_millis(SETTLE_DELAY_MS),
            handshake_wait: Duration::from_millis(HANDSHAKE_WAIT_MS),
            handshake_attempts: HANDSHAKE_ATTEMPTS,
            handshake_poll: Duration::from_millis(HANDSHAKE_POLL_MS),
            strict_handshake: false,
            reset_delay: Duration::from_millis(RESET_DELAY_MS),
            select_delay: Duration::from_millis(SELECT_DELAY_MS),
            capture_delay: Duration::from_millis(CAPTURE_DELAY_MS),
            sample_pacing: Duration::from_millis(SAMPLE_PACING_MS),
            processing_delay: Duration::from_millis(PROCESSING_DELAY_MS),
            collect_budget: Duration::from_millis(COLLECT_BUDGET_MS),
            read_poll: Duration::from_millis(READ_POLL_MS),
            batch_capacity: BATCH_CAPACITY,
            acceptance_ratio: ACCEPTANCE_RATIO,
        }
    }
}

impl LinkConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    /// All settle and pacing delays zeroed, for in-process transports.
    ///
    /// Read windows keep small non-zero values so collection still polls.
    pub fn without_delays() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            handshake_wait: Duration::ZERO,
            handshake_poll: Duration::from_millis(1),
            reset_delay: Duration::ZERO,
            select_delay: Duration::ZERO,
            capture_delay: Duration::ZERO,
            sample_pacing: Duration::ZERO,
            processing_delay: Duration::ZERO,
            collect_budget: Duration::from_millis(200),
            read_poll: Duration::from_millis(5),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = port.into();
        self
    }

    pub fn with_batch_capacity(mut self, capacity: usize) -> Self {
        self.batch_capacity = capacity;
        self
    }

    pub fn with_sample_pacing(mut self, pacing: Duration) -> Self {
        self.sample_pacing = pacing;
        self
    }

    pub fn with_collect_budget(mut self, budget: Duration) -> Self {
        self.collect_budget = budget;
        self
    }

    pub fn with_strict_handshake(mut self, strict: bool) -> Self {
        self.strict_handshake = strict;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(LinkError::InvalidConfig("baud rate must be non-zero".to_string()));
        }
        if self.batch_capacity == 0 || self.batch_capacity > BATCH_CAPACITY {
            return Err(LinkError::InvalidConfig(format!(
                "batch capacity must be within 1..={}",
                BATCH_CAPACITY
            )));
        }
        if !(self.acceptance_ratio > 0.0 && self.acceptance_ratio <= 1.0) {
            return Err(LinkError::InvalidConfig(
                "acceptance ratio must be within (0, 1]".to_string(),
            ));
        }
        if self.collect_budget.is_zero() {
            return Err(LinkError::InvalidConfig(
                "collection budget must be non-zero".to_string(),
            ));
        }
        if self.handshake_attempts == 0 {
            return Err(LinkError::InvalidConfig(
                "handshake needs at least one attempt".to_string(),
            ));
        }
        Ok(())
    }
}

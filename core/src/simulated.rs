//! In-process stand-in for the filter board
//!
//! Understands the same textual commands as the firmware and answers with the
//! same reply shapes, so whole sessions can run without hardware. The filters
//! are simple stand-ins (5-tap moving average for FIR, one-pole low-pass for
//! IIR), not the board's designed coefficients.

use crate::error::Result;
use crate::framing::{Command, DATA_PREFIX, HEADER_LINE};
use crate::sample::FilterMode;
use crate::transport::{Connector, Transport};
use crate::{ADC_MAX, BATCH_CAPACITY};
use log::debug;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

const FIR_TAPS: usize = 5;
const IIR_ALPHA: f32 = 0.25;

/// Failure injection for the simulated device
#[derive(Debug, Clone, Default)]
pub struct SimulationFaults {
    /// Zero-based send requests answered with only the sentinel
    pub silent_batches: HashSet<usize>,
    /// Drop every n-th record of every reply
    pub drop_every: Option<usize>,
    /// Zero-based send requests answered without a sentinel
    pub unterminated_batches: HashSet<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedConnector {
    faults: SimulationFaults,
}

impl SimulatedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_silent_batch(mut self, batch: usize) -> Self {
        self.faults.silent_batches.insert(batch);
        self
    }

    pub fn with_unterminated_batch(mut self, batch: usize) -> Self {
        self.faults.unterminated_batches.insert(batch);
        self
    }

    pub fn with_record_loss(mut self, every: usize) -> Self {
        self.faults.drop_every = Some(every.max(1));
        self
    }
}

impl Connector for SimulatedConnector {
    type Transport = SimulatedDevice;

    fn open(
        &mut self,
        address: &str,
        baud_rate: u32,
        _timeout: Duration,
    ) -> Result<SimulatedDevice> {
        debug!("simulated device on {} at {} baud", address, baud_rate);
        Ok(SimulatedDevice::with_faults(self.faults.clone()))
    }
}

pub struct SimulatedDevice {
    outbox: VecDeque<String>,
    mode: FilterMode,
    capturing: bool,
    buffer: Vec<u16>,
    requests: usize,
    faults: SimulationFaults,
    closed: bool,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::with_faults(SimulationFaults::default())
    }
}

impl SimulatedDevice {
    pub fn with_faults(faults: SimulationFaults) -> Self {
        Self {
            outbox: VecDeque::new(),
            mode: FilterMode::Bypass,
            capturing: false,
            buffer: Vec::with_capacity(BATCH_CAPACITY),
            requests: 0,
            faults,
            closed: false,
        }
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    fn handle(&mut self, line: &str) {
        if let Some(value) = line.strip_prefix(DATA_PREFIX) {
            if let Ok(value) = value.trim().parse::<u16>() {
                if self.capturing && self.buffer.len() < BATCH_CAPACITY {
                    self.buffer.push(value.min(ADC_MAX));
                }
            }
            return;
        }

        let command = line.trim();
        let mut chars = command.chars();
        let selector = match (chars.next(), chars.next()) {
            (Some(c), None) => FilterMode::from_selector(c),
            _ => None,
        };

        if command == Command::Test.to_line() {
            self.outbox.push_back("COMUNICACIÓN OK".to_string());
        } else if command == Command::Reset.to_line() {
            self.buffer.clear();
            self.capturing = false;
        } else if command == Command::Capture.to_line() {
            self.buffer.clear();
            self.capturing = true;
        } else if command == Command::RequestSend.to_line() {
            self.send_batch();
        } else if let Some(mode) = selector {
            self.mode = mode;
            self.outbox.push_back(format!("Filtro {} activado", mode.name().to_uppercase()));
        } else {
            self.outbox.push_back(format!("Comando desconocido: {}", command));
        }
    }

    fn send_batch(&mut self) {
        let request = self.requests;
        self.requests += 1;
        self.capturing = false;

        if !self.faults.silent_batches.contains(&request) {
            let output = apply_filter(self.mode, &self.buffer);
            self.outbox.push_back(HEADER_LINE.to_string());
            for (i, (input, output)) in self.buffer.iter().zip(output).enumerate() {
                if let Some(every) = self.faults.drop_every {
                    if (i + 1) % every == 0 {
                        continue;
                    }
                }
                self.outbox.push_back(format!("{},{},{}", i, input, output));
            }
        }
        if !self.faults.unterminated_batches.contains(&request) {
            self.outbox.push_back("FIN_DATOS".to_string());
        }
    }
}

impl Transport for SimulatedDevice {
    fn write_line(&mut self, line: &str) -> Result<()> {
        if self.closed {
            let closed = std::io::Error::new(std::io::ErrorKind::NotConnected, "device closed");
            return Err(closed.into());
        }
        self.handle(line);
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        match self.outbox.pop_front() {
            Some(line) => Ok(Some(line)),
            None => {
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn discard_input(&mut self) -> Result<()> {
        self.outbox.clear();
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        self.outbox.clear();
    }
}

/// Filter one captured batch in the ADC domain
pub fn apply_filter(mode: FilterMode, input: &[u16]) -> Vec<u16> {
    match mode {
        FilterMode::Bypass => input.to_vec(),
        FilterMode::Fir => (0..input.len())
            .map(|n| {
                let window = &input[n.saturating_sub(FIR_TAPS - 1)..=n];
                let sum: u32 = window.iter().map(|&v| v as u32).sum();
                (sum as f32 / window.len() as f32).round() as u16
            })
            .collect(),
        FilterMode::Iir => {
            let mut state = input.first().copied().unwrap_or(0) as f32;
            input
                .iter()
                .map(|&x| {
                    state += IIR_ALPHA * (x as f32 - state);
                    (state.round() as u16).min(ADC_MAX)
                })
                .collect()
        }
    }
}

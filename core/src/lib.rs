//! Batch sample-streaming link to an external serial filter device
//!
//! Streams 10-bit ADC samples, one line per sample, to a microcontroller running
//! a bypass/FIR/IIR filter and reassembles the filtered output batch by batch.
//! Batches that come back short are padded so input and output stay aligned.

pub mod error;
pub mod config;
pub mod sample;
pub mod transport;
pub mod serial;
pub mod scripted;
pub mod simulated;
pub mod framing;
pub mod session;
pub mod batching;
pub mod collector;
pub mod recovery;
pub mod orchestrator;
pub mod resample;
pub mod metrics;

pub use batching::{Batch, BatchScheduler};
pub use collector::{Collection, CollectionEnd, ResponseCollector};
pub use config::LinkConfig;
pub use error::{LinkError, Result};
pub use framing::{Command, ProcessedRecord, ResponseLine};
pub use orchestrator::{BatchSummary, CancelFlag, Orchestrator, StreamResult};
pub use recovery::{BatchOutcome, BatchResult, RecoveryPolicy};
pub use sample::{FilterMode, Sample};
pub use scripted::{ScriptedConnector, ScriptedTransport, TrafficLog};
pub use serial::{SerialConnector, SerialTransport};
pub use session::{Handshake, LinkSession, SessionState};
pub use simulated::{SimulatedConnector, SimulatedDevice};
pub use transport::{Connector, Transport};

// Serial link
pub const BAUD_RATE: u32 = 115_200;
pub const OPEN_TIMEOUT_MS: u64 = 3000;
pub const SETTLE_DELAY_MS: u64 = 3000;

// Handshake
pub const HANDSHAKE_WAIT_MS: u64 = 2000;
pub const HANDSHAKE_ATTEMPTS: usize = 10;
pub const HANDSHAKE_POLL_MS: u64 = 300;

// Device command settle times
pub const RESET_DELAY_MS: u64 = 2000;
pub const SELECT_DELAY_MS: u64 = 1000;
pub const CAPTURE_DELAY_MS: u64 = 500;
pub const PROCESSING_DELAY_MS: u64 = 1000;

// Batch streaming
pub const BATCH_CAPACITY: usize = 600;
pub const SAMPLE_PACING_MS: u64 = 3;
pub const COLLECT_BUDGET_MS: u64 = 5000;
pub const READ_POLL_MS: u64 = 100;
pub const ACCEPTANCE_RATIO: f64 = 0.8;

// ADC domain
pub const ADC_MAX: u16 = 1023;
pub const ADC_SCALE: f32 = 511.5;
pub const ADC_MIDSCALE: u16 = 512; // round((0.0 + 1) * 511.5)
pub const ADC_REFERENCE_VOLTS: f32 = 5.0;

/// Sample rate the device filters are designed for
pub const DEVICE_SAMPLE_RATE: u32 = 8000;

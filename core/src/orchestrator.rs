//! End-to-end driver for one streaming session

use crate::batching::BatchScheduler;
use crate::collector::CollectionEnd;
use crate::config::LinkConfig;
use crate::error::Result;
use crate::recovery::{BatchOutcome, BatchResult, RecoveryPolicy};
use crate::sample::{FilterMode, Sample};
use crate::session::{Handshake, LinkSession};
use crate::transport::Connector;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation, checked at every read and write boundary
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-batch bookkeeping kept alongside the sample arrays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub index: usize,
    pub len: usize,
    pub collected: usize,
    pub outcome: BatchOutcome,
    pub end: CollectionEnd,
}

/// Concatenated output of a session, appended one batch at a time
#[derive(Debug, Clone)]
pub struct StreamResult {
    pub mode: FilterMode,
    pub handshake: Handshake,
    pub filter_ack: Option<String>,
    pub entrada: Vec<u16>,
    pub salida: Vec<u16>,
    pub batches: Vec<BatchSummary>,
    pub successful_batches: usize,
    /// Batches planned for the whole input
    pub total_batches: usize,
    pub cancelled: bool,
}

impl StreamResult {
    fn new(
        mode: FilterMode,
        handshake: Handshake,
        filter_ack: Option<String>,
        total_batches: usize,
    ) -> Self {
        Self {
            mode,
            handshake,
            filter_ack,
            entrada: Vec::new(),
            salida: Vec::new(),
            batches: Vec::with_capacity(total_batches),
            successful_batches: 0,
            total_batches,
            cancelled: false,
        }
    }

    fn push(&mut self, result: BatchResult, end: CollectionEnd) {
        if result.outcome.is_success() {
            self.successful_batches += 1;
        }
        self.batches.push(BatchSummary {
            index: result.index,
            len: result.len(),
            collected: result.collected,
            outcome: result.outcome,
            end,
        });
        self.entrada.extend_from_slice(&result.entrada);
        self.salida.extend_from_slice(&result.salida);
    }

    /// Batches not needing recovery over batches planned. An empty stream is 1.0.
    pub fn success_ratio(&self) -> f64 {
        if self.total_batches == 0 {
            return 1.0;
        }
        self.successful_batches as f64 / self.total_batches as f64
    }

    pub fn len(&self) -> usize {
        self.entrada.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entrada.is_empty()
    }
}

/// Owns the session for its whole lifetime; the link is released on every exit path
pub struct Orchestrator<C: Connector> {
    session: LinkSession<C>,
    scheduler: BatchScheduler,
    policy: RecoveryPolicy,
    cancel: CancelFlag,
}

impl<C: Connector> Orchestrator<C> {
    pub fn new(connector: C, config: LinkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scheduler: BatchScheduler::new(config.clone()),
            policy: RecoveryPolicy::new(config.acceptance_ratio),
            session: LinkSession::new(connector, config),
            cancel: CancelFlag::new(),
        })
    }

    /// Share an existing flag, e.g. one already wired to a signal handler
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle for stopping a running session from another thread
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn session(&self) -> &LinkSession<C> {
        &self.session
    }

    /// Stream `samples` through the device with `mode` selected.
    ///
    /// Fails only when the link cannot be established (or breaks before the
    /// first batch). Individual batch failures are padded and counted in the
    /// success ratio.
    pub fn run_session(&mut self, samples: &[Sample], mode: FilterMode) -> Result<StreamResult> {
        let handshake = match self.session.connect() {
            Ok(handshake) => handshake,
            Err(e) => {
                self.session.disconnect();
                return Err(e);
            }
        };

        let result = self.stream(samples, mode, handshake);
        self.session.disconnect();
        result
    }

    fn stream(
        &mut self,
        samples: &[Sample],
        mode: FilterMode,
        handshake: Handshake,
    ) -> Result<StreamResult> {
        self.session.reset()?;
        let ack = self.session.select_filter(mode)?;

        let batches = self.scheduler.partition(samples);
        info!(
            "streaming {} samples in {} batches of up to {} ({} filter)",
            samples.len(),
            batches.len(),
            self.scheduler.capacity(),
            mode
        );

        let mut stream = StreamResult::new(mode, handshake, ack, batches.len());
        let mut carry = None;
        for batch in &batches {
            if self.cancel.is_cancelled() {
                stream.cancelled = true;
                break;
            }

            let collection = self.scheduler.exchange(&mut self.session, batch, &self.cancel)?;
            if collection.end == CollectionEnd::Cancelled {
                stream.cancelled = true;
                break;
            }

            let result = self.policy.finalize(batch, &collection.records, carry);
            match result.outcome {
                BatchOutcome::Recovered { collected } => warn!(
                    "batch {}/{}: {} of {} records ({:?}), padded",
                    batch.index + 1,
                    batches.len(),
                    collected,
                    batch.len(),
                    collection.end
                ),
                _ => info!(
                    "batch {}/{}: {} of {} records",
                    batch.index + 1,
                    batches.len(),
                    result.collected.min(batch.len()),
                    batch.len()
                ),
            }
            carry = result.last_values().or(carry);
            stream.push(result, collection.end);
        }

        if stream.cancelled {
            warn!(
                "session cancelled after {} of {} batches",
                stream.batches.len(),
                stream.total_batches
            );
        } else {
            info!(
                "session complete: {}/{} batches succeeded ({:.1}%)",
                stream.successful_batches,
                stream.total_batches,
                stream.success_ratio() * 100.0
            );
        }
        Ok(stream)
    }
}

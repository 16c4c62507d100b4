use crate::collector::{Collection, CollectionEnd, ResponseCollector};
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::orchestrator::CancelFlag;
use crate::sample::Sample;
use crate::session::LinkSession;
use crate::transport::Connector;
use log::{debug, warn};
use std::thread;

/// A contiguous slice of the sample stream sent in one capture cycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    /// Position of the batch within the stream, from zero
    pub index: usize,
    pub samples: Vec<Sample>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Split `samples` into ordered batches of at most `capacity` samples.
///
/// Produces `ceil(len / capacity)` batches; only the last may be short.
pub fn partition(samples: &[Sample], capacity: usize) -> Vec<Batch> {
    let capacity = capacity.max(1);
    samples
        .chunks(capacity)
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            samples: chunk.to_vec(),
        })
        .collect()
}

/// Drives the per-batch request/response cycle
pub struct BatchScheduler {
    config: LinkConfig,
    collector: ResponseCollector,
}

impl BatchScheduler {
    pub fn new(config: LinkConfig) -> Self {
        let collector = ResponseCollector::new(config.collect_budget, config.read_poll);
        Self { config, collector }
    }

    pub fn capacity(&self) -> usize {
        self.config.batch_capacity
    }

    pub fn partition(&self, samples: &[Sample]) -> Vec<Batch> {
        partition(samples, self.config.batch_capacity)
    }

    /// Run one capture cycle: arm, paced sample lines, processing wait,
    /// send request, then collect the reply.
    ///
    /// Transport failures are folded into the returned collection so the
    /// caller can recover the batch. `SessionClosed` and `NotConnected` are
    /// contract violations and propagate.
    pub fn exchange<C: Connector>(
        &self,
        session: &mut LinkSession<C>,
        batch: &Batch,
        cancel: &CancelFlag,
    ) -> Result<Collection> {
        match self.send_batch(session, batch, cancel) {
            Ok(true) => {}
            Ok(false) => return Ok(Collection::ended(CollectionEnd::Cancelled)),
            Err(e @ (LinkError::SessionClosed | LinkError::NotConnected)) => return Err(e),
            Err(e) => {
                warn!("batch {}: send phase failed: {}", batch.index, e);
                return Ok(Collection::ended(CollectionEnd::Failed(e.to_string())));
            }
        }

        self.collector.collect(session, batch.len(), cancel)
    }

    /// Returns `Ok(false)` when cancelled part-way
    fn send_batch<C: Connector>(
        &self,
        session: &mut LinkSession<C>,
        batch: &Batch,
        cancel: &CancelFlag,
    ) -> Result<bool> {
        session.discard_input()?;
        session.start_capture()?;

        for sample in &batch.samples {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            session.send_sample(*sample)?;
            if !self.config.sample_pacing.is_zero() {
                thread::sleep(self.config.sample_pacing);
            }
        }
        debug!("batch {}: {} samples written", batch.index, batch.len());

        if !self.config.processing_delay.is_zero() {
            thread::sleep(self.config.processing_delay);
        }
        session.request_send()?;
        Ok(true)
    }
}

use crate::batching::Batch;
use crate::framing::ProcessedRecord;
use crate::ADC_MIDSCALE;

/// What the recovery policy had to do to a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every position came from the device
    Complete,
    /// Enough records to accept; the last `missing` positions were padded
    Padded { missing: usize },
    /// Below the acceptance ratio; everything after `collected` is padding
    Recovered { collected: usize },
}

impl BatchOutcome {
    /// Counts toward the session success ratio
    pub fn is_success(self) -> bool {
        !matches!(self, BatchOutcome::Recovered { .. })
    }
}

/// Finalized input/output for one batch.
///
/// `entrada` and `salida` always have the batch's sample count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub index: usize,
    pub entrada: Vec<u16>,
    pub salida: Vec<u16>,
    /// Records received from the device, before truncation
    pub collected: usize,
    pub outcome: BatchOutcome,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.entrada.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entrada.is_empty()
    }

    /// Last (input, output) pair, used to pad a following empty batch
    pub fn last_values(&self) -> Option<(u16, u16)> {
        Some((*self.entrada.last()?, *self.salida.last()?))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    acceptance_ratio: f64,
}

impl RecoveryPolicy {
    pub fn new(acceptance_ratio: f64) -> Self {
        Self { acceptance_ratio }
    }

    pub fn accepts(&self, collected: usize, expected: usize) -> bool {
        collected as f64 >= expected as f64 * self.acceptance_ratio
    }

    /// Build the batch result from whatever was collected.
    ///
    /// Records past the batch length are dropped. Missing trailing positions
    /// repeat the last collected input and output; with no records at all the
    /// `carry` pair from the previous batch is repeated, and without that the
    /// ADC mid-scale value (zero amplitude).
    pub fn finalize(
        &self,
        batch: &Batch,
        records: &[ProcessedRecord],
        carry: Option<(u16, u16)>,
    ) -> BatchResult {
        let expected = batch.len();
        let kept = &records[..records.len().min(expected)];

        let mut entrada: Vec<u16> = Vec::with_capacity(expected);
        let mut salida: Vec<u16> = Vec::with_capacity(expected);
        entrada.extend(kept.iter().map(|r| r.input));
        salida.extend(kept.iter().map(|r| r.output));

        let (fill_in, fill_out) = kept
            .last()
            .map(|r| (r.input, r.output))
            .or(carry)
            .unwrap_or((ADC_MIDSCALE, ADC_MIDSCALE));
        entrada.resize(expected, fill_in);
        salida.resize(expected, fill_out);

        let missing = expected - kept.len();
        let outcome = if !self.accepts(records.len(), expected) {
            BatchOutcome::Recovered {
                collected: records.len(),
            }
        } else if missing > 0 {
            BatchOutcome::Padded { missing }
        } else {
            BatchOutcome::Complete
        };

        BatchResult {
            index: batch.index,
            entrada,
            salida,
            collected: records.len(),
            outcome,
        }
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::new(crate::ACCEPTANCE_RATIO)
    }
}

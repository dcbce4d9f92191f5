//! Coalesce engine-sized chunks into row batches of a target size

use arrow::array::RecordBatch;
use arrow::compute::concat_batches;
use arrow::error::ArrowError;

/// Buffers small batches until `target` rows are available.
///
/// Holds at most `target - 1` rows between pushes, so memory stays bounded by
/// one output batch plus one engine chunk.
#[derive(Debug)]
pub struct BatchAccumulator {
    target: usize,
    pending: Vec<RecordBatch>,
    rows: usize,
}

impl BatchAccumulator {
    pub fn new(target: usize) -> Self {
        Self {
            target: target.max(1),
            pending: Vec::new(),
            rows: 0,
        }
    }

    /// Number of rows currently buffered
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Add a batch; returns every full batch that became available.
    pub fn push(&mut self, batch: RecordBatch) -> Result<Vec<RecordBatch>, ArrowError> {
        if batch.num_rows() == 0 {
            return Ok(Vec::new());
        }
        self.rows += batch.num_rows();
        self.pending.push(batch);
        if self.rows < self.target {
            return Ok(Vec::new());
        }

        let merged = self.merge()?;
        let mut full = Vec::with_capacity(merged.num_rows() / self.target);
        let mut offset = 0;
        while merged.num_rows() - offset >= self.target {
            full.push(merged.slice(offset, self.target));
            offset += self.target;
        }
        let rest = merged.num_rows() - offset;
        if rest > 0 {
            self.pending.push(merged.slice(offset, rest));
        }
        self.rows = rest;
        Ok(full)
    }

    /// Take buffered rows as one batch, resetting internal state
    pub fn take_batch(&mut self) -> Result<Option<RecordBatch>, ArrowError> {
        if self.rows == 0 {
            return Ok(None);
        }
        let batch = self.merge()?;
        self.rows = 0;
        Ok(Some(batch))
    }

    fn merge(&mut self) -> Result<RecordBatch, ArrowError> {
        // Only called with rows buffered, so `pending` is non-empty
        let mut pending = std::mem::take(&mut self.pending);
        if pending.len() == 1 {
            return Ok(pending.remove(0));
        }
        concat_batches(&pending[0].schema(), &pending)
    }
}

//! Batches over a row-oriented sequence table.
//!
//! Tables store fixed-width raw sequences and a label column, and are written in
//! native blocks of `BATCH_SIZE` rows (`POS_PER_BATCH` positives and
//! `NEG_PER_BATCH` negatives each). A provider's batch size must be a whole
//! number of native blocks.
//!
//! The provider keeps one batch in flight: when a batch is handed out, the read,
//! trim, encoding and device transfer of the next one are queued on the
//! provider's prefetch [`Stream`] and only waited for at the next pull.

use super::{Batch, BatchSource, BatchStep, BatchTensor, ProviderConfig, Residency};
use crate::device::Device;
use crate::encoding::{trim, Alphabet, SequenceEncoder};
use crate::error::{Result, SeqConvError};
use crate::stream::{Pending, Stream};
use crate::tensors::{Float, Tensor};
use briny::prelude::*;
use std::sync::Arc;

/// Attributes a table carries alongside its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableAttrs {
    /// Rows per native block (`BATCH_SIZE`).
    pub batch_size: usize,
    /// Positive examples per native block (`POS_PER_BATCH`).
    pub pos_per_batch: usize,
    /// Negative examples per native block (`NEG_PER_BATCH`).
    pub neg_per_batch: usize,
}

impl TableAttrs {
    pub fn new(batch_size: usize, pos_per_batch: usize, neg_per_batch: usize) -> Self {
        Self {
            batch_size,
            pos_per_batch,
            neg_per_batch,
        }
    }
}

/// A block of rows read from a table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRows {
    /// Raw sequence bytes, `width` per row, back to back.
    pub seqs: Vec<u8>,
    /// Bytes per sequence.
    pub width: usize,
    /// One label per row.
    pub labels: Vec<f64>,
}

impl TableRows {
    /// Rows in the block.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Validate for TableRows {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        if self.seqs.len() != self.labels.len() * self.width {
            return Err(ValidationError);
        }
        if self.labels.iter().any(|l| !l.is_finite()) {
            return Err(ValidationError);
        }
        Ok(())
    }
}

/// A table of fixed-width sequences and labels.
pub trait SequenceTable: Send + Sync {
    /// Total rows.
    fn nrows(&self) -> usize;

    /// Bytes per stored sequence.
    fn seq_width(&self) -> usize;

    fn attrs(&self) -> TableAttrs;

    /// Reads rows `start..stop`, clamped to the end of the table.
    fn read(&self, start: usize, stop: usize) -> Result<TableRows>;
}

/// A [`SequenceTable`] held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryTable {
    seqs: Vec<u8>,
    width: usize,
    labels: Vec<f64>,
    attrs: TableAttrs,
}

impl MemoryTable {
    /// Builds a table from equal-width sequences and one label per sequence.
    pub fn new<S: AsRef<[u8]>>(
        sequences: &[S],
        labels: Vec<f64>,
        attrs: TableAttrs,
    ) -> Result<Self> {
        if sequences.len() != labels.len() {
            return Err(SeqConvError::shape(
                "memory_table",
                format!(
                    "{} sequences but {} labels",
                    sequences.len(),
                    labels.len()
                ),
            ));
        }
        let width = sequences.first().map_or(0, |s| s.as_ref().len());
        let mut seqs = Vec::with_capacity(sequences.len() * width);
        for s in sequences {
            let s = s.as_ref();
            if s.len() != width {
                return Err(SeqConvError::shape(
                    "memory_table",
                    format!("sequence of width {} in a table of width {width}", s.len()),
                ));
            }
            seqs.extend_from_slice(s);
        }
        Ok(Self {
            seqs,
            width,
            labels,
            attrs,
        })
    }
}

impl SequenceTable for MemoryTable {
    fn nrows(&self) -> usize {
        self.labels.len()
    }

    fn seq_width(&self) -> usize {
        self.width
    }

    fn attrs(&self) -> TableAttrs {
        self.attrs
    }

    fn read(&self, start: usize, stop: usize) -> Result<TableRows> {
        let stop = stop.min(self.nrows());
        let start = start.min(stop);
        Ok(TableRows {
            seqs: self.seqs[start * self.width..stop * self.width].to_vec(),
            width: self.width,
            labels: self.labels[start..stop].to_vec(),
        })
    }
}

/// Everything the prefetch worker needs to produce one batch.
#[derive(Clone)]
struct BatchLoader {
    table: Arc<dyn SequenceTable>,
    encoder: SequenceEncoder,
    trim: (usize, usize),
    batch_size: usize,
    device: Option<Device>,
}

impl BatchLoader {
    fn load<T: Float>(&self, start: usize) -> Result<Batch<T>> {
        let stop = start + self.batch_size;
        let rows = self.table.read(start, stop)?;
        let rows = TrustedData::new(rows)
            .map_err(|_| {
                SeqConvError::precondition(format!(
                    "table rows {start}..{stop} are malformed (sequence bytes do not match labels)"
                ))
            })?
            .into_inner();
        if rows.is_empty() {
            return Err(SeqConvError::precondition(format!(
                "table read of rows {start}..{stop} returned no rows"
            )));
        }

        let sequences = if rows.width == 0 {
            vec![&[][..]; rows.len()]
        } else {
            rows.seqs.chunks_exact(rows.width).collect()
        };
        let trimmed = sequences
            .into_iter()
            .map(|s| trim(s, self.trim))
            .collect::<Result<Vec<_>>>()?;
        let inputs = self.encoder.encode::<T, _>(&trimmed)?;
        let labels = rows.labels.iter().map(|&l| T::from_f64(l)).collect();
        let targets = Tensor::try_new(vec![rows.len(), 1], labels)?;

        let batch = Batch {
            inputs: vec![BatchTensor::Host(inputs)],
            targets: vec![BatchTensor::Host(targets)],
        };
        match &self.device {
            Some(device) => batch.into_device(device),
            None => Ok(batch),
        }
    }
}

/// A provider over a [`SequenceTable`] with one batch of prefetch.
pub struct TableProvider<T> {
    loader: BatchLoader,
    attrs: TableAttrs,
    seq_length: usize,
    n_rows: usize,
    cursor: usize,
    device: Device,
    stream: Stream,
    next: Option<Pending<Result<Batch<T>>>>,
}

impl<T> core::fmt::Debug for TableProvider<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TableProvider")
            .field("attrs", &self.attrs)
            .field("batch_size", &self.loader.batch_size)
            .field("seq_length", &self.seq_length)
            .field("n_rows", &self.n_rows)
            .field("cursor", &self.cursor)
            .field("stream", &self.stream.name())
            .finish()
    }
}

impl<T: Float> TableProvider<T> {
    /// Opens a provider over `table` and starts prefetching the first batch.
    ///
    /// # Errors
    /// Returns a precondition error when the batch size is not a positive
    /// multiple of the table's native `BATCH_SIZE`, or when the trim is longer
    /// than the stored sequences.
    pub fn new(
        table: Arc<dyn SequenceTable>,
        config: ProviderConfig,
        device: Device,
    ) -> Result<Self> {
        config.validate()?;
        let attrs = table.attrs();
        if attrs.batch_size == 0 {
            return Err(SeqConvError::precondition("table BATCH_SIZE is zero"));
        }
        let batch_size = config.batch_size.unwrap_or(attrs.batch_size);
        if batch_size % attrs.batch_size != 0 {
            return Err(SeqConvError::precondition(format!(
                "batch size {batch_size} is not a multiple of the table's BATCH_SIZE {}",
                attrs.batch_size
            )));
        }

        let (leading, trailing) = config.trim_pair();
        let seq_length = table
            .seq_width()
            .checked_sub(leading + trailing)
            .ok_or_else(|| {
                SeqConvError::precondition(format!(
                    "trim {leading}+{trailing} exceeds the table's sequence width {}",
                    table.seq_width()
                ))
            })?;

        let n_rows = table.nrows();
        let loader = BatchLoader {
            table,
            encoder: SequenceEncoder::new(Alphabet::dna(), config.unknown),
            trim: (leading, trailing),
            batch_size,
            device: config.gpu.then(|| device.clone()),
        };
        log::debug!(
            "table provider: {n_rows} rows, batch size {batch_size}, sequence length {seq_length}"
        );

        let mut provider = Self {
            loader,
            attrs,
            seq_length,
            n_rows,
            cursor: 0,
            device,
            stream: Stream::new("seqconv-prefetch")?,
            next: None,
        };
        provider.prefetch();
        Ok(provider)
    }

    fn prefetch(&mut self) {
        self.next = if self.cursor < self.n_rows {
            let loader = self.loader.clone();
            let start = self.cursor;
            log::trace!("prefetching rows from {start}");
            Some(self.stream.enqueue(move || loader.load::<T>(start)))
        } else {
            None
        };
    }

    /// Sequence length after trimming.
    pub fn seq_length(&self) -> usize {
        self.seq_length
    }

    pub fn attrs(&self) -> TableAttrs {
        self.attrs
    }

    /// Positive examples per batch.
    pub fn n_pos_batch(&self) -> usize {
        self.attrs.pos_per_batch * (self.loader.batch_size / self.attrs.batch_size)
    }

    /// Negative examples per batch.
    pub fn n_neg_batch(&self) -> usize {
        self.attrs.neg_per_batch * (self.loader.batch_size / self.attrs.batch_size)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// The device batches are moved to when device-resident.
    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn residency(&self) -> Residency {
        if self.loader.device.is_some() {
            Residency::Device
        } else {
            Residency::Host
        }
    }

    /// A provider at the same position whose batches are moved onto `device`.
    pub fn into_device(mut self, device: &Device) -> Result<Self> {
        self.stream.synchronize()?;
        self.loader.device = Some(device.clone());
        self.device = device.clone();
        self.prefetch();
        Ok(self)
    }

    /// A provider at the same position whose batches stay on the host.
    pub fn into_host(mut self) -> Result<Self> {
        self.stream.synchronize()?;
        self.loader.device = None;
        self.prefetch();
        Ok(self)
    }
}

impl<T: Float> BatchSource<T> for TableProvider<T> {
    fn next_batch(&mut self) -> Result<BatchStep<T>> {
        if self.cursor >= self.n_rows {
            self.cursor = 0;
            self.prefetch();
            return Ok(BatchStep::EndOfSweep);
        }

        let pending = self
            .next
            .take()
            .ok_or_else(|| SeqConvError::invalid_state("no batch was prefetched"))?;
        let batch = pending.wait()??;
        self.cursor += self.loader.batch_size;
        self.prefetch();
        Ok(BatchStep::Batch(batch))
    }

    fn n_batches(&self) -> usize {
        self.n_rows.div_ceil(self.loader.batch_size)
    }

    fn batch_size(&self) -> usize {
        self.loader.batch_size
    }
}

//! Batches over in-memory arrays.

use super::{Batch, BatchSource, BatchStep, BatchTensor, ProviderConfig, Residency};
use crate::device::Device;
use crate::encoding::{trim, Alphabet, SequenceEncoder};
use crate::error::{Result, SeqConvError};
use crate::tensors::{Float, Tensor};

/// Raw sequences for one or several sequence inputs per example.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceInputs {
    /// One sequence per example.
    Single(Vec<Vec<u8>>),
    /// Several sequence inputs; each inner list holds one sequence per example.
    Multiple(Vec<Vec<Vec<u8>>>),
}

impl SequenceInputs {
    fn into_lists(self) -> Vec<Vec<Vec<u8>>> {
        match self {
            Self::Single(seqs) => vec![seqs],
            Self::Multiple(lists) => lists,
        }
    }
}

impl From<Vec<Vec<u8>>> for SequenceInputs {
    fn from(seqs: Vec<Vec<u8>>) -> Self {
        Self::Single(seqs)
    }
}

impl From<Vec<&str>> for SequenceInputs {
    fn from(seqs: Vec<&str>) -> Self {
        Self::Single(seqs.into_iter().map(|s| s.as_bytes().to_vec()).collect())
    }
}

impl From<Vec<Vec<Vec<u8>>>> for SequenceInputs {
    fn from(lists: Vec<Vec<Vec<u8>>>) -> Self {
        Self::Multiple(lists)
    }
}

/// One target tensor or several, each with one row per example.
#[derive(Debug, Clone, PartialEq)]
pub enum Targets<T> {
    Single(Tensor<T>),
    Multiple(Vec<Tensor<T>>),
}

impl<T> Targets<T> {
    fn into_vec(self) -> Vec<Tensor<T>> {
        match self {
            Self::Single(t) => vec![t],
            Self::Multiple(ts) => ts,
        }
    }
}

impl<T> From<Tensor<T>> for Targets<T> {
    fn from(t: Tensor<T>) -> Self {
        Self::Single(t)
    }
}

impl<T> From<Vec<Tensor<T>>> for Targets<T> {
    fn from(ts: Vec<Tensor<T>>) -> Self {
        Self::Multiple(ts)
    }
}

/// A provider over sequences and targets held in memory.
///
/// Every batch is a contiguous slice of rows; the last batch of a sweep holds
/// the remainder and may be short. All batches are encoded, and moved to the
/// device when the configuration asks for it, at construction.
#[derive(Debug)]
pub struct ArrayProvider<T> {
    batches: Vec<Batch<T>>,
    batch_size: usize,
    n_rows: usize,
    cursor: usize,
    device: Device,
    residency: Residency,
}

impl<T: Float> ArrayProvider<T> {
    /// Encodes `sequences` (trimmed per `config`) and slices them, the
    /// `extra_inputs` and the `targets` into batches.
    ///
    /// # Errors
    /// - missing or zero `batch_size`, or a trim longer than a sequence →
    ///   precondition error
    /// - inputs or targets that disagree on the number of rows → shape error
    pub fn new(
        config: ProviderConfig,
        sequences: impl Into<SequenceInputs>,
        extra_inputs: Vec<Tensor<T>>,
        targets: impl Into<Targets<T>>,
        device: Device,
    ) -> Result<Self> {
        config.validate()?;
        let batch_size = config.batch_size.ok_or_else(|| {
            SeqConvError::precondition("array providers need an explicit batch_size")
        })?;
        let encoder = SequenceEncoder::new(Alphabet::dna(), config.unknown);
        let trim_pair = config.trim_pair();

        let mut inputs = Vec::new();
        for list in sequences.into().into_lists() {
            let trimmed = list
                .iter()
                .map(|s| trim(s, trim_pair))
                .collect::<Result<Vec<_>>>()?;
            inputs.push(encoder.encode::<T, _>(&trimmed)?);
        }
        inputs.extend(extra_inputs);
        let targets = targets.into().into_vec();

        let n_rows = inputs
            .iter()
            .chain(&targets)
            .next()
            .map_or(0, Tensor::rows);
        if let Some(bad) = inputs.iter().chain(&targets).find(|t| t.rows() != n_rows) {
            return Err(SeqConvError::shape(
                "array_provider",
                format!(
                    "every input and target needs {n_rows} rows, found shape {:?}",
                    bad.shape
                ),
            ));
        }

        let whole = Batch {
            inputs: inputs.into_iter().map(BatchTensor::Host).collect(),
            targets: targets.into_iter().map(BatchTensor::Host).collect(),
        };
        let whole = if config.gpu {
            whole.into_device(&device)?
        } else {
            whole
        };
        let batches = (0..n_rows)
            .step_by(batch_size)
            .map(|start| whole.slice_rows(start, (start + batch_size).min(n_rows)))
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "array provider: {n_rows} rows in {} batches of {batch_size}",
            batches.len()
        );
        Ok(Self {
            batches,
            batch_size,
            n_rows,
            cursor: 0,
            device,
            residency: if config.gpu {
                Residency::Device
            } else {
                Residency::Host
            },
        })
    }

    /// Rows across all batches.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    /// Moves every batch onto `device`, returning a provider over the new buffers.
    pub fn into_device(self, device: &Device) -> Result<Self> {
        let batches = self
            .batches
            .into_iter()
            .map(|b| b.into_device(device))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            batches,
            device: device.clone(),
            residency: Residency::Device,
            ..self
        })
    }

    /// Moves every batch to host memory.
    pub fn into_host(self) -> Result<Self> {
        let batches = self
            .batches
            .into_iter()
            .map(Batch::into_host)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            batches,
            residency: Residency::Host,
            ..self
        })
    }

    /// The device batches are moved to when device-resident.
    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl<T: Float> BatchSource<T> for ArrayProvider<T> {
    fn next_batch(&mut self) -> Result<BatchStep<T>> {
        match self.batches.get(self.cursor) {
            Some(batch) => {
                self.cursor += 1;
                Ok(BatchStep::Batch(batch.clone()))
            }
            None => {
                self.cursor = 0;
                Ok(BatchStep::EndOfSweep)
            }
        }
    }

    fn n_batches(&self) -> usize {
        self.batches.len()
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }
}

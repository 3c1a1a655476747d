//! Batched sequence providers.
//!
//! A provider hands out fixed-size batches of encoded sequences and their
//! targets, one pull at a time. After the last batch of a sweep it reports
//! [`BatchStep::EndOfSweep`] once and rewinds, so the next pull starts a new sweep:
//!
//! ```rust
//! use std::sync::Arc;
//! use seqconv::device::Device;
//! use seqconv::memory::MemoryPool;
//! use seqconv::provider::{ArrayProvider, BatchSource, BatchStep, ProviderConfig};
//! use seqconv::tensors::Tensor;
//!
//! let device = Device::cpu(Arc::new(MemoryPool::new()));
//! let seqs = vec![b"ACGT".to_vec(), b"CCGG".to_vec(), b"TTTA".to_vec()];
//! let targets = Tensor::new(vec![3, 1], vec![1.0f32, 0.0, 1.0]);
//! let mut provider =
//!     ArrayProvider::new(ProviderConfig::new(2), seqs, Vec::new(), targets, device).unwrap();
//!
//! assert_eq!(provider.n_batches(), 2);
//! assert!(matches!(provider.next_batch().unwrap(), BatchStep::Batch(_)));
//! assert!(matches!(provider.next_batch().unwrap(), BatchStep::Batch(_)));
//! assert!(matches!(provider.next_batch().unwrap(), BatchStep::EndOfSweep));
//! assert_eq!(provider.sweep().count(), 2);
//! ```
//!
//! Two sources are provided: [`ArrayProvider`] over in-memory arrays and
//! [`TableProvider`] over a row-oriented [`SequenceTable`], which encodes the next
//! batch on a background [`Stream`](crate::stream::Stream) while the current one
//! is consumed.

pub mod array;
pub mod config;
pub mod table;

pub use array::{ArrayProvider, SequenceInputs, Targets};
pub use config::ProviderConfig;
pub use table::{MemoryTable, SequenceTable, TableAttrs, TableProvider, TableRows};

use crate::device::{Device, DeviceTensor};
use crate::error::Result;
use crate::tensors::{Float, Tensor};
use core::marker::PhantomData;

/// Where a batch's tensors live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    Host,
    Device,
}

/// A tensor in a batch, either on the host or on a device.
#[derive(Debug, Clone)]
pub enum BatchTensor<T> {
    Host(Tensor<T>),
    Device(DeviceTensor<T>),
}

impl<T: Float> BatchTensor<T> {
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Host(t) => &t.shape,
            Self::Device(t) => t.shape(),
        }
    }

    /// Rows along the leading axis.
    pub fn rows(&self) -> usize {
        self.shape().first().copied().unwrap_or(0)
    }

    pub fn residency(&self) -> Residency {
        match self {
            Self::Host(_) => Residency::Host,
            Self::Device(_) => Residency::Device,
        }
    }

    /// Copies the tensor onto `device`, if it is not already there.
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        match self {
            Self::Host(t) => Ok(Self::Device(t.to_device(device)?)),
            Self::Device(t) if t.device().same_as(device) => Ok(self.clone()),
            Self::Device(t) => Ok(Self::Device(t.to_host()?.into_device(device)?)),
        }
    }

    /// Copies the tensor to host memory.
    pub fn to_host(&self) -> Result<Self> {
        match self {
            Self::Host(_) => Ok(self.clone()),
            Self::Device(t) => Ok(Self::Host(t.to_host()?)),
        }
    }

    /// Moves the tensor onto `device`.
    pub fn into_device(self, device: &Device) -> Result<Self> {
        match self {
            Self::Host(t) => Ok(Self::Device(t.into_device(device)?)),
            other => other.to_device(device),
        }
    }

    /// The host tensor, downloading it if necessary.
    pub fn into_host_tensor(self) -> Result<Tensor<T>> {
        match self {
            Self::Host(t) => Ok(t),
            Self::Device(t) => t.to_host(),
        }
    }

    /// The device tensor, when the data is device-resident.
    pub fn as_device(&self) -> Option<&DeviceTensor<T>> {
        match self {
            Self::Device(t) => Some(t),
            Self::Host(_) => None,
        }
    }

    /// The host tensor, when the data is host-resident.
    pub fn as_host(&self) -> Option<&Tensor<T>> {
        match self {
            Self::Host(t) => Some(t),
            Self::Device(_) => None,
        }
    }

    fn slice_rows(&self, start: usize, end: usize) -> Result<Self> {
        match self {
            Self::Host(t) => Ok(Self::Host(t.slice_rows(start, end)?)),
            Self::Device(t) => Ok(Self::Device(t.slice_rows(start, end)?)),
        }
    }
}

/// Inputs and targets for one batch.
#[derive(Debug, Clone)]
pub struct Batch<T> {
    /// Encoded sequence inputs first, then any extra dense inputs.
    pub inputs: Vec<BatchTensor<T>>,
    pub targets: Vec<BatchTensor<T>>,
}

impl<T: Float> Batch<T> {
    /// Rows in the batch.
    pub fn rows(&self) -> usize {
        self.inputs
            .iter()
            .chain(&self.targets)
            .next()
            .map_or(0, BatchTensor::rows)
    }

    /// Host residency only if every tensor is on the host.
    pub fn residency(&self) -> Residency {
        if self
            .inputs
            .iter()
            .chain(&self.targets)
            .all(|t| t.residency() == Residency::Host)
        {
            Residency::Host
        } else {
            Residency::Device
        }
    }

    /// Copies every tensor onto `device`.
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            inputs: map_all(&self.inputs, |t| t.to_device(device))?,
            targets: map_all(&self.targets, |t| t.to_device(device))?,
        })
    }

    /// Copies every tensor to the host.
    pub fn to_host(&self) -> Result<Self> {
        Ok(Self {
            inputs: map_all(&self.inputs, BatchTensor::to_host)?,
            targets: map_all(&self.targets, BatchTensor::to_host)?,
        })
    }

    /// Moves every tensor onto `device`.
    pub fn into_device(self, device: &Device) -> Result<Self> {
        Ok(Self {
            inputs: into_all(self.inputs, |t| t.into_device(device))?,
            targets: into_all(self.targets, |t| t.into_device(device))?,
        })
    }

    /// Moves every tensor to the host.
    pub fn into_host(self) -> Result<Self> {
        Ok(Self {
            inputs: into_all(self.inputs, |t| t.into_host_tensor().map(BatchTensor::Host))?,
            targets: into_all(self.targets, |t| t.into_host_tensor().map(BatchTensor::Host))?,
        })
    }

    pub(crate) fn slice_rows(&self, start: usize, end: usize) -> Result<Self> {
        Ok(Self {
            inputs: map_all(&self.inputs, |t| t.slice_rows(start, end))?,
            targets: map_all(&self.targets, |t| t.slice_rows(start, end))?,
        })
    }
}

fn map_all<T, F>(tensors: &[BatchTensor<T>], f: F) -> Result<Vec<BatchTensor<T>>>
where
    F: FnMut(&BatchTensor<T>) -> Result<BatchTensor<T>>,
{
    tensors.iter().map(f).collect()
}

fn into_all<T, F>(tensors: Vec<BatchTensor<T>>, f: F) -> Result<Vec<BatchTensor<T>>>
where
    F: FnMut(BatchTensor<T>) -> Result<BatchTensor<T>>,
{
    tensors.into_iter().map(f).collect()
}

/// The outcome of pulling from a provider.
#[derive(Debug, Clone)]
pub enum BatchStep<T> {
    Batch(Batch<T>),
    /// The sweep is over; the provider has rewound.
    EndOfSweep,
}

/// A pull-based source of batches.
pub trait BatchSource<T: Float> {
    /// Returns the next batch, or [`BatchStep::EndOfSweep`] after the last one.
    fn next_batch(&mut self) -> Result<BatchStep<T>>;

    /// Batches per sweep.
    fn n_batches(&self) -> usize;

    /// Rows per full batch.
    fn batch_size(&self) -> usize;

    /// Iterates over the rest of the current sweep.
    ///
    /// The iterator consumes the `EndOfSweep` marker, so the provider is rewound
    /// when it is exhausted. It stops after the first error.
    fn sweep(&mut self) -> Sweep<'_, Self, T>
    where
        Self: Sized,
    {
        Sweep {
            source: self,
            done: false,
            _marker: PhantomData,
        }
    }
}

/// One sweep over a [`BatchSource`], as an iterator.
#[derive(Debug)]
pub struct Sweep<'a, S, T> {
    source: &'a mut S,
    done: bool,
    _marker: PhantomData<T>,
}

impl<S: BatchSource<T>, T: Float> Iterator for Sweep<'_, S, T> {
    type Item = Result<Batch<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.source.next_batch() {
            Ok(BatchStep::Batch(batch)) => Some(Ok(batch)),
            Ok(BatchStep::EndOfSweep) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

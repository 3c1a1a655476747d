//! Devices and device-resident tensors.
//!
//! A [`Device`] pairs a compute [`Backend`] with the [`Allocator`] every buffer on
//! it is reserved from. A [`DeviceTensor`] is an immutable buffer on a device:
//! kernels read device tensors and always produce new ones, so cloning a device
//! tensor only shares the handle.
//!
//! Moving data between host and device is explicit and never a side effect of
//! setting a flag:
//!
//! ```rust
//! use std::sync::Arc;
//! use seqconv::device::Device;
//! use seqconv::memory::MemoryPool;
//! use seqconv::tensors::Tensor;
//!
//! let pool = Arc::new(MemoryPool::new());
//! let device = Device::cpu(pool.clone());
//! let host = Tensor::new(vec![2, 2], vec![1.0f32, 2.0, 3.0, 4.0]);
//! let on_device = host.to_device(&device).unwrap();
//! assert_eq!(pool.stats().in_use, 16);
//! assert_eq!(on_device.to_host().unwrap(), host);
//! ```
//!
//! On the `wgpu` backend `f32` tensors live in GPU storage buffers. WGSL has no
//! `f64`, so `f64` tensors on a `wgpu` device are kept in host-side staging memory
//! and their kernels run on the CPU path.

use crate::backend::{get_backend, Backend};
use crate::error::{Result, SeqConvError};
use crate::memory::{Allocation, Allocator};
use crate::tensors::{leading_split, Float, Tensor};
use std::borrow::Cow;
use std::sync::Arc;

/// A compute device and the allocator its buffers come from.
#[derive(Debug, Clone)]
pub struct Device {
    backend: Backend,
    allocator: Arc<dyn Allocator>,
}

impl Device {
    /// A CPU device; kernels run on the `rayon` thread pool.
    pub fn cpu(allocator: Arc<dyn Allocator>) -> Self {
        Self {
            backend: Backend::Cpu,
            allocator,
        }
    }

    /// A GPU device backed by `wgpu`.
    ///
    /// # Errors
    /// Fails when no adapter or device can be acquired.
    #[cfg(feature = "wgpu")]
    pub fn wgpu(allocator: Arc<dyn Allocator>) -> Result<Self> {
        crate::ops::wgpu::context()?;
        Ok(Self {
            backend: Backend::Wgpu,
            allocator,
        })
    }

    /// Builds a device for `backend`.
    pub fn from_backend(backend: Backend, allocator: Arc<dyn Allocator>) -> Result<Self> {
        match backend {
            Backend::Cpu => Ok(Self::cpu(allocator)),
            #[cfg(feature = "wgpu")]
            Backend::Wgpu => Self::wgpu(allocator),
            #[cfg(not(feature = "wgpu"))]
            Backend::Wgpu => Err(SeqConvError::Device(
                "the wgpu backend was not compiled in (enable the `wgpu` feature)".into(),
            )),
        }
    }

    /// Builds a device for the process default backend (see [`crate::backend`]).
    pub fn default_backend(allocator: Arc<dyn Allocator>) -> Result<Self> {
        Self::from_backend(get_backend(), allocator)
    }

    /// The backend kernels on this device run on.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// The allocator buffers on this device are reserved from.
    pub fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.allocator
    }

    /// Moves `data` onto this device as a tensor of `shape`.
    pub fn alloc_from_vec<T: Float>(
        &self,
        shape: impl Into<Vec<usize>>,
        data: Vec<T>,
    ) -> Result<DeviceTensor<T>> {
        let shape = shape.into();
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(SeqConvError::shape(
                "alloc_from_vec",
                format!(
                    "shape {shape:?} is incompatible with {} data elements",
                    data.len()
                ),
            ));
        }
        let allocation = self.allocator.allocate(core::mem::size_of_val(data.as_slice()))?;

        #[cfg(feature = "wgpu")]
        if self.backend == Backend::Wgpu {
            if let Some(values) = T::as_f32_slice(&data) {
                let buffer = crate::ops::wgpu::upload(values)?;
                return Ok(DeviceTensor::from_parts(
                    self.clone(),
                    shape,
                    Storage::Wgpu(buffer),
                    allocation,
                ));
            }
        }

        Ok(DeviceTensor::from_parts(
            self.clone(),
            shape,
            Storage::Host(data),
            allocation,
        ))
    }

    /// Whether two handles refer to the same backend and allocator.
    pub fn same_as(&self, other: &Device) -> bool {
        self.backend == other.backend && Arc::ptr_eq(&self.allocator, &other.allocator)
    }

    pub(crate) fn ensure_same(&self, op: &str, other: &Device) -> Result<()> {
        if self.same_as(other) {
            Ok(())
        } else {
            Err(SeqConvError::Device(format!(
                "{op}: operands live on different devices ({} and {})",
                self.backend, other.backend
            )))
        }
    }
}

pub(crate) enum Storage<T> {
    Host(Vec<T>),
    #[cfg(feature = "wgpu")]
    Wgpu(wgpu::Buffer),
}

struct DeviceStorage<T> {
    data: Storage<T>,
    _allocation: Allocation,
}

/// An immutable tensor resident on a [`Device`].
pub struct DeviceTensor<T> {
    shape: Vec<usize>,
    storage: Arc<DeviceStorage<T>>,
    device: Device,
}

impl<T> Clone for DeviceTensor<T> {
    fn clone(&self) -> Self {
        Self {
            shape: self.shape.clone(),
            storage: Arc::clone(&self.storage),
            device: self.device.clone(),
        }
    }
}

impl<T> core::fmt::Debug for DeviceTensor<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceTensor")
            .field("shape", &self.shape)
            .field("backend", &self.device.backend)
            .finish()
    }
}

impl<T: Float> DeviceTensor<T> {
    pub(crate) fn from_parts(
        device: Device,
        shape: Vec<usize>,
        data: Storage<T>,
        allocation: Allocation,
    ) -> Self {
        Self {
            shape,
            storage: Arc::new(DeviceStorage {
                data,
                _allocation: allocation,
            }),
            device,
        }
    }

    /// The tensor's shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// Whether the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the leading axis.
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// The device this tensor lives on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Copies the tensor back to host memory.
    ///
    /// This is the synchronisation point for the buffer: on the GPU it waits for
    /// every command touching the buffer to finish.
    pub fn to_host(&self) -> Result<Tensor<T>> {
        Ok(Tensor::new(self.shape.clone(), self.host_view()?.into_owned()))
    }

    /// Reinterprets the tensor with a new shape of the same element count.
    ///
    /// The buffer is shared, not copied.
    pub fn reshape(&self, shape: impl Into<Vec<usize>>) -> Result<Self> {
        let shape = shape.into();
        if shape.iter().product::<usize>() != self.len() {
            return Err(SeqConvError::shape(
                "reshape",
                format!("cannot view {:?} as {shape:?}", self.shape),
            ));
        }
        Ok(Self {
            shape,
            storage: Arc::clone(&self.storage),
            device: self.device.clone(),
        })
    }

    /// Copies rows `start..end` of the leading axis into a new device tensor.
    pub fn slice_rows(&self, start: usize, end: usize) -> Result<Self> {
        let (row_len, rows) = leading_split(&self.shape)?;
        if start > end || end > rows {
            return Err(SeqConvError::shape(
                "slice_rows",
                format!("row range {start}..{end} out of bounds for {rows} rows"),
            ));
        }
        let mut shape = self.shape.clone();
        shape[0] = end - start;
        let range = start * row_len..end * row_len;

        match &self.storage.data {
            Storage::Host(data) => self.device.alloc_from_vec(shape, data[range].to_vec()),
            #[cfg(feature = "wgpu")]
            Storage::Wgpu(buffer) => {
                let allocation = self
                    .device
                    .allocator
                    .allocate(range.len() * core::mem::size_of::<T>())?;
                let copy = crate::ops::wgpu::copy_range(buffer, range.start, range.len())?;
                Ok(Self::from_parts(
                    self.device.clone(),
                    shape,
                    Storage::Wgpu(copy),
                    allocation,
                ))
            }
        }
    }

    /// Borrows host-resident data, or downloads device data.
    pub(crate) fn host_view(&self) -> Result<Cow<'_, [T]>> {
        match &self.storage.data {
            Storage::Host(data) => Ok(Cow::Borrowed(data.as_slice())),
            #[cfg(feature = "wgpu")]
            Storage::Wgpu(buffer) => {
                let values = crate::ops::wgpu::download(buffer, self.len())?;
                T::from_f32_vec(values).map(Cow::Owned).ok_or_else(|| {
                    SeqConvError::invalid_state("GPU storage holds a non-f32 tensor")
                })
            }
        }
    }

    /// The GPU buffer, when the tensor lives in one.
    #[cfg(feature = "wgpu")]
    pub(crate) fn wgpu_buffer(&self) -> Option<&wgpu::Buffer> {
        match &self.storage.data {
            Storage::Wgpu(buffer) => Some(buffer),
            Storage::Host(_) => None,
        }
    }
}

impl<T: Float> Tensor<T> {
    /// Copies this tensor onto `device`, returning a new buffer handle.
    pub fn to_device(&self, device: &Device) -> Result<DeviceTensor<T>> {
        device.alloc_from_vec(self.shape.clone(), self.data.clone())
    }

    /// Moves this tensor onto `device` without an intermediate host copy.
    pub fn into_device(self, device: &Device) -> Result<DeviceTensor<T>> {
        device.alloc_from_vec(self.shape, self.data)
    }
}

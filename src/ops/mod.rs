//! # Kernel Layer
//!
//! Numeric kernels for 1-D convolution and pooling, split by backend.
//!
//! ## Submodules
//!
//! - [`cpu`] — rayon-parallel slice kernels (always available, and the only path
//!   for `f64`)
//! - [`wgpu`] *(opt-in)* — WGSL compute pipelines operating on GPU-resident buffers
//! - [`dispatch`] — picks a backend per call from the inputs' device and falls back
//!   to the CPU when the GPU path does not apply
//!
//! Kernel geometry is validated once, here, before any backend runs, so every
//! backend can index without bounds surprises.
//!
//! ## Feature Flags
//!
//! - `wgpu` — enables the `wgpu` (WebGPU) backend

pub mod cpu;
pub mod dispatch;
#[cfg(feature = "wgpu")]
pub mod wgpu;

use crate::error::{Result, SeqConvError};

/// Validated geometry of a strided 1-D convolution.
///
/// Input is `(n_rows, width)`, the filter bank `(n_filters, filter_width)` and the
/// output `(n_filters, n_rows, width / stride)`. Inputs are zero-padded by
/// `filter_width / 2` on each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub n_rows: usize,
    pub width: usize,
    pub n_filters: usize,
    pub filter_width: usize,
    pub stride: usize,
}

impl ConvGeometry {
    /// Validates and builds a convolution geometry.
    ///
    /// # Errors
    /// - `filter_width == 0` or `stride == 0` → [`SeqConvError::InvalidArgument`]
    /// - `width == 0`, `width / stride == 0`, or a filter wider than the padded
    ///   input → [`SeqConvError::Shape`]
    pub fn new(
        n_rows: usize,
        width: usize,
        n_filters: usize,
        filter_width: usize,
        stride: usize,
    ) -> Result<Self> {
        if filter_width == 0 {
            return Err(SeqConvError::invalid_argument(
                "filter_width",
                "must be at least 1",
            ));
        }
        if stride == 0 {
            return Err(SeqConvError::invalid_argument("stride", "must be at least 1"));
        }
        if width == 0 {
            return Err(SeqConvError::shape("conv1d", "input width is zero"));
        }
        if width / stride == 0 {
            return Err(SeqConvError::shape(
                "conv1d",
                format!("stride {stride} leaves no output columns for width {width}"),
            ));
        }
        let geometry = Self {
            n_rows,
            width,
            n_filters,
            filter_width,
            stride,
        };
        if filter_width > width + 2 * geometry.pad() {
            return Err(SeqConvError::shape(
                "conv1d",
                format!(
                    "filter width {filter_width} exceeds padded input width {}",
                    width + 2 * geometry.pad()
                ),
            ));
        }
        Ok(geometry)
    }

    /// Zero padding applied to each side of a row.
    pub fn pad(&self) -> usize {
        self.filter_width / 2
    }

    /// Output columns per row.
    pub fn out_width(&self) -> usize {
        self.width / self.stride
    }

    /// Shape of the activation tensor.
    pub fn output_shape(&self) -> Vec<usize> {
        vec![self.n_filters, self.n_rows, self.out_width()]
    }
}

/// Validated geometry of a pooling call over the last axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolGeometry {
    /// Product of every axis but the last.
    pub rows: usize,
    /// Extent of the pooled (last) axis.
    pub width: usize,
    /// Window size, at least 2.
    pub pool: usize,
}

impl PoolGeometry {
    /// Builds the geometry of pooling `shape` with windows of `pool`.
    pub fn new(shape: &[usize], pool: usize) -> Result<Self> {
        let Some((&width, outer)) = shape.split_last() else {
            return Err(SeqConvError::shape("pool", "cannot pool a scalar"));
        };
        if pool > width {
            return Err(SeqConvError::shape(
                "pool",
                format!("pool size {pool} exceeds pooled extent {width}"),
            ));
        }
        Ok(Self {
            rows: outer.iter().product(),
            width,
            pool,
        })
    }

    /// Pooled columns per row; trailing columns that do not fill a window drop.
    pub fn out_width(&self) -> usize {
        self.width / self.pool
    }
}

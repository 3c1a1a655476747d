//! Strided 1-D convolution over encoded sequences.
//!
//! Input rows are `(n_rows, width)` and a filter bank is `(n_filters,
//! filter_width)`. Each row is zero-padded by `filter_width / 2` on both sides, so
//! before striding the output is as wide as the input; with stride `s` every
//! `s`-th column is kept and the activations are `(n_filters, n_rows, width / s)`.
//!
//! The product is evaluated window by window against the filter bank; no im2col
//! matrix is materialised. Sums accumulate in the element type.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use seqconv::conv::Conv1d;
//! use seqconv::device::Device;
//! use seqconv::memory::MemoryPool;
//! use seqconv::tensors::Tensor;
//!
//! let device = Device::cpu(Arc::new(MemoryPool::new()));
//! let x = Tensor::new(vec![3, 10], vec![1.0f64; 30]).to_device(&device).unwrap();
//! let w = Tensor::new(vec![2, 5], vec![0.5f64; 10]).to_device(&device).unwrap();
//!
//! let conv = Conv1d::new(2).unwrap();
//! let y = conv.forward(&x, &w).unwrap();
//! assert_eq!(y.shape(), &[2, 3, 5]);
//! ```

use crate::device::DeviceTensor;
use crate::error::{Result, SeqConvError};
use crate::ops::{dispatch, ConvGeometry};
use crate::tensors::Float;

/// A strided 1-D convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv1d {
    stride: usize,
}

impl Conv1d {
    /// Creates a convolution with the given stride.
    pub fn new(stride: usize) -> Result<Self> {
        if stride == 0 {
            return Err(SeqConvError::invalid_argument("stride", "must be at least 1"));
        }
        Ok(Self { stride })
    }

    /// The stride between output columns.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Convolves `input` `(n_rows, width)` with `filters` `(n_filters,
    /// filter_width)`, giving `(n_filters, n_rows, width / stride)`.
    pub fn forward<T: Float>(
        &self,
        input: &DeviceTensor<T>,
        filters: &DeviceTensor<T>,
    ) -> Result<DeviceTensor<T>> {
        let [n_rows, width] = matrix("conv1d", "input", input.shape())?;
        let [n_filters, filter_width] = matrix("conv1d", "filters", filters.shape())?;
        input.device().ensure_same("conv1d", filters.device())?;

        let g = ConvGeometry::new(n_rows, width, n_filters, filter_width, self.stride)?;
        dispatch::conv1d(input, filters, &g)
    }

    /// Gradient of the filter bank given the forward input and the gradient of
    /// the activations, `(n_filters, n_rows, width / stride)`.
    pub fn grad_weights<T: Float>(
        &self,
        input: &DeviceTensor<T>,
        df_output: &DeviceTensor<T>,
        filter_width: usize,
        n_filters: usize,
    ) -> Result<DeviceTensor<T>> {
        let [n_rows, width] = matrix("conv1d_grad_weights", "input", input.shape())?;
        input
            .device()
            .ensure_same("conv1d_grad_weights", df_output.device())?;

        let g = ConvGeometry::new(n_rows, width, n_filters, filter_width, self.stride)?;
        check_activations("conv1d_grad_weights", df_output.shape(), &g)?;
        dispatch::conv1d_grad_weights(input, df_output, &g)
    }

    /// Gradient of the forward input, `(n_rows, input_width)`.
    pub fn grad_input<T: Float>(
        &self,
        filters: &DeviceTensor<T>,
        df_output: &DeviceTensor<T>,
        input_width: usize,
    ) -> Result<DeviceTensor<T>> {
        let [n_filters, filter_width] = matrix("conv1d_grad_input", "filters", filters.shape())?;
        filters
            .device()
            .ensure_same("conv1d_grad_input", df_output.device())?;
        let n_rows = match df_output.shape() {
            [_, rows, _] => *rows,
            other => {
                return Err(SeqConvError::shape(
                    "conv1d_grad_input",
                    format!("df_output must be (n_filters, n_rows, out_width), got {other:?}"),
                ));
            }
        };

        let g = ConvGeometry::new(n_rows, input_width, n_filters, filter_width, self.stride)?;
        check_activations("conv1d_grad_input", df_output.shape(), &g)?;
        dispatch::conv1d_grad_input(filters, df_output, &g)
    }
}

/// Forward convolution with an explicit stride.
pub fn conv1d<T: Float>(
    input: &DeviceTensor<T>,
    filters: &DeviceTensor<T>,
    stride: usize,
) -> Result<DeviceTensor<T>> {
    Conv1d::new(stride)?.forward(input, filters)
}

/// Filter-bank gradient with an explicit stride.
pub fn conv1d_grad_weights<T: Float>(
    input: &DeviceTensor<T>,
    df_output: &DeviceTensor<T>,
    filter_width: usize,
    n_filters: usize,
    stride: usize,
) -> Result<DeviceTensor<T>> {
    Conv1d::new(stride)?.grad_weights(input, df_output, filter_width, n_filters)
}

fn matrix(op: &'static str, name: &str, shape: &[usize]) -> Result<[usize; 2]> {
    match *shape {
        [rows, cols] => Ok([rows, cols]),
        _ => Err(SeqConvError::shape(
            op,
            format!("{name} must be a matrix, got shape {shape:?}"),
        )),
    }
}

fn check_activations(op: &'static str, shape: &[usize], g: &ConvGeometry) -> Result<()> {
    let expected = g.output_shape();
    if shape == expected.as_slice() {
        return Ok(());
    }
    if shape.first() != Some(&g.n_filters) {
        return Err(SeqConvError::shape(
            op,
            format!(
                "n_filters is {} but df_output has leading dimension {:?}",
                g.n_filters,
                shape.first()
            ),
        ));
    }
    Err(SeqConvError::shape(
        op,
        format!("df_output has shape {shape:?}, expected {expected:?}"),
    ))
}

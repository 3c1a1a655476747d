//! Kernel Dispatch Layer
//!
//! Selects the backend for each kernel call from the device its inputs live on.
//! A `wgpu` device tries its GPU pipeline first and falls back to the CPU kernel
//! when the GPU path does not apply (an `f64` tensor, or the output is empty).
//! The result is always allocated on the inputs' device.
//!
//! Geometry and device agreement are checked by the callers in
//! [`conv`](crate::conv) and [`pooling`](crate::pooling).

use super::{ConvGeometry, PoolGeometry};
use crate::backend::Backend;
use crate::device::DeviceTensor;
use crate::error::Result;
use crate::pooling::PoolMode;
use crate::tensors::Float;

/// Whether the call should try the GPU pipeline first.
fn wants_gpu<T: Float>(t: &DeviceTensor<T>) -> bool {
    t.device().backend() == Backend::Wgpu
}

fn cpu_fallback(op: &str) {
    log::trace!("{op}: running on the CPU kernel");
}

/// Dispatches the forward convolution.
pub fn conv1d<T: Float>(
    input: &DeviceTensor<T>,
    filters: &DeviceTensor<T>,
    g: &ConvGeometry,
) -> Result<DeviceTensor<T>> {
    if wants_gpu(input) {
        #[cfg(feature = "wgpu")]
        {
            if let Some(out) = super::wgpu::conv1d(input, filters, g)? {
                return Ok(out);
            }
        }
        cpu_fallback("conv1d");
    }

    let out = super::cpu::conv1d(&input.host_view()?, &filters.host_view()?, g);
    input.device().alloc_from_vec(g.output_shape(), out)
}

/// Dispatches the filter-bank gradient.
pub fn conv1d_grad_weights<T: Float>(
    input: &DeviceTensor<T>,
    df_output: &DeviceTensor<T>,
    g: &ConvGeometry,
) -> Result<DeviceTensor<T>> {
    if wants_gpu(input) {
        #[cfg(feature = "wgpu")]
        {
            if let Some(out) = super::wgpu::conv1d_grad_weights(input, df_output, g)? {
                return Ok(out);
            }
        }
        cpu_fallback("conv1d_grad_weights");
    }

    let out = super::cpu::conv1d_grad_weights(&input.host_view()?, &df_output.host_view()?, g);
    input
        .device()
        .alloc_from_vec(vec![g.n_filters, g.filter_width], out)
}

/// Dispatches the input gradient.
pub fn conv1d_grad_input<T: Float>(
    filters: &DeviceTensor<T>,
    df_output: &DeviceTensor<T>,
    g: &ConvGeometry,
) -> Result<DeviceTensor<T>> {
    if wants_gpu(filters) {
        #[cfg(feature = "wgpu")]
        {
            if let Some(out) = super::wgpu::conv1d_grad_input(filters, df_output, g)? {
                return Ok(out);
            }
        }
        cpu_fallback("conv1d_grad_input");
    }

    let out = super::cpu::conv1d_grad_input(&filters.host_view()?, &df_output.host_view()?, g);
    filters.device().alloc_from_vec(vec![g.n_rows, g.width], out)
}

/// Dispatches pooling over the last axis; `shape` is the pooled output shape.
pub fn pool_forward<T: Float>(
    input: &DeviceTensor<T>,
    g: &PoolGeometry,
    mode: PoolMode,
    shape: Vec<usize>,
) -> Result<DeviceTensor<T>> {
    if wants_gpu(input) {
        #[cfg(feature = "wgpu")]
        {
            if let Some(out) = super::wgpu::pool_forward(input, g, mode, shape.clone())? {
                return Ok(out);
            }
        }
        cpu_fallback("pool_forward");
    }

    let out = super::cpu::pool_forward(&input.host_view()?, g, mode);
    input.device().alloc_from_vec(shape, out)
}

/// Dispatches the pooling gradient.
pub fn pool_backward<T: Float>(
    input: &DeviceTensor<T>,
    pooled: &DeviceTensor<T>,
    df_output: &DeviceTensor<T>,
    g: &PoolGeometry,
    mode: PoolMode,
) -> Result<DeviceTensor<T>> {
    if wants_gpu(input) {
        #[cfg(feature = "wgpu")]
        {
            if let Some(out) = super::wgpu::pool_backward(input, pooled, df_output, g, mode)? {
                return Ok(out);
            }
        }
        cpu_fallback("pool_backward");
    }

    let out = super::cpu::pool_backward(
        &input.host_view()?,
        &pooled.host_view()?,
        &df_output.host_view()?,
        g,
        mode,
    );
    input.device().alloc_from_vec(input.shape().to_vec(), out)
}

/// Dispatches an elementwise product of two same-shaped tensors.
pub fn multiply<T: Float>(a: &DeviceTensor<T>, b: &DeviceTensor<T>) -> Result<DeviceTensor<T>> {
    if wants_gpu(a) {
        #[cfg(feature = "wgpu")]
        {
            if let Some(out) = super::wgpu::multiply(a, b)? {
                return Ok(out);
            }
        }
        cpu_fallback("multiply");
    }

    let out = super::cpu::multiply(&a.host_view()?, &b.host_view()?);
    a.device().alloc_from_vec(a.shape().to_vec(), out)
}

/// Dispatches scaling by a constant.
pub fn scale<T: Float>(a: &DeviceTensor<T>, factor: f64) -> Result<DeviceTensor<T>> {
    if wants_gpu(a) {
        #[cfg(feature = "wgpu")]
        {
            #[allow(clippy::cast_possible_truncation)]
            let single = factor as f32;
            if let Some(out) = super::wgpu::scale(a, single)? {
                return Ok(out);
            }
        }
        cpu_fallback("scale");
    }

    let out = super::cpu::scale(&a.host_view()?, T::from_f64(factor));
    a.device().alloc_from_vec(a.shape().to_vec(), out)
}

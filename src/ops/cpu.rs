//! Parallel CPU kernels.
//!
//! Slice-level implementations of every kernel, parallelised over output rows
//! with [`rayon`](https://docs.rs/rayon). These are the reference path: the GPU
//! kernels compute the same sums in the same order, and `f64` tensors always run
//! here.
//!
//! Callers pass geometry that has already been validated; the kernels index
//! without further checks.

use super::{ConvGeometry, PoolGeometry};
use crate::pooling::PoolMode;
use crate::tensors::Float;
use rayon::prelude::*;

/// Strided 1-D convolution as a windowed product against the filter bank.
///
/// `input` is `(n_rows, width)`, `filters` is `(n_filters, filter_width)`; the
/// result is `(n_filters, n_rows, out_width)`. Out-of-range taps read the implicit
/// zero padding and are skipped.
pub fn conv1d<T: Float>(input: &[T], filters: &[T], g: &ConvGeometry) -> Vec<T> {
    let out_width = g.out_width();
    let pad = g.pad();
    let mut out = vec![T::ZERO; g.n_filters * g.n_rows * out_width];

    out.par_chunks_mut(out_width)
        .enumerate()
        .for_each(|(fr, row_out)| {
            let (f, r) = (fr / g.n_rows, fr % g.n_rows);
            let filter = &filters[f * g.filter_width..(f + 1) * g.filter_width];
            let row = &input[r * g.width..(r + 1) * g.width];

            for (o, y) in row_out.iter_mut().enumerate() {
                let start = o * g.stride;
                let mut acc = T::ZERO;
                for (k, &w) in filter.iter().enumerate() {
                    let p = start + k;
                    if p >= pad && p - pad < g.width {
                        acc += w * row[p - pad];
                    }
                }
                *y = acc;
            }
        });

    out
}

/// Gradient of the filter bank: `(n_filters, filter_width)`.
///
/// Entry `(n, k)` sums `padded_input[r, o * stride + k] * df_output[n, r, o]` over
/// every row and output column.
pub fn conv1d_grad_weights<T: Float>(input: &[T], df_output: &[T], g: &ConvGeometry) -> Vec<T> {
    let out_width = g.out_width();
    let pad = g.pad();
    let mut out = vec![T::ZERO; g.n_filters * g.filter_width];

    out.par_chunks_mut(g.filter_width)
        .enumerate()
        .for_each(|(f, grad)| {
            for (k, acc) in grad.iter_mut().enumerate() {
                for r in 0..g.n_rows {
                    let row = &input[r * g.width..(r + 1) * g.width];
                    let df = &df_output[(f * g.n_rows + r) * out_width..][..out_width];
                    for (o, &d) in df.iter().enumerate() {
                        let p = o * g.stride + k;
                        if p >= pad && p - pad < g.width {
                            *acc += row[p - pad] * d;
                        }
                    }
                }
            }
        });

    out
}

/// Gradient of the convolution input: `(n_rows, width)`.
pub fn conv1d_grad_input<T: Float>(filters: &[T], df_output: &[T], g: &ConvGeometry) -> Vec<T> {
    let out_width = g.out_width();
    let pad = g.pad();
    let mut out = vec![T::ZERO; g.n_rows * g.width];

    out.par_chunks_mut(g.width)
        .enumerate()
        .for_each(|(r, row_grad)| {
            for (j, acc) in row_grad.iter_mut().enumerate() {
                let p = j + pad;
                for f in 0..g.n_filters {
                    let df = &df_output[(f * g.n_rows + r) * out_width..][..out_width];
                    for k in 0..g.filter_width.min(p + 1) {
                        let q = p - k;
                        if q % g.stride == 0 && q / g.stride < out_width {
                            *acc += filters[f * g.filter_width + k] * df[q / g.stride];
                        }
                    }
                }
            }
        });

    out
}

/// Non-overlapping pooling over the last axis.
pub fn pool_forward<T: Float>(input: &[T], g: &PoolGeometry, mode: PoolMode) -> Vec<T> {
    let out_width = g.out_width();
    let mut out = vec![T::ZERO; g.rows * out_width];
    if out_width == 0 {
        return out;
    }
    let divisor = T::from_f64(g.pool as f64);

    out.par_chunks_mut(out_width)
        .zip(input.par_chunks(g.width))
        .for_each(|(pooled, row)| {
            for (y, window) in pooled.iter_mut().zip(row.chunks_exact(g.pool)) {
                *y = match mode {
                    PoolMode::Max => window
                        .iter()
                        .copied()
                        .fold(window[0], |m, v| if v > m { v } else { m }),
                    PoolMode::Avg => {
                        let mut sum = T::ZERO;
                        for &v in window {
                            sum += v;
                        }
                        sum / divisor
                    }
                };
            }
        });

    out
}

/// Routes pooled gradients back to the input positions of each window.
///
/// Max pooling hands the full gradient to every position equal to the window
/// maximum; average pooling splits it evenly. Dropped trailing columns get zero.
pub fn pool_backward<T: Float>(
    input: &[T],
    pooled: &[T],
    df_output: &[T],
    g: &PoolGeometry,
    mode: PoolMode,
) -> Vec<T> {
    let out_width = g.out_width();
    let mut out = vec![T::ZERO; g.rows * g.width];
    if out_width == 0 {
        return out;
    }
    let divisor = T::from_f64(g.pool as f64);

    out.par_chunks_mut(g.width)
        .enumerate()
        .for_each(|(r, grad)| {
            let row = &input[r * g.width..(r + 1) * g.width];
            let maxima = &pooled[r * out_width..(r + 1) * out_width];
            let df = &df_output[r * out_width..(r + 1) * out_width];
            for (j, dx) in grad.iter_mut().take(out_width * g.pool).enumerate() {
                let w = j / g.pool;
                *dx = match mode {
                    PoolMode::Max if row[j] == maxima[w] => df[w],
                    PoolMode::Max => T::ZERO,
                    PoolMode::Avg => df[w] / divisor,
                };
            }
        });

    out
}

/// Elementwise product.
pub fn multiply<T: Float>(a: &[T], b: &[T]) -> Vec<T> {
    a.par_iter().zip(b.par_iter()).map(|(&x, &y)| x * y).collect()
}

/// Multiplies every element by `factor`.
pub fn scale<T: Float>(a: &[T], factor: T) -> Vec<T> {
    a.par_iter().map(|&x| x * factor).collect()
}

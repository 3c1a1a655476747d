#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::Rng;
use seqconv::device::Device;
use seqconv::memory::MemoryPool;
use seqconv::tensors::{Float, Tensor};
use std::sync::Arc;

pub fn cpu() -> (Arc<MemoryPool>, Device) {
    let pool = Arc::new(MemoryPool::new());
    let device = Device::cpu(pool.clone());
    (pool, device)
}

/// Values in `[0.01, 1)`.
pub fn random<T: Float>(rng: &mut StdRng, shape: &[usize]) -> Tensor<T> {
    let len = shape.iter().product();
    let data = (0..len)
        .map(|_| T::from_f64(rng.random_range(0.01..1.0)))
        .collect();
    Tensor::new(shape.to_vec(), data)
}

/// Rows of `x` with `pad` zeros on both sides.
pub fn padded<T: Float>(x: &Tensor<T>, pad: usize) -> (Vec<T>, usize) {
    let (rows, width) = (x.shape[0], x.shape[1]);
    let padded_width = width + 2 * pad;
    let mut out = vec![T::ZERO; rows * padded_width];
    for r in 0..rows {
        out[r * padded_width + pad..][..width].copy_from_slice(&x.data[r * width..][..width]);
    }
    (out, padded_width)
}

/// Direct double loop over filters and padded windows, then every `stride`-th column.
pub fn reference_conv<T: Float>(x: &Tensor<T>, w: &Tensor<T>, stride: usize) -> Tensor<T> {
    let (rows, width) = (x.shape[0], x.shape[1]);
    let (n_filters, fw) = (w.shape[0], w.shape[1]);
    let (xp, pw) = padded(x, fw / 2);
    let out_width = width / stride;

    let mut out = Vec::with_capacity(n_filters * rows * out_width);
    for f in 0..n_filters {
        for r in 0..rows {
            for o in 0..out_width {
                let mut acc = T::ZERO;
                for k in 0..fw {
                    acc += w.data[f * fw + k] * xp[r * pw + o * stride + k];
                }
                out.push(acc);
            }
        }
    }
    Tensor::new(vec![n_filters, rows, out_width], out)
}

/// `sum(padded[:, o * stride + i] * df[n])` for every filter `n` and tap `i`.
pub fn reference_grad_weights<T: Float>(
    x: &Tensor<T>,
    df: &Tensor<T>,
    fw: usize,
    stride: usize,
) -> Tensor<T> {
    let rows = x.shape[0];
    let (n_filters, out_width) = (df.shape[0], df.shape[2]);
    let (xp, pw) = padded(x, fw / 2);

    let mut out = vec![T::ZERO; n_filters * fw];
    for n in 0..n_filters {
        for i in 0..fw {
            let mut acc = T::ZERO;
            for r in 0..rows {
                for o in 0..out_width {
                    acc += xp[r * pw + o * stride + i] * df.data[(n * rows + r) * out_width + o];
                }
            }
            out[n * fw + i] = acc;
        }
    }
    Tensor::new(vec![n_filters, fw], out)
}

/// Scatters every output gradient back over its padded window, then strips the padding.
pub fn reference_grad_input<T: Float>(
    w: &Tensor<T>,
    df: &Tensor<T>,
    width: usize,
    stride: usize,
) -> Tensor<T> {
    let (n_filters, fw) = (w.shape[0], w.shape[1]);
    let (rows, out_width) = (df.shape[1], df.shape[2]);
    let pad = fw / 2;
    let pw = width + 2 * pad;

    let mut grad = vec![T::ZERO; rows * pw];
    for f in 0..n_filters {
        for r in 0..rows {
            for o in 0..out_width {
                let d = df.data[(f * rows + r) * out_width + o];
                for k in 0..fw {
                    grad[r * pw + o * stride + k] += w.data[f * fw + k] * d;
                }
            }
        }
    }
    let data = (0..rows)
        .flat_map(|r| grad[r * pw + pad..][..width].to_vec())
        .collect();
    Tensor::new(vec![rows, width], data)
}

//! Approximate comparison of kernel outputs.
//!
//! Kernels are checked against direct reference loops with a relative tolerance
//! that depends on the element precision and on whether the output is a forward
//! activation or a gradient. The error of a tensor is the largest elementwise
//! relative error; positions where the reference is exactly zero are compared by
//! absolute difference instead.

use crate::tensors::{Float, Precision};

/// Forward tolerance on `f32`.
pub const F32_FORWARD_ERROR: f64 = 1e-4;

/// Forward tolerance on `f64`.
pub const F64_FORWARD_ERROR: f64 = 1e-13;

/// Gradient tolerance on `f32`.
pub const F32_GRADIENT_ERROR: f64 = 1e-5;

/// Gradient tolerance on `f64`.
pub const F64_GRADIENT_ERROR: f64 = 1e-12;

/// The kind of output being compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// Forward activations.
    Forward,
    /// Weight or input gradients.
    Gradient,
}

/// The accepted relative error for element type `T`.
pub fn tolerance<T: Float>(check: Check) -> f64 {
    match (T::PRECISION, check) {
        (Precision::Single, Check::Forward) => F32_FORWARD_ERROR,
        (Precision::Double, Check::Forward) => F64_FORWARD_ERROR,
        (Precision::Single, Check::Gradient) => F32_GRADIENT_ERROR,
        (Precision::Double, Check::Gradient) => F64_GRADIENT_ERROR,
    }
}

/// Largest elementwise relative error `|a - e| / |e|`.
///
/// Falls back to `|a - e|` where `e == 0`. Returns `f64::INFINITY` when the
/// slices differ in length.
pub fn max_relative_error<T: Float>(actual: &[T], expected: &[T]) -> f64 {
    if actual.len() != expected.len() {
        return f64::INFINITY;
    }
    actual
        .iter()
        .zip(expected)
        .map(|(&a, &e)| {
            let diff = (a - e).abs().into_f64();
            let e = e.into_f64().abs();
            if e == 0.0 { diff } else { diff / e }
        })
        .fold(0.0, f64::max)
}

/// Whether `actual` matches `expected` within the tolerance for `check`.
pub fn approx_eq<T: Float>(actual: &[T], expected: &[T], check: Check) -> bool {
    max_relative_error(actual, expected) < tolerance::<T>(check)
}

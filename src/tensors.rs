//! Host tensors and the floating-point element trait.
//!
//! # Core Tensor Utilities
//!
//! A [`Tensor<T>`] is a shape plus flat row-major data living in host memory. It is
//! the staging representation on both sides of a device transfer: sequences are
//! encoded into host tensors, uploaded with
//! [`Tensor::to_device`](crate::tensors::Tensor::to_device), and results are read
//! back with [`DeviceTensor::to_host`](crate::device::DeviceTensor::to_host).
//!
//! ## Design Highlights
//! - Kernels are generic over [`Float`], implemented for `f32` and `f64`
//! - Shape is stored as a `Vec<usize>` and enforced at construction
//! - The `tensor!` macro supports ergonomic tensor creation from nested arrays
//!
//! ## Limitations
//! - Row-major only
//! - No broadcasting; slicing only along the leading axis
//!
//! ## Example
//!
//! ```rust
//! use seqconv::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape, vec![2, 3]);
//! ```

use crate::error::{Result, SeqConvError};
use core::fmt::Debug;
use core::ops::{Add, AddAssign, Div, Mul, Sub};

/// Floating-point precision of an element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// `f32`
    Single,
    /// `f64`
    Double,
}

/// Element types the kernels accumulate in.
///
/// Accumulation always happens in `Self`; the `f64` conversions are only used for
/// constants (pool divisors, dropout scaling) and penalties.
pub trait Float:
    Copy
    + Send
    + Sync
    + Debug
    + Default
    + PartialEq
    + PartialOrd
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + AddAssign
{
    /// Additive identity.
    const ZERO: Self;
    /// Multiplicative identity.
    const ONE: Self;
    /// Precision tag, used to pick tolerances and GPU eligibility.
    const PRECISION: Precision;

    /// Convert from `f64`.
    fn from_f64(x: f64) -> Self;
    /// Convert to `f64`.
    fn into_f64(self) -> f64;
    /// Absolute value.
    fn abs(self) -> Self;

    /// Views the slice as `f32` when `Self` is `f32`.
    fn as_f32_slice(data: &[Self]) -> Option<&[f32]>;
    /// Reinterprets an `f32` vector as `Self` when `Self` is `f32`.
    fn from_f32_vec(data: Vec<f32>) -> Option<Vec<Self>>;
}

impl Float for f32 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const PRECISION: Precision = Precision::Single;

    #[allow(clippy::cast_possible_truncation)]
    fn from_f64(x: f64) -> Self {
        x as Self
    }

    fn into_f64(self) -> f64 {
        f64::from(self)
    }

    fn abs(self) -> Self {
        Self::abs(self)
    }

    fn as_f32_slice(data: &[Self]) -> Option<&[f32]> {
        Some(data)
    }

    fn from_f32_vec(data: Vec<f32>) -> Option<Vec<Self>> {
        Some(data)
    }
}

impl Float for f64 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const PRECISION: Precision = Precision::Double;

    fn from_f64(x: f64) -> Self {
        x
    }

    fn into_f64(self) -> f64 {
        self
    }

    fn abs(self) -> Self {
        Self::abs(self)
    }

    fn as_f32_slice(_: &[Self]) -> Option<&[f32]> {
        None
    }

    fn from_f32_vec(_: Vec<f32>) -> Option<Vec<Self>> {
        None
    }
}

/// Represents an N-dimensional tensor with a shape and flat row-major data.
///
/// - `shape` defines the structure, e.g., `[2, 3]` for a 2×3 matrix.
/// - `data` holds the flattened content in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    pub shape: Vec<usize>,
    pub data: Vec<T>,
}

impl<T> Tensor<T> {
    /// Creates a new tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self { shape, data }
    }

    /// Fallible variant of [`Tensor::new`].
    pub fn try_new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Result<Self> {
        let shape = shape.into();
        let expected = shape.iter().product::<usize>();
        if expected != data.len() {
            return Err(SeqConvError::shape(
                "tensor",
                format!(
                    "shape {shape:?} is incompatible with {} data elements",
                    data.len()
                ),
            ));
        }
        Ok(Self { shape, data })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of the leading axis (0 for a scalar).
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Consumes the tensor, returning its flat data.
    pub fn into_data(self) -> Vec<T> {
        self.data
    }
}

impl<T: Clone> Tensor<T> {
    /// Copies rows `start..end` of the leading axis into a new tensor.
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
        Ok(Self {
            shape,
            data: self.data[start * row_len..end * row_len].to_vec(),
        })
    }
}

impl<T: Float> Tensor<T> {
    /// Creates a zero-filled tensor.
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![T::ZERO; len],
        }
    }
}

/// Returns `(elements per leading row, leading rows)` for a shape of rank ≥ 1.
pub(crate) fn leading_split(shape: &[usize]) -> Result<(usize, usize)> {
    match shape.split_first() {
        Some((&rows, rest)) => Ok((rest.iter().product(), rows)),
        None => Err(SeqConvError::shape(
            "slice_rows",
            "scalar tensors have no leading axis",
        )),
    }
}

/// Defines a tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use seqconv::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape, vec![2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::new(Vec::<usize>::new(), vec![$lit])
    };

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::tensor!($inner) ),+ ];
        let first_shape = &children[0].shape;
        assert!(children.iter().all(|c| c.shape == *first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].data.len());
        for c in children { data.extend(c.data); }
        $crate::tensors::Tensor::new(shape, data)
    }};
}

//! Max and average pooling with dropout.
//!
//! Pooling acts on the last axis of a tensor of any rank: `[..., width]` becomes
//! `[..., width / pool_size]` with non-overlapping windows (stride 1 in units of
//! windows). Trailing columns that do not fill a window are dropped and receive a
//! zero gradient.
//!
//! A forward call returns a [`PoolingCache`]: the pooled output, the
//! [`PoolingDescriptor`] it was computed with and, in training with dropout, the
//! [`DropoutMask`] that was applied. The cache is handed back by value to the
//! matching backward call, which rejects it if it does not belong to the input
//! being differentiated.
//!
//! Dropout uses a keep probability of 0.5. At prediction time the pooled output is
//! halved instead of masked.

use crate::device::DeviceTensor;
use crate::error::{Result, SeqConvError};
use crate::layers::Layer;
use crate::ops::{dispatch, PoolGeometry};
use crate::tensors::{Float, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const KEEP_PROBABILITY: f64 = 0.5;

/// How a window is reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolMode {
    /// Window maximum.
    Max,
    /// Window mean.
    Avg,
}

/// Window size of a pooling layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolSize {
    /// One window spanning the whole input extent.
    Global,
    /// A fixed window size; `0` and `1` mean no pooling.
    Size(usize),
}

impl PoolSize {
    /// Resolves to a concrete window size for an input extent of `n_in`.
    pub fn resolve(self, n_in: usize) -> usize {
        match self {
            Self::Global => n_in,
            Self::Size(n) => n,
        }
    }
}

impl From<usize> for PoolSize {
    fn from(n: usize) -> Self {
        Self::Size(n)
    }
}

/// The configuration a pooled output was computed with.
///
/// Created by [`pool_forward`] and consumed by the paired [`pool_backward`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolingDescriptor {
    stride: usize,
    pool_size: usize,
    mode: PoolMode,
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
}

impl PoolingDescriptor {
    /// Window stride, in windows. Always 1.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn mode(&self) -> PoolMode {
        self.mode
    }

    /// Shape of the tensor that was pooled.
    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    /// Shape of the pooled output.
    pub fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    fn is_identity(&self) -> bool {
        self.pool_size <= 1
    }
}

/// A 0/1 keep mask over a pooled output.
#[derive(Debug, Clone)]
pub struct DropoutMask<T> {
    mask: DeviceTensor<T>,
}

impl<T: Float> DropoutMask<T> {
    /// Samples a Bernoulli(0.5) keep mask shaped like `like`, on `like`'s device.
    pub fn sample<R: Rng + ?Sized>(like: &DeviceTensor<T>, rng: &mut R) -> Result<Self> {
        let data = (0..like.len())
            .map(|_| {
                if rng.random_bool(KEEP_PROBABILITY) {
                    T::ONE
                } else {
                    T::ZERO
                }
            })
            .collect();
        let mask = Tensor::try_new(like.shape().to_vec(), data)?.into_device(like.device())?;
        Ok(Self { mask })
    }

    /// Wraps an existing 0/1 tensor.
    pub fn from_tensor(mask: DeviceTensor<T>) -> Self {
        Self { mask }
    }

    /// The mask values.
    pub fn tensor(&self) -> &DeviceTensor<T> {
        &self.mask
    }

    /// Multiplies `x` by the mask into a new buffer.
    pub fn apply(&self, x: &DeviceTensor<T>) -> Result<DeviceTensor<T>> {
        if x.shape() != self.mask.shape() {
            return Err(SeqConvError::invalid_state(format!(
                "dropout mask of shape {:?} cannot be applied to {:?}",
                self.mask.shape(),
                x.shape()
            )));
        }
        x.device().ensure_same("dropout", self.mask.device())?;
        dispatch::multiply(x, &self.mask)
    }
}

/// Everything a pooling backward pass needs from its forward pass.
///
/// Not `Clone`: [`pool_backward`] takes the cache by value, so each forward pass
/// feeds at most one backward pass.
#[derive(Debug)]
pub struct PoolingCache<T> {
    /// The pooled output (after dropout).
    pub pooled: DeviceTensor<T>,
    pub descriptor: PoolingDescriptor,
    /// Present only for training-mode forward passes with dropout.
    pub dropout_mask: Option<DropoutMask<T>>,
    /// Window values before dropout; max gradients are routed against these.
    window_values: DeviceTensor<T>,
}

/// Pools the last axis of `input` with windows of `pool_size`.
///
/// With `dropout`, prediction halves the output and training samples a fresh keep
/// mask from `rng`, applies it, and returns it in the cache.
///
/// # Errors
/// Returns a shape error when `pool_size` exceeds the pooled extent.
pub fn pool_forward<T: Float, R: Rng + ?Sized>(
    input: &DeviceTensor<T>,
    pool_size: usize,
    mode: PoolMode,
    dropout: bool,
    prediction: bool,
    rng: &mut R,
) -> Result<PoolingCache<T>> {
    let (pooled, output_shape) = if pool_size <= 1 {
        // identity: the output shares the input's buffer
        (input.clone(), input.shape().to_vec())
    } else {
        let g = PoolGeometry::new(input.shape(), pool_size)?;
        let mut shape = input.shape().to_vec();
        if let Some(last) = shape.last_mut() {
            *last = g.out_width();
        }
        let pooled = dispatch::pool_forward(input, &g, mode, shape.clone())?;
        (pooled, shape)
    };

    let descriptor = PoolingDescriptor {
        stride: 1,
        pool_size,
        mode,
        input_shape: input.shape().to_vec(),
        output_shape,
    };

    if !dropout {
        return Ok(PoolingCache {
            pooled: pooled.clone(),
            descriptor,
            dropout_mask: None,
            window_values: pooled,
        });
    }
    if prediction {
        return Ok(PoolingCache {
            pooled: dispatch::scale(&pooled, KEEP_PROBABILITY)?,
            descriptor,
            dropout_mask: None,
            window_values: pooled,
        });
    }

    let mask = DropoutMask::sample(&pooled, rng)?;
    log::trace!("pool_forward: sampled dropout mask over {:?}", pooled.shape());
    Ok(PoolingCache {
        pooled: mask.apply(&pooled)?,
        descriptor,
        dropout_mask: Some(mask),
        window_values: pooled,
    })
}

/// Routes `df_output` back through the pooling that produced `cache`.
///
/// A dropout mask in the cache is applied to `df_output` first, into a new
/// buffer. Max pooling hands the full gradient to every position equal to its
/// window maximum; average pooling divides it evenly across the window.
///
/// # Errors
/// Returns [`SeqConvError::InvalidState`] when the cache does not match `input`
/// or `df_output`.
pub fn pool_backward<T: Float>(
    input: &DeviceTensor<T>,
    df_output: &DeviceTensor<T>,
    cache: PoolingCache<T>,
) -> Result<DeviceTensor<T>> {
    let PoolingCache {
        pooled,
        descriptor,
        dropout_mask,
        window_values,
    } = cache;

    if input.shape() != descriptor.input_shape() {
        return Err(SeqConvError::invalid_state(format!(
            "pooling descriptor was created for input {:?}, got {:?}",
            descriptor.input_shape(),
            input.shape()
        )));
    }
    if pooled.shape() != descriptor.output_shape() {
        return Err(SeqConvError::invalid_state(format!(
            "cached activations {:?} do not match descriptor output {:?}",
            pooled.shape(),
            descriptor.output_shape()
        )));
    }
    if df_output.shape() != descriptor.output_shape() {
        return Err(SeqConvError::invalid_state(format!(
            "df_output {:?} does not match descriptor output {:?}",
            df_output.shape(),
            descriptor.output_shape()
        )));
    }
    input.device().ensure_same("pool_backward", df_output.device())?;

    let df_output = match &dropout_mask {
        Some(mask) => mask.apply(df_output)?,
        None => df_output.clone(),
    };

    if descriptor.is_identity() {
        return Ok(df_output);
    }
    let g = PoolGeometry::new(input.shape(), descriptor.pool_size())?;
    dispatch::pool_backward(input, &window_values, &df_output, &g, descriptor.mode())
}

/// A parameter-free pooling layer.
///
/// Reports zero parameters and zero penalties regardless of configuration.
#[derive(Debug, Clone)]
pub struct PoolingLayer {
    n_in: usize,
    pool_size: usize,
    mode: PoolMode,
    n_filters: usize,
    dropout: bool,
    rng: StdRng,
}

impl PoolingLayer {
    /// Creates a pooling layer over inputs whose last axis has extent `n_in`.
    ///
    /// [`PoolSize::Global`] resolves to `n_in` here.
    pub fn new(
        n_in: usize,
        pool_size: PoolSize,
        mode: PoolMode,
        n_filters: usize,
        dropout: bool,
        seed: u64,
    ) -> Result<Self> {
        let pool_size = pool_size.resolve(n_in);
        if pool_size > n_in {
            return Err(SeqConvError::shape(
                "pooling_layer",
                format!("pool size {pool_size} exceeds input extent {n_in}"),
            ));
        }
        Ok(Self {
            n_in,
            pool_size,
            mode,
            n_filters,
            dropout,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// A max-pooling layer.
    pub fn max(
        n_in: usize,
        pool_size: PoolSize,
        n_filters: usize,
        dropout: bool,
        seed: u64,
    ) -> Result<Self> {
        Self::new(n_in, pool_size, PoolMode::Max, n_filters, dropout, seed)
    }

    /// An average-pooling layer.
    pub fn avg(
        n_in: usize,
        pool_size: PoolSize,
        n_filters: usize,
        dropout: bool,
        seed: u64,
    ) -> Result<Self> {
        Self::new(n_in, pool_size, PoolMode::Avg, n_filters, dropout, seed)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn mode(&self) -> PoolMode {
        self.mode
    }

    pub fn dropout(&self) -> bool {
        self.dropout
    }

    /// Output units per filter: `n_in / pool_size`.
    pub fn n_units_per_filter(&self) -> usize {
        self.n_in / self.pool_size.max(1)
    }

    /// Output units across all filters.
    pub fn n_units(&self) -> usize {
        self.n_units_per_filter() * self.n_filters
    }

    fn check_input<T: Float>(&self, input: &DeviceTensor<T>) -> Result<()> {
        match input.shape().last() {
            Some(&width) if width == self.n_in => Ok(()),
            _ => Err(SeqConvError::shape(
                "pooling_layer",
                format!(
                    "layer pools an extent of {} but the input has shape {:?}",
                    self.n_in,
                    input.shape()
                ),
            )),
        }
    }
}

impl<T: Float> Layer<T> for PoolingLayer {
    type Cache = PoolingCache<T>;

    fn n_parameters(&self) -> usize {
        0
    }

    fn l1_penalty(&self) -> Result<f64> {
        Ok(0.0)
    }

    fn l2_penalty(&self) -> Result<f64> {
        Ok(0.0)
    }

    fn forward(
        &mut self,
        input: &DeviceTensor<T>,
        prediction: bool,
    ) -> Result<(DeviceTensor<T>, Self::Cache)> {
        self.check_input(input)?;
        let cache = pool_forward(
            input,
            self.pool_size,
            self.mode,
            self.dropout,
            prediction,
            &mut self.rng,
        )?;
        Ok((cache.pooled.clone(), cache))
    }

    fn backward(
        &self,
        input: &DeviceTensor<T>,
        df_output: &DeviceTensor<T>,
        cache: Self::Cache,
    ) -> Result<(Vec<DeviceTensor<T>>, DeviceTensor<T>)> {
        self.check_input(input)?;
        if cache.descriptor.pool_size() != self.pool_size || cache.descriptor.mode() != self.mode {
            return Err(SeqConvError::invalid_state(
                "pooling cache was produced by a layer with a different configuration",
            ));
        }
        if cache.dropout_mask.is_some() && !self.dropout {
            return Err(SeqConvError::invalid_state(
                "pooling cache carries a dropout mask but the layer has no dropout",
            ));
        }
        let df_input = pool_backward(input, df_output, cache)?;
        Ok((Vec::new(), df_input))
    }
}

//! The layer contract shared with the surrounding network.
//!
//! A layer's forward pass returns its output together with an opaque cache; the
//! backward pass takes the same input, the gradient of the output, and that cache
//! by value, and returns the parameter gradients plus the gradient of the input.
//! The training loop and optimizer live outside this crate.

use crate::conv::Conv1d;
use crate::device::{Device, DeviceTensor};
use crate::error::{Result, SeqConvError};
use crate::tensors::{Float, Tensor};
use rand::Rng;

/// Forward/backward contract of a network layer.
pub trait Layer<T: Float> {
    /// State carried from a forward call to its backward call.
    type Cache;

    /// Number of trainable scalars.
    fn n_parameters(&self) -> usize;

    /// L1 weight penalty contributed to the objective.
    fn l1_penalty(&self) -> Result<f64>;

    /// L2 weight penalty contributed to the objective.
    fn l2_penalty(&self) -> Result<f64>;

    /// Runs the layer. `prediction` disables training-only behaviour such as
    /// sampling dropout masks.
    fn forward(
        &mut self,
        input: &DeviceTensor<T>,
        prediction: bool,
    ) -> Result<(DeviceTensor<T>, Self::Cache)>;

    /// Returns `(parameter gradients, input gradient)`.
    fn backward(
        &self,
        input: &DeviceTensor<T>,
        df_output: &DeviceTensor<T>,
        cache: Self::Cache,
    ) -> Result<(Vec<DeviceTensor<T>>, DeviceTensor<T>)>;
}

/// A 1-D convolution layer owning its filter bank.
#[derive(Debug, Clone)]
pub struct ConvLayer<T> {
    filters: DeviceTensor<T>,
    conv: Conv1d,
    l1_weight: f64,
    l2_weight: f64,
}

impl<T: Float> ConvLayer<T> {
    /// Wraps an existing `(n_filters, filter_width)` filter bank.
    pub fn new(filters: DeviceTensor<T>, stride: usize) -> Result<Self> {
        if filters.shape().len() != 2 || filters.is_empty() {
            return Err(SeqConvError::shape(
                "conv_layer",
                format!(
                    "filters must be a non-empty (n_filters, filter_width) matrix, got {:?}",
                    filters.shape()
                ),
            ));
        }
        Ok(Self {
            filters,
            conv: Conv1d::new(stride)?,
            l1_weight: 0.0,
            l2_weight: 0.0,
        })
    }

    /// A layer with filters drawn uniformly from `[-scale, scale)`.
    pub fn with_random_filters<R: Rng + ?Sized>(
        device: &Device,
        n_filters: usize,
        filter_width: usize,
        stride: usize,
        scale: f64,
        rng: &mut R,
    ) -> Result<Self> {
        if !(scale > 0.0) {
            return Err(SeqConvError::invalid_argument("scale", "must be positive"));
        }
        let data = (0..n_filters * filter_width)
            .map(|_| T::from_f64(rng.random_range(-scale..scale)))
            .collect();
        let filters = Tensor::try_new(vec![n_filters, filter_width], data)?.into_device(device)?;
        Self::new(filters, stride)
    }

    /// Sets the L1 and L2 penalty weights.
    pub fn with_penalties(mut self, l1_weight: f64, l2_weight: f64) -> Self {
        self.l1_weight = l1_weight;
        self.l2_weight = l2_weight;
        self
    }

    pub fn filters(&self) -> &DeviceTensor<T> {
        &self.filters
    }

    /// Replaces the filter bank, e.g. after an optimizer step.
    pub fn set_filters(&mut self, filters: DeviceTensor<T>) -> Result<()> {
        if filters.shape() != self.filters.shape() {
            return Err(SeqConvError::shape(
                "conv_layer",
                format!(
                    "new filters {:?} do not match {:?}",
                    filters.shape(),
                    self.filters.shape()
                ),
            ));
        }
        self.filters = filters;
        Ok(())
    }

    pub fn n_filters(&self) -> usize {
        self.filters.shape()[0]
    }

    pub fn filter_width(&self) -> usize {
        self.filters.shape()[1]
    }

    pub fn stride(&self) -> usize {
        self.conv.stride()
    }
}

impl<T: Float> Layer<T> for ConvLayer<T> {
    type Cache = ();

    fn n_parameters(&self) -> usize {
        self.filters.len()
    }

    fn l1_penalty(&self) -> Result<f64> {
        if self.l1_weight == 0.0 {
            return Ok(0.0);
        }
        let w = self.filters.host_view()?;
        Ok(self.l1_weight * w.iter().map(|v| v.into_f64().abs()).sum::<f64>())
    }

    fn l2_penalty(&self) -> Result<f64> {
        if self.l2_weight == 0.0 {
            return Ok(0.0);
        }
        let w = self.filters.host_view()?;
        Ok(self.l2_weight * 0.5 * w.iter().map(|v| v.into_f64().powi(2)).sum::<f64>())
    }

    fn forward(
        &mut self,
        input: &DeviceTensor<T>,
        _prediction: bool,
    ) -> Result<(DeviceTensor<T>, Self::Cache)> {
        Ok((self.conv.forward(input, &self.filters)?, ()))
    }

    /// The filter gradient includes the derivatives of the L1 and L2 penalties.
    fn backward(
        &self,
        input: &DeviceTensor<T>,
        df_output: &DeviceTensor<T>,
        _cache: Self::Cache,
    ) -> Result<(Vec<DeviceTensor<T>>, DeviceTensor<T>)> {
        let width = input.shape().get(1).copied().unwrap_or(0);
        let mut grad_w = self.conv.grad_weights(
            input,
            df_output,
            self.filter_width(),
            self.n_filters(),
        )?;

        if self.l1_weight != 0.0 || self.l2_weight != 0.0 {
            let penalised: Vec<T> = {
                let w = self.filters.host_view()?;
                let g = grad_w.host_view()?;
                g.iter()
                    .zip(w.iter())
                    .map(|(&g, &w)| {
                        let w64 = w.into_f64();
                        let sign = if w64 > 0.0 {
                            1.0
                        } else if w64 < 0.0 {
                            -1.0
                        } else {
                            0.0
                        };
                        g + T::from_f64(self.l1_weight * sign + self.l2_weight * w64)
                    })
                    .collect()
            };
            grad_w = self
                .filters
                .device()
                .alloc_from_vec(grad_w.shape().to_vec(), penalised)?;
        }

        let df_input = self.conv.grad_input(&self.filters, df_output, width)?;
        Ok((vec![grad_w], df_input))
    }
}

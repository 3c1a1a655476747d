//! seqconv: device-resident 1-D convolution and pooling over encoded sequences.
//!
//! A layer-level numeric engine for convolutional networks on biological
//! sequences. Raw sequences are one-hot encoded, moved to a compute device, run
//! through strided 1-D convolution and max/average pooling, and differentiated
//! back again.
//!
//! # Features
//!
//! - One-hot sequence encoding with an explicit unknown-symbol policy.
//! - Strided, zero-padded 1-D convolution with weight and input gradients.
//! - Max and average pooling with dropout and gradient routing.
//! - Batch providers over in-memory arrays and row tables, with background
//!   prefetch.
//! - CPU kernels on `rayon`; GPU kernels on `wgpu` behind the `wgpu` feature.
//!
//! # Modules
//!
//! - [`tensors`] — Host tensors and the [`Float`](tensors::Float) element trait.
//! - [`device`] — Devices and immutable device-resident tensors.
//! - [`memory`] — The allocator contract and the shared memory pool.
//! - [`stream`] — In-order work queues and their pending results.
//! - [`encoding`] — Alphabets, one-hot encoding and decoding, trimming.
//! - [`conv`] — Forward convolution and its gradients.
//! - [`pooling`] — Pooling kernels, descriptors, dropout masks, pooling layers.
//! - [`layers`] — The layer contract and the convolution layer.
//! - [`provider`] — Batched sequence providers.
//! - [`ops`] — Backend kernels and dispatch.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use seqconv::device::Device;
//! use seqconv::encoding::SequenceEncoder;
//! use seqconv::memory::MemoryPool;
//! use seqconv::pooling::{pool_backward, pool_forward, PoolMode};
//! use seqconv::conv::conv1d;
//! use seqconv::tensors::Tensor;
//!
//! let pool = Arc::new(MemoryPool::new());
//! let device = Device::cpu(pool.clone());
//!
//! let x = SequenceEncoder::dna()
//!     .encode::<f32, _>(&["ACGTACGTAC", "TTGCANNACG"])
//!     .unwrap()
//!     .to_device(&device)
//!     .unwrap();
//! let w = Tensor::new(vec![3, 8], vec![0.1f32; 24]).to_device(&device).unwrap();
//!
//! let y = conv1d(&x, &w, 4).unwrap();
//! assert_eq!(y.shape(), &[3, 2, 10]);
//!
//! let mut rng = rand::rng();
//! let cache = pool_forward(&y, 5, PoolMode::Max, false, false, &mut rng).unwrap();
//! assert_eq!(cache.pooled.shape(), &[3, 2, 2]);
//!
//! let df = Tensor::new(vec![3, 2, 2], vec![1.0f32; 12]).to_device(&device).unwrap();
//! let dx = pool_backward(&y, &df, cache).unwrap();
//! assert_eq!(dx.shape(), y.shape());
//! ```

pub mod approx;
pub mod backend;
pub mod conv;
pub mod device;
pub mod encoding;
pub mod error;
pub mod layers;
pub mod memory;
pub mod ops;
pub mod pooling;
pub mod provider;
pub mod stream;
pub mod tensors;

pub use error::{ErrorClass, Result, SeqConvError};

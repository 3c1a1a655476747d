//! Error types for seqconv.
//!
//! Every failure in this crate is a local, deterministic check raised at the call
//! site. None of them are transient, so none are retried: an error means a shape,
//! pairing or data bug and should end the enclosing training run.

use thiserror::Error;

/// Result type alias for seqconv operations.
pub type Result<T> = core::result::Result<T, SeqConvError>;

/// Coarse classification of a [`SeqConvError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A caller-side precondition was violated (configuration, batch geometry,
    /// empty table reads).
    Precondition,
    /// A forward/backward pairing was broken.
    InvalidState,
    /// Tensor shapes or kernel geometry are inconsistent.
    Shape,
    /// The memory pool refused an allocation.
    Resource,
    /// The compute device or a stream worker failed.
    Device,
}

/// Unified error type for all seqconv operations.
#[derive(Error, Debug)]
pub enum SeqConvError {
    /// Mismatched tensor shapes or invalid kernel geometry.
    #[error("shape error in {op}: {message}")]
    Shape { op: &'static str, message: String },

    /// A scalar argument outside its valid range.
    #[error("invalid argument `{name}`: {message}")]
    InvalidArgument { name: &'static str, message: String },

    /// Precondition violations such as a batch size that is not a multiple of
    /// the table's native batch size, or a zero-row read.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// A cache handed to a backward pass does not belong to the forward pass
    /// that is being differentiated.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The memory pool cannot satisfy an allocation.
    #[error("out of device memory: requested {requested} bytes with {in_use} of {capacity} bytes in use")]
    OutOfMemory {
        requested: usize,
        in_use: usize,
        capacity: usize,
    },

    /// A device or stream failure.
    #[error("device error: {0}")]
    Device(String),

    /// A failure reported by the `wgpu` backend.
    #[cfg(feature = "wgpu")]
    #[error(transparent)]
    Gpu(#[from] crate::ops::wgpu::GpuFailure),

    /// Configuration could not be parsed (including unrecognised keys).
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl SeqConvError {
    /// Creates a shape error for the named operation.
    pub fn shape(op: &'static str, message: impl Into<String>) -> Self {
        Self::Shape {
            op,
            message: message.into(),
        }
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            message: message.into(),
        }
    }

    /// Creates a precondition error.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    /// Creates an invalid-state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Classifies the error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Shape { .. } | Self::InvalidArgument { .. } => ErrorClass::Shape,
            Self::Precondition(_) | Self::Config(_) => ErrorClass::Precondition,
            Self::InvalidState(_) => ErrorClass::InvalidState,
            Self::OutOfMemory { .. } => ErrorClass::Resource,
            Self::Device(_) => ErrorClass::Device,
            #[cfg(feature = "wgpu")]
            Self::Gpu(_) => ErrorClass::Device,
        }
    }
}

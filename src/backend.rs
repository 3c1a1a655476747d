//! Backend selection module.
//!
//! This module defines the compute backends a [`Device`](crate::device::Device)
//! can run on and a process-wide *default* backend used by
//! [`Device::default_backend`](crate::device::Device::default_backend).
//!
//! # Supported Backends
//!
//! - `Cpu` — Pure Rust kernels parallelised with `rayon` (default).
//! - `Wgpu` — WGSL compute shaders through `wgpu` (requires the `wgpu` feature).
//!
//! The default is stored in an `AtomicU8`. It only decides which device is built
//! when the caller does not name one; every kernel dispatches on the device its
//! operands live on, never on this global.

use core::convert::TryFrom;
use core::sync::atomic::{AtomicU8, Ordering};

/// Enumeration of supported computation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Backend {
    /// CPU kernels (default).
    #[default]
    Cpu = 0,
    /// GPU kernels using `wgpu`.
    Wgpu = 1,
}

impl Backend {
    /// Returns `true` when this backend was compiled into the crate.
    pub const fn is_available(self) -> bool {
        match self {
            Self::Cpu => true,
            Self::Wgpu => cfg!(feature = "wgpu"),
        }
    }
}

impl TryFrom<u8> for Backend {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Wgpu),
            _ => Err(()),
        }
    }
}

impl core::fmt::Display for Backend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Wgpu => f.write_str("wgpu"),
        }
    }
}

static GLOBAL_DEFAULT_BACKEND: AtomicU8 = AtomicU8::new(Backend::Cpu as u8);

/// Sets the backend used when a device is created without naming one.
///
/// # Example
///
/// ```
/// use seqconv::backend::{get_backend, set_backend, Backend};
/// set_backend(Backend::Cpu);
/// assert_eq!(get_backend(), Backend::Cpu);
/// ```
pub fn set_backend(b: Backend) {
    GLOBAL_DEFAULT_BACKEND.store(b as u8, Ordering::Release);
}

/// Returns the default backend.
///
/// If the stored value is invalid, defaults to [`Backend::Cpu`].
pub fn get_backend() -> Backend {
    Backend::try_from(GLOBAL_DEFAULT_BACKEND.load(Ordering::Acquire)).unwrap_or_default()
}

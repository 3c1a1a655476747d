//! Device memory accounting.
//!
//! Every device buffer is obtained through an [`Allocator`]. The allocator is an
//! explicit object handed to [`Device`](crate::device::Device) constructors and
//! shared by reference counting; kernels never reach for a global pool.
//!
//! [`MemoryPool`] is the shipped allocator. It accounts bytes rather than owning
//! memory itself: the buffer storage lives next to the [`Allocation`] inside a
//! device tensor, and dropping the tensor returns its bytes to the pool.

use crate::error::{Result, SeqConvError};
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Allocation contract: reserve `bytes` and return a handle usable by every kernel.
pub trait Allocator: Send + Sync + core::fmt::Debug {
    /// Reserves `bytes` bytes of device memory.
    fn allocate(&self, bytes: usize) -> Result<Allocation>;
}

#[derive(Debug, Default)]
struct PoolCounters {
    in_use: AtomicUsize,
    peak: AtomicUsize,
    live: AtomicUsize,
    total_allocations: AtomicUsize,
}

/// A process-wide pool shared by all kernels and batches.
#[derive(Debug, Default)]
pub struct MemoryPool {
    counters: Arc<PoolCounters>,
    capacity: Option<usize>,
}

/// Snapshot of a pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Bytes currently reserved.
    pub in_use: usize,
    /// Largest value `in_use` has reached.
    pub peak: usize,
    /// Allocations not yet dropped.
    pub live_allocations: usize,
    /// Allocations ever granted.
    pub total_allocations: usize,
    /// Upper bound on `in_use`, if any.
    pub capacity: Option<usize>,
}

impl MemoryPool {
    /// Creates an unbounded pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pool that refuses to hold more than `capacity` bytes at once.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            counters: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Returns a snapshot of the pool's counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            in_use: self.counters.in_use.load(Ordering::Acquire),
            peak: self.counters.peak.load(Ordering::Acquire),
            live_allocations: self.counters.live.load(Ordering::Acquire),
            total_allocations: self.counters.total_allocations.load(Ordering::Acquire),
            capacity: self.capacity,
        }
    }
}

impl Allocator for MemoryPool {
    fn allocate(&self, bytes: usize) -> Result<Allocation> {
        let counters = &self.counters;
        let mut current = counters.in_use.load(Ordering::Acquire);
        let next = loop {
            let next = current.saturating_add(bytes);
            if let Some(capacity) = self.capacity {
                if next > capacity {
                    return Err(SeqConvError::OutOfMemory {
                        requested: bytes,
                        in_use: current,
                        capacity,
                    });
                }
            }
            match counters.in_use.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break next,
                Err(actual) => current = actual,
            }
        };
        counters.peak.fetch_max(next, Ordering::AcqRel);
        counters.live.fetch_add(1, Ordering::AcqRel);
        counters.total_allocations.fetch_add(1, Ordering::AcqRel);
        log::trace!("allocated {bytes} bytes ({next} in use)");

        Ok(Allocation {
            bytes,
            counters: Arc::clone(counters),
        })
    }
}

/// A reservation in a [`MemoryPool`]; the bytes are returned on drop.
#[derive(Debug)]
pub struct Allocation {
    bytes: usize,
    counters: Arc<PoolCounters>,
}

impl Allocation {
    /// Size of the reservation in bytes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.counters.in_use.fetch_sub(self.bytes, Ordering::AcqRel);
        self.counters.live.fetch_sub(1, Ordering::AcqRel);
    }
}

mod common;

use common::cpu;
use seqconv::backend::Backend;
use seqconv::device::Device;
use seqconv::memory::MemoryPool;
use seqconv::tensors::Tensor;
use seqconv::{ErrorClass, SeqConvError};
use std::sync::Arc;

#[test]
fn test_round_trip_and_accounting() {
    let (pool, device) = cpu();
    assert_eq!(device.backend(), Backend::Cpu);

    let host = Tensor::new(vec![3, 4], (0..12).map(|i| i as f64).collect());
    let a = host.to_device(&device).unwrap();
    assert_eq!(pool.stats().in_use, 96);
    assert_eq!(a.to_host().unwrap(), host);

    let b = a.clone();
    assert_eq!(pool.stats().live_allocations, 1);
    drop(a);
    assert_eq!(pool.stats().in_use, 96);
    drop(b);

    let stats = pool.stats();
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.peak, 96);
    assert_eq!(stats.total_allocations, 1);
}

#[test]
fn test_pool_capacity_is_enforced() {
    let pool = Arc::new(MemoryPool::with_capacity(64));
    let device = Device::cpu(pool.clone());

    let small = Tensor::new(vec![8], vec![1.0f32; 8]).into_device(&device).unwrap();
    let err = Tensor::new(vec![16], vec![1.0f32; 16])
        .into_device(&device)
        .unwrap_err();
    assert!(matches!(err, SeqConvError::OutOfMemory { .. }));
    assert_eq!(err.class(), ErrorClass::Resource);

    drop(small);
    assert!(Tensor::new(vec![16], vec![1.0f32; 16]).into_device(&device).is_ok());
}

#[test]
fn test_slice_rows_copies() {
    let (pool, device) = cpu();
    let t = Tensor::new(vec![4, 2, 3], (0..24).map(|i| i as f32).collect())
        .into_device(&device)
        .unwrap();

    let rows = t.slice_rows(1, 3).unwrap();
    assert_eq!(rows.shape(), &[2, 2, 3]);
    assert_eq!(rows.to_host().unwrap().data, (6..18).map(|i| i as f32).collect::<Vec<_>>());
    assert_eq!(pool.stats().live_allocations, 2);

    assert_eq!(t.slice_rows(3, 5).unwrap_err().class(), ErrorClass::Shape);
    assert_eq!(t.slice_rows(2, 1).unwrap_err().class(), ErrorClass::Shape);
    assert!(t.slice_rows(4, 4).unwrap().is_empty());
}

#[test]
fn test_reshape_shares_buffer() {
    let (pool, device) = cpu();
    let t = Tensor::new(vec![2, 6], vec![1.0f64; 12]).into_device(&device).unwrap();
    let v = t.reshape(vec![3, 4]).unwrap();
    assert_eq!(v.shape(), &[3, 4]);
    assert_eq!(v.rows(), 3);
    assert_eq!(pool.stats().live_allocations, 1);
    assert_eq!(t.reshape(vec![5]).unwrap_err().class(), ErrorClass::Shape);
}

#[test]
fn test_alloc_rejects_mismatched_data() {
    let (_, device) = cpu();
    let err = device.alloc_from_vec(vec![2, 2], vec![0.0f32; 3]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Shape);
}

#[test]
fn test_devices_compare_by_allocator() {
    let (pool, device) = cpu();
    let same = Device::cpu(pool);
    let (_, other) = cpu();
    assert!(device.same_as(&same));
    assert!(!device.same_as(&other));
}

#[cfg(not(feature = "wgpu"))]
#[test]
fn test_wgpu_backend_requires_feature() {
    let pool = Arc::new(MemoryPool::new());
    let err = Device::from_backend(Backend::Wgpu, pool).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Device);
    assert!(!Backend::Wgpu.is_available());
}

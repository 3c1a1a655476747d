mod common;

use common::{cpu, random, reference_grad_weights};
use rand::rngs::StdRng;
use rand::SeedableRng;
use seqconv::approx::{approx_eq, Check};
use seqconv::encoding::SequenceEncoder;
use seqconv::layers::{ConvLayer, Layer};
use seqconv::pooling::{PoolSize, PoolingLayer};
use seqconv::tensors::Tensor;
use seqconv::ErrorClass;

#[test]
fn test_conv_layer_parameters_and_penalties() {
    let (_, device) = cpu();
    let filters = Tensor::new(vec![2, 3], vec![1.0f64, -2.0, 0.0, 0.5, -0.5, 3.0])
        .into_device(&device)
        .unwrap();
    let layer = ConvLayer::new(filters, 1).unwrap();
    assert_eq!(layer.n_parameters(), 6);
    assert_eq!(layer.l1_penalty().unwrap(), 0.0);
    assert_eq!(layer.l2_penalty().unwrap(), 0.0);

    let layer = layer.with_penalties(0.1, 0.2);
    assert!((layer.l1_penalty().unwrap() - 0.1 * 7.0).abs() < 1e-12);
    assert!((layer.l2_penalty().unwrap() - 0.2 * 0.5 * 14.5).abs() < 1e-12);
}

#[test]
fn test_conv_layer_gradients() {
    let (_, device) = cpu();
    let mut rng = StdRng::seed_from_u64(101);
    let x = random::<f64>(&mut rng, &[3, 12]);
    let mut layer =
        ConvLayer::<f64>::with_random_filters(&device, 4, 5, 2, 0.1, &mut rng).unwrap();
    assert_eq!((layer.n_filters(), layer.filter_width(), layer.stride()), (4, 5, 2));

    let input = x.to_device(&device).unwrap();
    let (y, cache) = layer.forward(&input, false).unwrap();
    assert_eq!(y.shape(), &[4, 3, 6]);

    let df = random::<f64>(&mut rng, &[4, 3, 6]);
    let (grads, dx) = layer
        .backward(&input, &df.to_device(&device).unwrap(), cache)
        .unwrap();
    assert_eq!(grads.len(), 1);
    assert_eq!(grads[0].shape(), &[4, 5]);
    assert_eq!(dx.shape(), &[3, 12]);

    let expected = reference_grad_weights(&x, &df, 5, 2);
    assert!(approx_eq(&grads[0].to_host().unwrap().data, &expected.data, Check::Gradient));
}

#[test]
fn test_penalty_derivatives_are_added() {
    let (_, device) = cpu();
    let w = Tensor::new(vec![1, 3], vec![0.5f64, -1.0, 0.0]);
    let layer = ConvLayer::new(w.to_device(&device).unwrap(), 1)
        .unwrap()
        .with_penalties(0.1, 0.01);

    let x = Tensor::new(vec![1, 4], vec![1.0f64, 2.0, 3.0, 4.0]);
    let df = Tensor::new(vec![1, 1, 4], vec![1.0f64; 4]);
    let (grads, _) = layer
        .backward(&x.to_device(&device).unwrap(), &df.to_device(&device).unwrap(), ())
        .unwrap();

    let plain = reference_grad_weights(&x, &df, 3, 1);
    let penalty = [0.1 + 0.01 * 0.5, -0.1 - 0.01, 0.0];
    let got = grads[0].to_host().unwrap();
    for ((g, p), extra) in got.data.iter().zip(&plain.data).zip(penalty) {
        assert!((g - (p + extra)).abs() < 1e-12);
    }
}

#[test]
fn test_set_filters_checks_shape() {
    let (_, device) = cpu();
    let mut rng = StdRng::seed_from_u64(2);
    let mut layer = ConvLayer::<f32>::with_random_filters(&device, 2, 3, 1, 1.0, &mut rng).unwrap();

    let same = Tensor::new(vec![2, 3], vec![0.0f32; 6]).into_device(&device).unwrap();
    layer.set_filters(same).unwrap();
    assert_eq!(layer.filters().to_host().unwrap().data, vec![0.0; 6]);

    let wrong = Tensor::new(vec![3, 2], vec![0.0f32; 6]).into_device(&device).unwrap();
    assert_eq!(layer.set_filters(wrong).unwrap_err().class(), ErrorClass::Shape);

    assert!(ConvLayer::<f32>::with_random_filters(&device, 2, 3, 1, 0.0, &mut rng).is_err());
    assert!(ConvLayer::<f32>::with_random_filters(&device, 2, 3, 0, 1.0, &mut rng).is_err());
}

#[test]
fn test_conv_then_pool_pipeline() {
    let (pool, device) = cpu();
    let mut rng = StdRng::seed_from_u64(77);
    let x = SequenceEncoder::dna()
        .encode::<f32, _>(&["ACGTACGTAC", "TTGCANNACG", "GGGGCCCCAT"])
        .unwrap()
        .into_device(&device)
        .unwrap();

    let mut conv = ConvLayer::<f32>::with_random_filters(&device, 3, 8, 4, 0.5, &mut rng).unwrap();
    let mut pool_layer = PoolingLayer::max(10, PoolSize::Size(5), 3, true, 7).unwrap();

    let (h, conv_cache) = conv.forward(&x, false).unwrap();
    assert_eq!(h.shape(), &[3, 3, 10]);
    let (y, pool_cache) = pool_layer.forward(&h, false).unwrap();
    assert_eq!(y.shape(), &[3, 3, 2]);
    assert_eq!(pool_layer.n_units(), 6);

    let df = Tensor::new(vec![3, 3, 2], vec![1.0f32; 18]).into_device(&device).unwrap();
    let (pool_grads, dh) = pool_layer.backward(&h, &df, pool_cache).unwrap();
    assert!(pool_grads.is_empty());
    assert_eq!(dh.shape(), h.shape());

    let (conv_grads, dx) = conv.backward(&x, &dh, conv_cache).unwrap();
    assert_eq!(conv_grads[0].shape(), &[3, 8]);
    assert_eq!(dx.shape(), &[3, 40]);

    let (_, prediction_cache) = pool_layer.forward(&h, true).unwrap();
    assert!(prediction_cache.dropout_mask.is_none());

    drop((x, h, y, dh, dx, conv_grads, prediction_cache, conv, df));
    assert_eq!(pool.stats().in_use, 0);
}

mod common;

use common::{cpu, random, reference_conv, reference_grad_input, reference_grad_weights};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use seqconv::approx::{approx_eq, max_relative_error, Check};
use seqconv::conv::{conv1d, conv1d_grad_weights, Conv1d};
use seqconv::tensors::{Float, Tensor};
use seqconv::{ErrorClass, SeqConvError};

fn check_forward<T: Float>(
    seed: u64,
    rows: usize,
    width: usize,
    nf: usize,
    fw: usize,
    stride: usize,
) {
    let (_, device) = cpu();
    let mut rng = StdRng::seed_from_u64(seed);
    let x = random::<T>(&mut rng, &[rows, width]);
    let w = random::<T>(&mut rng, &[nf, fw]);

    let y = conv1d(&x.to_device(&device).unwrap(), &w.to_device(&device).unwrap(), stride)
        .unwrap()
        .to_host()
        .unwrap();
    let expected = reference_conv(&x, &w, stride);

    assert_eq!(y.shape, expected.shape);
    assert!(
        approx_eq(&y.data, &expected.data, Check::Forward),
        "relative error {}",
        max_relative_error(&y.data, &expected.data)
    );
}

#[test]
fn test_conv_scenario_shapes() {
    let (_, device) = cpu();
    let mut rng = StdRng::seed_from_u64(7);
    let x = random::<f32>(&mut rng, &[3, 10]).to_device(&device).unwrap();
    let w = random::<f32>(&mut rng, &[2, 5]).to_device(&device).unwrap();

    assert_eq!(conv1d(&x, &w, 1).unwrap().shape(), &[2, 3, 10]);
    assert_eq!(conv1d(&x, &w, 2).unwrap().shape(), &[2, 3, 5]);
}

#[test]
fn test_conv_matches_reference_f32() {
    check_forward::<f32>(1, 3, 10, 2, 5, 1);
    check_forward::<f32>(2, 7, 64, 4, 9, 4);
    check_forward::<f32>(3, 1, 33, 3, 4, 3);
}

#[test]
fn test_conv_matches_reference_f64() {
    check_forward::<f64>(4, 3, 10, 2, 5, 1);
    check_forward::<f64>(5, 5, 80, 6, 12, 4);
    check_forward::<f64>(6, 2, 9, 1, 1, 2);
}

#[test]
fn test_filter_wider_than_input() {
    // a 9-tap filter on 3 columns still fits the padded row
    check_forward::<f64>(8, 2, 3, 2, 9, 1);
}

#[test]
fn test_stride_subsamples_stride_one() {
    let (_, device) = cpu();
    let mut rng = StdRng::seed_from_u64(11);
    let x = random::<f64>(&mut rng, &[4, 24]).to_device(&device).unwrap();
    let w = random::<f64>(&mut rng, &[3, 5]).to_device(&device).unwrap();

    let full = conv1d(&x, &w, 1).unwrap().to_host().unwrap();
    for stride in [2, 3, 4, 5] {
        let strided = conv1d(&x, &w, stride).unwrap().to_host().unwrap();
        let out_width = 24 / stride;
        let expected: Vec<f64> = full
            .data
            .chunks(24)
            .flat_map(|row| (0..out_width).map(move |o| row[o * stride]))
            .collect();
        assert_eq!(strided.data, expected, "stride {stride}");
    }
}

#[test]
fn test_grad_weights_matches_reference() {
    let (_, device) = cpu();
    let mut rng = StdRng::seed_from_u64(21);
    for (rows, width, nf, fw, stride) in [(3, 10, 2, 5, 1), (6, 40, 4, 8, 4), (2, 17, 3, 3, 2)] {
        let x = random::<f64>(&mut rng, &[rows, width]);
        let df = random::<f64>(&mut rng, &[nf, rows, width / stride]);

        let conv = Conv1d::new(stride).unwrap();
        let grad = conv
            .grad_weights(&x.to_device(&device).unwrap(), &df.to_device(&device).unwrap(), fw, nf)
            .unwrap()
            .to_host()
            .unwrap();
        let expected = reference_grad_weights(&x, &df, fw, stride);

        assert_eq!(grad.shape, vec![nf, fw]);
        assert!(approx_eq(&grad.data, &expected.data, Check::Gradient));
    }
}

#[test]
fn test_grad_weights_f32() {
    let (_, device) = cpu();
    let mut rng = StdRng::seed_from_u64(22);
    let x = random::<f32>(&mut rng, &[3, 10]);
    let df = random::<f32>(&mut rng, &[2, 3, 10]);

    let grad = conv1d_grad_weights(
        &x.to_device(&device).unwrap(),
        &df.to_device(&device).unwrap(),
        5,
        2,
        1,
    )
    .unwrap()
    .to_host()
    .unwrap();
    let expected = reference_grad_weights(&x, &df, 5, 1);
    assert!(approx_eq(&grad.data, &expected.data, Check::Gradient));
}

#[test]
fn test_grad_weights_rejects_filter_count_mismatch() {
    let (_, device) = cpu();
    let x = Tensor::new(vec![3, 10], vec![1.0f64; 30]).to_device(&device).unwrap();
    let df = Tensor::new(vec![2, 3, 10], vec![1.0f64; 60]).to_device(&device).unwrap();

    let err = conv1d_grad_weights(&x, &df, 5, 3, 1).unwrap_err();
    assert!(matches!(err, SeqConvError::Shape { .. }));

    let err = conv1d_grad_weights(&x, &df, 5, 2, 2).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Shape);
}

#[test]
fn test_grad_input_matches_scatter_reference() {
    let (_, device) = cpu();
    let mut rng = StdRng::seed_from_u64(31);
    for (rows, width, nf, fw, stride) in [(3, 10, 2, 5, 1), (4, 32, 3, 8, 4), (2, 11, 2, 4, 3)] {
        let w = random::<f64>(&mut rng, &[nf, fw]);
        let df = random::<f64>(&mut rng, &[nf, rows, width / stride]);

        let conv = Conv1d::new(stride).unwrap();
        let dx = conv
            .grad_input(&w.to_device(&device).unwrap(), &df.to_device(&device).unwrap(), width)
            .unwrap()
            .to_host()
            .unwrap();
        let expected = reference_grad_input(&w, &df, width, stride);

        assert_eq!(dx.shape, vec![rows, width]);
        assert!(approx_eq(&dx.data, &expected.data, Check::Gradient));
    }
}

#[test]
fn test_grad_input_is_adjoint_of_forward() {
    let (_, device) = cpu();
    let mut rng = StdRng::seed_from_u64(41);
    let x = random::<f64>(&mut rng, &[3, 20]);
    let w = random::<f64>(&mut rng, &[4, 6]);
    let dy = random::<f64>(&mut rng, &[4, 3, 10]);
    let conv = Conv1d::new(2).unwrap();

    let wd = w.to_device(&device).unwrap();
    let y = conv.forward(&x.to_device(&device).unwrap(), &wd).unwrap().to_host().unwrap();
    let dx = conv
        .grad_input(&wd, &dy.to_device(&device).unwrap(), 20)
        .unwrap()
        .to_host()
        .unwrap();

    let lhs: f64 = y.data.iter().zip(&dy.data).map(|(a, b)| a * b).sum();
    let rhs: f64 = x.data.iter().zip(&dx.data).map(|(a, b)| a * b).sum();
    assert!((lhs - rhs).abs() <= 1e-12 * lhs.abs());
}

#[test]
fn test_invalid_geometry_is_rejected() {
    let (_, device) = cpu();
    let x = Tensor::new(vec![2, 4], vec![1.0f32; 8]).to_device(&device).unwrap();
    let w = Tensor::new(vec![1, 3], vec![1.0f32; 3]).to_device(&device).unwrap();

    assert!(matches!(
        conv1d(&x, &w, 0).unwrap_err(),
        SeqConvError::InvalidArgument { name: "stride", .. }
    ));
    assert_eq!(conv1d(&x, &w, 5).unwrap_err().class(), ErrorClass::Shape);

    let empty = Tensor::new(vec![1, 0], Vec::<f32>::new()).to_device(&device).unwrap();
    assert!(matches!(
        conv1d(&x, &empty, 1).unwrap_err(),
        SeqConvError::InvalidArgument { name: "filter_width", .. }
    ));

    let no_width = Tensor::new(vec![2, 0], Vec::<f32>::new()).to_device(&device).unwrap();
    assert_eq!(conv1d(&no_width, &w, 1).unwrap_err().class(), ErrorClass::Shape);

    let vector = Tensor::new(vec![4], vec![1.0f32; 4]).to_device(&device).unwrap();
    assert_eq!(conv1d(&vector, &w, 1).unwrap_err().class(), ErrorClass::Shape);
}

#[test]
fn test_inputs_are_not_mutated() {
    let (_, device) = cpu();
    let mut rng = StdRng::seed_from_u64(51);
    let x = random::<f32>(&mut rng, &[2, 12]);
    let w = random::<f32>(&mut rng, &[2, 3]);
    let xd = x.to_device(&device).unwrap();
    let wd = w.to_device(&device).unwrap();

    let y = conv1d(&xd, &wd, 1).unwrap();
    let _ = Conv1d::new(1).unwrap().grad_weights(&xd, &y, 3, 2).unwrap();
    assert_eq!(xd.to_host().unwrap(), x);
    assert_eq!(wd.to_host().unwrap(), w);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_conv_matches_reference(
        seed in any::<u64>(),
        rows in 1usize..5,
        width in 1usize..40,
        nf in 1usize..4,
        fw in 1usize..10,
        stride in 1usize..5,
    ) {
        prop_assume!(width / stride > 0);
        check_forward::<f64>(seed, rows, width, nf, fw, stride);
    }

    #[test]
    fn prop_grad_weights_matches_reference(
        seed in any::<u64>(),
        rows in 1usize..4,
        width in 4usize..32,
        nf in 1usize..4,
        fw in 1usize..8,
        stride in 1usize..4,
    ) {
        let (_, device) = cpu();
        let mut rng = StdRng::seed_from_u64(seed);
        let x = random::<f64>(&mut rng, &[rows, width]);
        let df = random::<f64>(&mut rng, &[nf, rows, width / stride]);
        let grad = conv1d_grad_weights(
            &x.to_device(&device).unwrap(),
            &df.to_device(&device).unwrap(),
            fw,
            nf,
            stride,
        )
        .unwrap()
        .to_host()
        .unwrap();
        let expected = reference_grad_weights(&x, &df, fw, stride);
        prop_assert!(approx_eq(&grad.data, &expected.data, Check::Gradient));
    }
}

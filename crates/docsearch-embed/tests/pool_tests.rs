use candle_core::{DType, Device, Tensor};
use docsearch_embed::masked_mean_l2;

#[test]
fn masked_mean_l2_ignores_padding() {
    let dev = Device::Cpu;
    // Second token is padding.
    let h = Tensor::from_slice(
        &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
        (1, 2, 4),
        &dev,
    )
    .expect("hidden");
    let mask = Tensor::from_slice(&[1i64, 0i64], (1, 2), &dev)
        .expect("mask")
        .to_dtype(DType::F32)
        .expect("dtype");
    let out = masked_mean_l2(&h, &mask).expect("pool");
    let v: Vec<Vec<f32>> = out.to_vec2().expect("vec2");
    let norm: f32 = (1.0f32 + 4.0 + 9.0 + 16.0).sqrt();
    let expected = [1.0 / norm, 2.0 / norm, 3.0 / norm, 4.0 / norm];
    for (a, b) in v[0].iter().copied().zip(expected) {
        assert!((a - b).abs() < 1e-5, "a={a} b={b}");
    }
}

#[test]
fn masked_mean_l2_rejects_wrong_rank() {
    let dev = Device::Cpu;
    let h = Tensor::zeros((2, 4), DType::F32, &dev).expect("hidden");
    let mask = Tensor::ones((2, 4), DType::F32, &dev).expect("mask");
    assert!(masked_mean_l2(&h, &mask).is_err());
}

#![allow(dead_code)]

use fp8_cast_kernels::{Device, DeviceConfig, FloatType, Fp8Float, KernelFloat, Stream};
use fp8_scalar_ops::{activations, blas, fp8};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub fn stream() -> Stream {
    let _ = env_logger::builder().is_test(true).try_init();
    Device::new(DeviceConfig {
        num_threads: 4,
        ..DeviceConfig::default()
    })
    .expect("device")
    .new_stream()
}

pub fn fp8_format<O: Fp8Float>() -> u32 {
    match O::TYPE_ID {
        FloatType::E4M3 => fp8::FORMAT_E4M3,
        _ => fp8::FORMAT_E5M2,
    }
}

pub fn bits<O: Fp8Float>(values: &[O]) -> Vec<u8> {
    values.iter().map(|v| v.to_bits()).collect()
}

/// Expected results computed with the scalar golden reference.
pub struct Expected {
    pub cast: Vec<u8>,
    pub transposed: Vec<u8>,
    pub dbias: Vec<f32>,
    pub amax: f32,
}

/// Reference for `values` (already through the fused element op, in f32).
pub fn expected_from_f32<O: Fp8Float>(values: &[f32], row_length: usize, num_rows: usize, scale: f32) -> Expected {
    let n = values.len();
    assert_eq!(n, row_length * num_rows);
    let mut scaled = vec![0.0f32; n];
    blas::scalar_scale(values.as_ptr(), scale, scaled.as_mut_ptr(), n);
    let mut cast = vec![0u8; n];
    fp8::scalar_fp8_quantize(scaled.as_ptr(), cast.as_mut_ptr(), n, fp8_format::<O>());
    let mut transposed = vec![0u8; n];
    blas::scalar_transpose_2d_u8(cast.as_ptr(), transposed.as_mut_ptr(), num_rows, row_length);
    let mut dbias = vec![0.0f32; row_length];
    blas::scalar_column_sum(values.as_ptr(), dbias.as_mut_ptr(), num_rows, row_length);
    let amax = blas::scalar_amax(values.as_ptr(), n);
    Expected {
        cast,
        transposed,
        dbias,
        amax,
    }
}

pub fn expected<I: KernelFloat, O: Fp8Float>(input: &[I], row_length: usize, num_rows: usize, scale: f32) -> Expected {
    let values: Vec<f32> = input.iter().map(|v| v.to_f32()).collect();
    expected_from_f32::<O>(&values, row_length, num_rows, scale)
}

/// `grad * gelu'(x)` in f64.
pub fn dgelu_reference(grad: &[f32], x: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0f32; grad.len()];
    activations::scalar_dgelu(grad.as_ptr(), x.as_ptr(), out.as_mut_ptr(), grad.len());
    out
}

pub fn assert_close(got: &[f32], expected: &[f32], rel: f32, abs: f32) {
    assert_eq!(got.len(), expected.len());
    for (i, (&g, &e)) in got.iter().zip(expected).enumerate() {
        let tol = abs + rel * e.abs();
        assert!((g - e).abs() <= tol, "index {i}: got {g}, expected {e} (tol {tol})");
    }
}

/// Seeded uniform values in `[-range, range)`.
pub fn random_values(n: usize, seed: u64, range: f32) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-range..range)).collect()
}

pub fn convert<I: KernelFloat>(values: &[f32]) -> Vec<I> {
    values.iter().map(|&v| I::from_f32(v)).collect()
}

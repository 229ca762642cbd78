//! Property-based tests for the fused FP8 cast.
//!
//! Shapes are drawn so every tile position occurs (full tiles, partial
//! columns, partial rows, single vectors) and the properties must hold for
//! all of them:
//! - transposed output is exactly the transpose of the cast output
//! - cast codes match the scalar reference bit for bit
//! - dbias matches the reference column sums within accumulation tolerance
//! - amax is the exact largest magnitude
//! - workspace sizing depends only on the shape

use half::{bf16, f16};
use proptest::prelude::*;

use fp8_cast_kernels::{
    cast_transpose_dbias_owned, workspace_config, workspace_size_elements, AtomicAmax, CastTransposeConfig,
    Fp8E4M3, Fp8E5M2, Fp8Float, KernelFloat,
};

mod common;

use common::{assert_close, bits, convert, expected, random_values};

/// `(row_length, num_rows)` with `row_length` a multiple of `nvec_in` and
/// `num_rows` a multiple of 8.
fn arb_shape(nvec_in: usize) -> impl Strategy<Value = (usize, usize)> {
    (1..=40usize, 1..=40usize).prop_map(move |(k, m)| (k * nvec_in, m * 8))
}

fn check<I: KernelFloat, O: Fp8Float>(
    row_length: usize,
    num_rows: usize,
    scale: f32,
    seed: u64,
    dbias_tol: (f32, f32),
) -> Result<(), TestCaseError> {
    let stream = common::stream();
    let input: Vec<I> = convert(&random_values(row_length * num_rows, seed, 8.0));
    let amax = AtomicAmax::default();
    let out = cast_transpose_dbias_owned::<I, O>(
        &stream,
        &CastTransposeConfig::new(row_length, num_rows),
        &input,
        Some(scale),
        Some(&amax),
    )
    .map_err(|e| TestCaseError::fail(e.to_string()))?;
    let exp = expected::<I, O>(&input, row_length, num_rows, scale);

    for r in 0..num_rows {
        for c in 0..row_length {
            prop_assert_eq!(
                out.transposed[c * num_rows + r].to_bits(),
                out.cast[r * row_length + c].to_bits()
            );
        }
    }
    prop_assert_eq!(bits(&out.cast), exp.cast);
    let dbias: Vec<f32> = out.dbias.iter().map(|v| v.to_f32()).collect();
    assert_close(&dbias, &exp.dbias, dbias_tol.0, dbias_tol.1);
    prop_assert_eq!(amax.load(), exp.amax);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_f16_to_e4m3((row_length, num_rows) in arb_shape(4), scale in 0.01f32..64.0, seed in any::<u64>()) {
        check::<f16, Fp8E4M3>(row_length, num_rows, scale, seed, (2e-3, 4e-3))?;
    }

    #[test]
    fn prop_bf16_to_e5m2((row_length, num_rows) in arb_shape(4), scale in 0.01f32..64.0, seed in any::<u64>()) {
        check::<bf16, Fp8E5M2>(row_length, num_rows, scale, seed, (8e-3, 3e-2))?;
    }

    #[test]
    fn prop_f32_to_e4m3((row_length, num_rows) in arb_shape(2), scale in 0.01f32..64.0, seed in any::<u64>()) {
        check::<f32, Fp8E4M3>(row_length, num_rows, scale, seed, (1e-5, 1e-3))?;
    }

    #[test]
    fn prop_workspace_size_is_pure(row_length in 0usize..10_000, num_rows in 0usize..10_000) {
        let a = workspace_size_elements::<Fp8E4M3>(row_length, num_rows);
        prop_assert_eq!(a, workspace_size_elements::<Fp8E4M3>(row_length, num_rows));
        prop_assert_eq!(a, workspace_size_elements::<Fp8E5M2>(row_length, num_rows));
        let ws = workspace_config::<Fp8E4M3>(row_length, num_rows);
        prop_assert_eq!(ws.cols, row_length);
        prop_assert!(ws.rows * 256 >= num_rows && ws.rows * 256 < num_rows + 256);
    }
}

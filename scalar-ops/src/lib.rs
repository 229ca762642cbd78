//! Scalar reference implementations: `extern "C"` pure scalar functions.
//!
//! These serve as the golden reference for the fused FP8 cast/transpose
//! kernels: every loop is the obvious one, with no tiling, no vector groups
//! and no parallelism, so a mismatch always points at the kernel side.
//!
//! This crate is compiled with `opt-level = 1` (configured in the workspace
//! root Cargo.toml) so the loops are not vectorized or reassociated, which
//! keeps the floating-point summation order exactly as written.

pub mod activations;
pub mod blas;
pub mod fp8;

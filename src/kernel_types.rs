//! Element types accepted by the cast kernels.
//!
//! The set is closed: inputs are `f32`, `f16` or `bf16`, outputs are the two
//! FP8 formats. Both traits are sealed so every instantiation of the kernels
//! is one of these six pairs.

use crate::fp8::{Fp8E4M3, Fp8E5M2};

/// Bytes a thread moves per global load.
pub const DESIRED_LOAD_BYTES: usize = 8;
/// Bytes a thread moves per global store.
pub const DESIRED_STORE_BYTES: usize = 8;

/// Float type identifier for const-time kernel selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatType {
    F32,
    F16,
    BF16,
    E4M3,
    E5M2,
}

impl FloatType {
    pub const fn name(self) -> &'static str {
        match self {
            FloatType::F32 => "f32",
            FloatType::F16 => "f16",
            FloatType::BF16 => "bf16",
            FloatType::E4M3 => "e4m3",
            FloatType::E5M2 => "e5m2",
        }
    }
}

mod sealed {
    pub trait Sealed {}

    impl Sealed for f32 {}
    impl Sealed for half::f16 {}
    impl Sealed for half::bf16 {}
    impl Sealed for crate::fp8::Fp8E4M3 {}
    impl Sealed for crate::fp8::Fp8E5M2 {}
}

/// Wide-precision element: the matrix, GELU input and dbias types.
/// Implemented for f32, half::f16, and half::bf16.
pub trait KernelFloat: sealed::Sealed + Copy + Default + Send + Sync + 'static {
    const TYPE_ID: FloatType;
    /// Elements per 8-byte load.
    const NVEC_IN: usize;

    fn to_f32(self) -> f32;
    fn from_f32(v: f32) -> Self;
    fn zero() -> Self;
}

impl KernelFloat for f32 {
    const TYPE_ID: FloatType = FloatType::F32;
    const NVEC_IN: usize = DESIRED_LOAD_BYTES / 4;

    #[inline(always)]
    fn to_f32(self) -> f32 { self }
    #[inline(always)]
    fn from_f32(v: f32) -> Self { v }
    #[inline(always)]
    fn zero() -> Self { 0.0 }
}

impl KernelFloat for half::f16 {
    const TYPE_ID: FloatType = FloatType::F16;
    const NVEC_IN: usize = DESIRED_LOAD_BYTES / 2;

    #[inline(always)]
    fn to_f32(self) -> f32 { half::f16::to_f32(self) }
    #[inline(always)]
    fn from_f32(v: f32) -> Self { half::f16::from_f32(v) }
    #[inline(always)]
    fn zero() -> Self { half::f16::ZERO }
}

impl KernelFloat for half::bf16 {
    const TYPE_ID: FloatType = FloatType::BF16;
    const NVEC_IN: usize = DESIRED_LOAD_BYTES / 2;

    #[inline(always)]
    fn to_f32(self) -> f32 { half::bf16::to_f32(self) }
    #[inline(always)]
    fn from_f32(v: f32) -> Self { half::bf16::from_f32(v) }
    #[inline(always)]
    fn zero() -> Self { half::bf16::ZERO }
}

/// Narrow (8-bit) cast target.
pub trait Fp8Float: sealed::Sealed + Copy + Default + PartialEq + Send + Sync + 'static {
    const TYPE_ID: FloatType;
    /// Elements per 8-byte store.
    const NVEC_OUT: usize = DESIRED_STORE_BYTES;

    fn from_f32(v: f32) -> Self;
    fn to_f32(self) -> f32;
    fn to_bits(self) -> u8;
    fn from_bits(bits: u8) -> Self;
}

impl Fp8Float for Fp8E4M3 {
    const TYPE_ID: FloatType = FloatType::E4M3;

    #[inline(always)]
    fn from_f32(v: f32) -> Self { Fp8E4M3::from_f32(v) }
    #[inline(always)]
    fn to_f32(self) -> f32 { Fp8E4M3::to_f32(self) }
    #[inline(always)]
    fn to_bits(self) -> u8 { Fp8E4M3::to_bits(self) }
    #[inline(always)]
    fn from_bits(bits: u8) -> Self { Fp8E4M3::from_bits(bits) }
}

impl Fp8Float for Fp8E5M2 {
    const TYPE_ID: FloatType = FloatType::E5M2;

    #[inline(always)]
    fn from_f32(v: f32) -> Self { Fp8E5M2::from_f32(v) }
    #[inline(always)]
    fn to_f32(self) -> f32 { Fp8E5M2::to_f32(self) }
    #[inline(always)]
    fn to_bits(self) -> u8 { Fp8E5M2::to_bits(self) }
    #[inline(always)]
    fn from_bits(bits: u8) -> Self { Fp8E5M2::from_bits(bits) }
}

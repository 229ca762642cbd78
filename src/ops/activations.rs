//! Derivative of GELU (tanh approximation).
//!
//! It feeds the `dgelu` variant of the fused cast, which multiplies an
//! incoming gradient by `gelu'(x)` before narrowing.

const SQRT_2_OVER_PI: f32 = 0.797_884_6;
const COEF: f32 = 0.044715;
/// `3 * COEF * SQRT_2_OVER_PI`
const DCOEF: f32 = 0.107_032_2;

// ============================================================================
// GELU backward
// ============================================================================

/// `d gelu(x) / dx`.
#[inline(always)]
pub fn dgelu_scalar(x: f32) -> f32 {
    let t = (SQRT_2_OVER_PI * x * (1.0 + COEF * x * x)).tanh();
    0.5 * x * (1.0 - t * t) * (SQRT_2_OVER_PI + DCOEF * x * x) + 0.5 * (1.0 + t)
}

/// Fused backward: `output = grad * gelu'(x)`.
#[inline(always)]
pub fn dgelu(grad: &[f32], x: &[f32], output: &mut [f32]) {
    debug_assert_eq!(grad.len(), x.len());
    debug_assert_eq!(grad.len(), output.len());
    for ((o, &g), &v) in output.iter_mut().zip(grad).zip(x) {
        *o = g * dgelu_scalar(v);
    }
}

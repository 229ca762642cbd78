/// GELU backward (tanh approximation) fused with the incoming gradient:
/// `out[i] = grad[i] * dgelu(x[i])`
///
/// Evaluated in f64 so it can serve as the reference for the f32 kernel path.
#[no_mangle]
#[inline(never)]
pub extern "C" fn scalar_dgelu(grad: *const f32, x: *const f32, out: *mut f32, n: usize) {
    const SQRT_2_OVER_PI: f64 = 0.797_884_560_802_865_4;
    const COEF: f64 = 0.044715;
    for i in 0..n {
        unsafe {
            let v = *x.add(i) as f64;
            let inner = SQRT_2_OVER_PI * v * (1.0 + COEF * v * v);
            let t = inner.tanh();
            let d = 0.5 * v * (1.0 - t * t) * (SQRT_2_OVER_PI + 3.0 * COEF * SQRT_2_OVER_PI * v * v)
                + 0.5 * (1.0 + t);
            *out.add(i) = (*grad.add(i) as f64 * d) as f32;
        }
    }
}

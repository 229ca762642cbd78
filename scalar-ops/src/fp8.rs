//! Table-driven FP8 rounding.
//!
//! The reference never manipulates bit fields of the input: it decodes every
//! code of the format and picks the nearest one by search, which makes it an
//! independent oracle for the bit-twiddling encoders in the main crate.
//!
//! Format selector: `0` = E4M3 (bias 7, no infinities, max 448),
//! `1` = E5M2 (bias 15, IEEE-like infinities, max 57344).

pub const FORMAT_E4M3: u32 = 0;
pub const FORMAT_E5M2: u32 = 1;

/// Canonical NaN code produced for NaN inputs (both formats).
pub const CANONICAL_NAN: u8 = 0x7F;

fn layout(format: u32) -> (u32, i32, u8) {
    // (mantissa bits, exponent bias, largest finite magnitude code)
    match format {
        FORMAT_E4M3 => (3, 7, 0x7E),
        _ => (2, 15, 0x7B),
    }
}

/// Decode one FP8 code to f32.
#[no_mangle]
#[inline(never)]
pub extern "C" fn scalar_fp8_decode(code: u8, format: u32) -> f32 {
    let (man_bits, bias, max_code) = layout(format);
    let sign = if code & 0x80 != 0 { -1.0_f64 } else { 1.0_f64 };
    let mag = code & 0x7F;
    if mag > max_code {
        if format == FORMAT_E5M2 && mag == 0x7C {
            return (sign * f64::INFINITY) as f32;
        }
        return f32::NAN;
    }
    let exp = (mag >> man_bits) as i32;
    let man = (mag & ((1u8 << man_bits) - 1)) as f64;
    let frac = man / (1u32 << man_bits) as f64;
    let value = if exp == 0 {
        frac * 2f64.powi(1 - bias)
    } else {
        (1.0 + frac) * 2f64.powi(exp - bias)
    };
    (sign * value) as f32
}

/// Quantize `n` values to FP8 codes: round to nearest, ties to even
/// mantissa, saturate to the largest finite value, NaN to [`CANONICAL_NAN`].
#[no_mangle]
#[inline(never)]
pub extern "C" fn scalar_fp8_quantize(x: *const f32, out: *mut u8, n: usize, format: u32) {
    let (_, _, max_code) = layout(format);
    for i in 0..n {
        let v = unsafe { *x.add(i) };
        let code = if v.is_nan() {
            CANONICAL_NAN
        } else {
            let sign = if v.is_sign_negative() { 0x80u8 } else { 0u8 };
            let a = (v as f64).abs();
            if a >= scalar_fp8_decode(max_code, format) as f64 {
                unsafe {
                    *out.add(i) = sign | max_code;
                }
                continue;
            }
            let mut best = 0u8;
            let mut best_err = f64::INFINITY;
            for c in 0..=max_code {
                let err = (scalar_fp8_decode(c, format) as f64 - a).abs();
                // codes are visited in increasing magnitude; on a tie keep the
                // even mantissa
                if err < best_err || (err == best_err && c & 1 == 0) {
                    best = c;
                    best_err = err;
                }
            }
            sign | best
        };
        unsafe {
            *out.add(i) = code;
        }
    }
}

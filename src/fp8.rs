//! 8-bit floating point cast targets.
//!
//! Two formats are supported, both in the OCP FP8 layout (sign, exponent,
//! mantissa from the most significant bit down):
//!
//! | Format | Exponent | Mantissa | Bias | Max finite | Infinity |
//! |--------|----------|----------|------|------------|----------|
//! | E4M3   | 4        | 3        | 7    | 448        | no       |
//! | E5M2   | 5        | 2        | 15   | 57344      | yes      |
//!
//! Narrowing from `f32` rounds to nearest with ties to even and saturates to
//! the largest finite magnitude (infinities included). NaN narrows to the
//! canonical code `0x7F`.
//!
//! Equality on these types is bitwise: `NAN == NAN` and `+0 != -0`.

use std::fmt;

/// Code produced for NaN inputs in both formats.
pub const CANONICAL_NAN: u8 = 0x7F;

struct Fp8Layout {
    man_bits: u32,
    bias: i32,
    /// Largest finite magnitude code.
    max_code: u8,
    has_inf: bool,
}

const E4M3_LAYOUT: Fp8Layout = Fp8Layout {
    man_bits: 3,
    bias: 7,
    max_code: 0x7E,
    has_inf: false,
};

const E5M2_LAYOUT: Fp8Layout = Fp8Layout {
    man_bits: 2,
    bias: 15,
    max_code: 0x7B,
    has_inf: true,
};

/// `2^k` for `k` in the normal f32 exponent range.
#[inline(always)]
fn exp2i(k: i32) -> f32 {
    debug_assert!((-126..=127).contains(&k));
    f32::from_bits(((k + 127) as u32) << 23)
}

impl Fp8Layout {
    #[inline(always)]
    fn min_normal_exp(&self) -> i32 {
        1 - self.bias
    }

    #[inline(always)]
    fn decode(&self, code: u8) -> f32 {
        let negative = code & 0x80 != 0;
        let mag = code & 0x7F;
        let value = if mag > self.max_code {
            if self.has_inf && mag == 0x7C {
                f32::INFINITY
            } else {
                return f32::NAN;
            }
        } else {
            let exp = (mag >> self.man_bits) as i32;
            let man = (mag & ((1u8 << self.man_bits) - 1)) as u32;
            if exp == 0 {
                man as f32 * exp2i(self.min_normal_exp() - self.man_bits as i32)
            } else {
                f32::from_bits((((exp - self.bias + 127) as u32) << 23) | (man << (23 - self.man_bits)))
            }
        };
        if negative {
            -value
        } else {
            value
        }
    }

    #[inline(always)]
    fn encode(&self, v: f32) -> u8 {
        if v.is_nan() {
            return CANONICAL_NAN;
        }
        let sign = ((v.to_bits() >> 24) & 0x80) as u8;
        let a = v.abs();
        if a >= self.decode(self.max_code) {
            return sign | self.max_code;
        }

        let f32_exp = ((a.to_bits() >> 23) & 0xFF) as i32 - 127;
        let code = if f32_exp < self.min_normal_exp() {
            // Subnormal target; a quotient of 2^man_bits lands exactly on the
            // smallest normal code.
            let scaled = a * exp2i(self.man_bits as i32 - self.min_normal_exp());
            scaled.round_ties_even() as u32
        } else {
            let scaled = a * exp2i(self.man_bits as i32 - f32_exp);
            let q = scaled.round_ties_even() as u32;
            // q == 2^(man_bits + 1) carries into the exponent field
            (((f32_exp + self.bias) as u32) << self.man_bits) + (q - (1 << self.man_bits))
        };
        sign | code.min(self.max_code as u32) as u8
    }
}

macro_rules! define_fp8_type {
    ($(#[$meta:meta])* $name:ident, $layout:ident, $label:literal) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
        pub struct $name(u8);

        impl $name {
            pub const ZERO: Self = Self(0);
            pub const ONE: Self = Self((($layout.bias as u8) << $layout.man_bits) as u8);
            /// Largest finite value.
            pub const MAX: Self = Self($layout.max_code);
            pub const NAN: Self = Self(CANONICAL_NAN);

            #[inline(always)]
            pub const fn from_bits(bits: u8) -> Self {
                Self(bits)
            }

            #[inline(always)]
            pub const fn to_bits(self) -> u8 {
                self.0
            }

            /// Narrowing conversion: round to nearest even, saturate to finite.
            #[inline(always)]
            pub fn from_f32(v: f32) -> Self {
                Self($layout.encode(v))
            }

            #[inline(always)]
            pub fn to_f32(self) -> f32 {
                $layout.decode(self.0)
            }

            #[inline(always)]
            pub fn is_nan(self) -> bool {
                self.to_f32().is_nan()
            }
        }

        impl From<$name> for f32 {
            #[inline(always)]
            fn from(v: $name) -> f32 {
                v.to_f32()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $label, self.to_f32())
            }
        }
    };
}

define_fp8_type!(
    /// FP8 with 4 exponent and 3 mantissa bits; the usual forward-pass format.
    Fp8E4M3,
    E4M3_LAYOUT,
    "e4m3"
);

define_fp8_type!(
    /// FP8 with 5 exponent and 2 mantissa bits; wider range, used for gradients.
    Fp8E5M2,
    E5M2_LAYOUT,
    "e5m2"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e4m3_known_values() {
        assert_eq!(Fp8E4M3::ONE.to_f32(), 1.0);
        assert_eq!(Fp8E4M3::from_f32(1.0).to_bits(), 0x38);
        assert_eq!(Fp8E4M3::from_f32(-2.0).to_bits(), 0xC0);
        assert_eq!(Fp8E4M3::MAX.to_f32(), 448.0);
        assert_eq!(Fp8E4M3::from_bits(0x01).to_f32(), 2f32.powi(-9));
        assert_eq!(Fp8E4M3::from_bits(0x08).to_f32(), 2f32.powi(-6));
    }

    #[test]
    fn e5m2_known_values() {
        assert_eq!(Fp8E5M2::ONE.to_f32(), 1.0);
        assert_eq!(Fp8E5M2::from_f32(1.0).to_bits(), 0x3C);
        assert_eq!(Fp8E5M2::MAX.to_f32(), 57344.0);
        assert_eq!(Fp8E5M2::from_bits(0x7C).to_f32(), f32::INFINITY);
        assert_eq!(Fp8E5M2::from_bits(0x01).to_f32(), 2f32.powi(-16));
    }

    #[test]
    fn every_finite_code_roundtrips() {
        for bits in 0u8..=255 {
            let e4 = Fp8E4M3::from_bits(bits);
            if !e4.is_nan() {
                assert_eq!(Fp8E4M3::from_f32(e4.to_f32()).to_bits(), bits, "e4m3 code {bits:#04x}");
            }
            let e5 = Fp8E5M2::from_bits(bits);
            if e5.to_f32().is_finite() {
                assert_eq!(Fp8E5M2::from_f32(e5.to_f32()).to_bits(), bits, "e5m2 code {bits:#04x}");
            }
        }
    }

    #[test]
    fn saturates_instead_of_overflowing() {
        assert_eq!(Fp8E4M3::from_f32(1.0e9), Fp8E4M3::MAX);
        assert_eq!(Fp8E4M3::from_f32(f32::INFINITY), Fp8E4M3::MAX);
        assert_eq!(Fp8E4M3::from_f32(-500.0).to_bits(), 0x80 | 0x7E);
        assert_eq!(Fp8E5M2::from_f32(f32::NEG_INFINITY).to_bits(), 0x80 | 0x7B);
        assert_eq!(Fp8E5M2::from_f32(60000.0), Fp8E5M2::MAX);
    }

    #[test]
    fn nan_maps_to_canonical_code() {
        assert_eq!(Fp8E4M3::from_f32(f32::NAN), Fp8E4M3::NAN);
        assert_eq!(Fp8E5M2::from_f32(-f32::NAN).to_bits(), CANONICAL_NAN);
        assert!(Fp8E4M3::NAN.to_f32().is_nan());
    }

    #[test]
    fn rounds_to_nearest_even() {
        // halfway between 1.0 (mantissa 0) and 1.125 (mantissa 1) -> 1.0
        assert_eq!(Fp8E4M3::from_f32(1.0625).to_f32(), 1.0);
        // halfway between 1.125 and 1.25 -> 1.25 (even mantissa)
        assert_eq!(Fp8E4M3::from_f32(1.1875).to_f32(), 1.25);
        // just above the halfway point rounds up
        assert_eq!(Fp8E4M3::from_f32(1.07).to_f32(), 1.125);
        // mantissa overflow carries into the exponent: 1.9375 -> 2.0
        assert_eq!(Fp8E4M3::from_f32(1.97).to_f32(), 2.0);
    }

    #[test]
    fn subnormals_and_underflow() {
        let min_sub = 2f32.powi(-9);
        assert_eq!(Fp8E4M3::from_f32(min_sub * 0.49).to_bits(), 0x00);
        assert_eq!(Fp8E4M3::from_f32(-min_sub * 0.49).to_bits(), 0x80);
        assert_eq!(Fp8E4M3::from_f32(min_sub * 0.51).to_bits(), 0x01);
        // 7.5 subnormal steps rounds to the even neighbour, the smallest normal
        assert_eq!(Fp8E4M3::from_f32(min_sub * 7.5).to_bits(), 0x08);
        assert_eq!(Fp8E4M3::from_f32(f32::from_bits(1)).to_bits(), 0x00);
    }

    #[test]
    fn sign_of_zero_is_kept() {
        assert_eq!(Fp8E4M3::from_f32(0.0).to_bits(), 0x00);
        assert_eq!(Fp8E4M3::from_f32(-0.0).to_bits(), 0x80);
        assert_eq!(Fp8E5M2::from_f32(-0.0).to_bits(), 0x80);
    }
}

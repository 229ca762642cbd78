/// Scale: `out[i] = x[i] * scale`
#[no_mangle]
#[inline(never)]
pub extern "C" fn scalar_scale(x: *const f32, scale: f32, out: *mut f32, n: usize) {
    for i in 0..n {
        unsafe {
            *out.add(i) = *x.add(i) * scale;
        }
    }
}

/// Amax: `max(|x[i]|)`, NaN entries are skipped.
///
/// Returns 0.0 for an empty input.
#[no_mangle]
#[inline(never)]
pub extern "C" fn scalar_amax(x: *const f32, n: usize) -> f32 {
    let mut amax = 0.0_f32;
    for i in 0..n {
        let v = unsafe { *x.add(i) }.abs();
        if v > amax {
            amax = v;
        }
    }
    amax
}

/// Column sum: `out[j] = sum_i input[i][j]` (row-major)
///
/// input is [rows, cols], out is [cols]. Accumulates in f64 so the
/// reference carries no summation-order error of its own.
#[no_mangle]
#[inline(never)]
pub extern "C" fn scalar_column_sum(input: *const f32, out: *mut f32, rows: usize, cols: usize) {
    unsafe {
        for j in 0..cols {
            let mut acc = 0.0_f64;
            for i in 0..rows {
                acc += *input.add(i * cols + j) as f64;
            }
            *out.add(j) = acc as f32;
        }
    }
}

/// Transpose 2D: `out[j][i] = input[i][j]`
///
/// input is [rows, cols], out is [cols, rows].
#[no_mangle]
#[inline(never)]
pub extern "C" fn scalar_transpose_2d(
    input: *const f32,
    out: *mut f32,
    rows: usize,
    cols: usize,
) {
    unsafe {
        for i in 0..rows {
            for j in 0..cols {
                *out.add(j * rows + i) = *input.add(i * cols + j);
            }
        }
    }
}

/// Transpose 2D over raw bytes (FP8 codes): `out[j][i] = input[i][j]`
#[no_mangle]
#[inline(never)]
pub extern "C" fn scalar_transpose_2d_u8(
    input: *const u8,
    out: *mut u8,
    rows: usize,
    cols: usize,
) {
    unsafe {
        for i in 0..rows {
            for j in 0..cols {
                *out.add(j * rows + i) = *input.add(i * cols + j);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_ops_scale() {
        let x = vec![1.0_f32, -2.0, 3.5];
        let mut out = vec![0.0_f32; 3];
        scalar_scale(x.as_ptr(), 2.0, out.as_mut_ptr(), 3);
        assert_eq!(out, vec![2.0, -4.0, 7.0]);
    }

    #[test]
    fn test_scalar_ops_amax() {
        let x = vec![1.0_f32, -7.5, 3.0, f32::NAN, 2.0];
        assert_eq!(scalar_amax(x.as_ptr(), x.len()), 7.5);
        assert_eq!(scalar_amax(x.as_ptr(), 0), 0.0);
    }

    #[test]
    fn test_scalar_ops_column_sum() {
        let input = vec![1.0_f32, 2.0, 3.0, 4.0, 5.0, 6.0]; // [2,3]
        let mut out = vec![0.0_f32; 3];
        scalar_column_sum(input.as_ptr(), out.as_mut_ptr(), 2, 3);
        assert_eq!(out, vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_scalar_ops_transpose_2d() {
        let input = vec![1.0_f32, 2.0, 3.0, 4.0, 5.0, 6.0]; // [2,3]
        let mut out = vec![0.0_f32; 6]; // [3,2]
        scalar_transpose_2d(input.as_ptr(), out.as_mut_ptr(), 2, 3);
        assert_eq!(out, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_scalar_ops_transpose_2d_u8() {
        let input = vec![1u8, 2, 3, 4, 5, 6]; // [3,2]
        let mut out = vec![0u8; 6]; // [2,3]
        scalar_transpose_2d_u8(input.as_ptr(), out.as_mut_ptr(), 3, 2);
        assert_eq!(out, vec![1, 3, 5, 2, 4, 6]);
    }
}

//! Host-side parameter validation for the cast kernels.
//!
//! All functions return `Result<T, String>`; callers map the message to the
//! matching [`BackendError`](crate::error::BackendError) variant.

/// Largest dimension a kernel index can address.
pub const MAX_DIM: usize = i32::MAX as usize;

/// Validate the divisibility preconditions of the fused cast.
///
/// # Arguments
/// - `row_length` - Columns of the input matrix
/// - `num_rows` - Rows of the input matrix
/// - `nvec_in` - Elements per input load
/// - `nvec_out` - Elements per output store
#[inline]
pub fn validate_cast_transpose_dims(
    row_length: usize,
    num_rows: usize,
    nvec_in: usize,
    nvec_out: usize,
) -> Result<(), String> {
    if nvec_in == 0 || nvec_out == 0 {
        return Err("vector widths must be > 0".into());
    }
    if row_length % nvec_in != 0 {
        return Err(format!(
            "row_length {} must be a multiple of the input vector width {}",
            row_length, nvec_in
        ));
    }
    if num_rows % nvec_out != 0 {
        return Err(format!(
            "num_rows {} must be a multiple of the output vector width {}",
            num_rows, nvec_out
        ));
    }
    if row_length > MAX_DIM || num_rows > MAX_DIM {
        return Err(format!(
            "matrix {}x{} exceeds the addressable dimension {}",
            num_rows, row_length, MAX_DIM
        ));
    }
    Ok(())
}

/// Validate input buffer length matches expected.
#[inline]
pub fn validate_input_len(actual: usize, expected: usize, name: &str) -> Result<(), String> {
    if actual != expected {
        return Err(format!("{} len {} != expected {}", name, actual, expected));
    }
    Ok(())
}

/// Element count of a `rows x cols` matrix with overflow check.
#[inline]
pub fn compute_matrix_len(rows: usize, cols: usize) -> Result<usize, String> {
    rows.checked_mul(cols)
        .ok_or_else(|| format!("matrix {}x{} overflows usize", rows, cols))
}

/// Convert usize to u32 with error message.
#[inline]
pub fn to_u32(value: usize, name: &str) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("{} exceeds u32", name))
}

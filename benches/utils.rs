#![allow(dead_code)]

use rand::Rng;

/// Bytes touched by one fused call: input read, two FP8 outputs written,
/// one f32 workspace row per row tile written and read back, dbias written.
pub fn cast_transpose_rw_bytes(row_length: usize, num_rows: usize, input_bytes: usize) -> u64 {
    let n = (row_length * num_rows) as u64;
    let row_tiles = num_rows.div_ceil(256) as u64;
    n * input_bytes as u64 + 2 * n + 2 * 4 * row_tiles * row_length as u64 + (row_length * input_bytes) as u64
}

/// Memory throughput GiB/s
pub fn throughput_gibs(bytes: usize, duration_secs: f64) -> f64 {
    bytes as f64 / duration_secs / (1024.0 * 1024.0 * 1024.0)
}

/// Random f32 vector in [-range, range)
pub fn random_f32_vec(n: usize, range: f32) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    (0..n).map(|_| rng.gen_range(-range..range)).collect()
}

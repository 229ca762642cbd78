//! Warp exchanges, block reductions and the float atomic max.
//!
//! A warp is modelled as the 32 lane values of one register; a shuffle is an
//! all-to-all exchange returning the new register for every lane.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::kernels::launch::BlockContext;
use crate::kernels::THREADS_PER_WARP;

/// Every lane reads the register of lane `src_lane(lane)`.
#[inline(always)]
pub fn shfl_sync<T: Copy>(
    values: &[T; THREADS_PER_WARP],
    src_lane: impl Fn(usize) -> usize,
) -> [T; THREADS_PER_WARP] {
    std::array::from_fn(|lane| values[src_lane(lane) % THREADS_PER_WARP])
}

/// Butterfly exchange with lane `lane ^ lane_mask`.
#[inline(always)]
pub fn shfl_xor<T: Copy>(values: &[T; THREADS_PER_WARP], lane_mask: usize) -> [T; THREADS_PER_WARP] {
    shfl_sync(values, |lane| lane ^ lane_mask)
}

/// Butterfly max over a warp; every lane ends with the warp maximum.
/// NaN operands are ignored.
#[inline]
pub fn warp_reduce_max(values: &[f32; THREADS_PER_WARP]) -> [f32; THREADS_PER_WARP] {
    let mut reg = *values;
    let mut mask = THREADS_PER_WARP / 2;
    while mask > 0 {
        let other = shfl_xor(&reg, mask);
        for (mine, theirs) in reg.iter_mut().zip(other) {
            *mine = mine.max(theirs);
        }
        mask /= 2;
    }
    reg
}

/// Block-wide max of one value per thread: warp butterfly, per-warp staging
/// in shared memory, barrier, then warp 0 reduces the staged values.
///
/// `staging` needs one slot per warp. The result is the value held by
/// thread 0.
pub fn block_reduce_max(thread_values: &[f32], staging: &mut [f32], block: &mut BlockContext) -> f32 {
    let num_warps = thread_values.len() / THREADS_PER_WARP;
    debug_assert!(staging.len() >= num_warps);
    for (warp, lanes) in thread_values.chunks_exact(THREADS_PER_WARP).enumerate() {
        let mut reg = [0.0f32; THREADS_PER_WARP];
        reg.copy_from_slice(lanes);
        staging[warp] = warp_reduce_max(&reg)[0];
    }
    block.sync_threads();
    let reg: [f32; THREADS_PER_WARP] =
        std::array::from_fn(|lane| if lane < num_warps { staging[lane] } else { 0.0 });
    warp_reduce_max(&reg)[0]
}

/// Float max register updated with a compare-and-swap loop.
#[derive(Debug, Default)]
pub struct AtomicAmax {
    bits: AtomicU32,
}

impl AtomicAmax {
    pub fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn store(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    /// Raise the stored value to `max(current, value)`; returns the previous
    /// value. A NaN `value` leaves the register untouched.
    pub fn fetch_max(&self, value: f32) -> f32 {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let old = f32::from_bits(current);
            let new = old.max(value);
            if new.to_bits() == current {
                return old;
            }
            match self
                .bits
                .compare_exchange_weak(current, new.to_bits(), Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return old,
                Err(actual) => current = actual,
            }
        }
    }
}

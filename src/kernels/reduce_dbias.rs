use crate::kernel_types::KernelFloat;
use crate::kernels::launch::{BlockContext, BlockKernel, DevicePtr, DevicePtrMut};
use crate::kernels::vec::SimdVec;

pub const REDUCE_DBIAS_NUM_THREADS: u32 = 256;

/// Sums the `num_partial_rows x row_length` workspace down its rows.
///
/// Thread `t` owns columns `t * NVEC .. (t + 1) * NVEC`, accumulates in
/// `f32` and narrows once to `B`. Threads past `row_length` do nothing.
pub struct ReduceDbiasKernel<'a, B, const NVEC: usize> {
    partial: DevicePtr<'a, f32>,
    dbias: DevicePtrMut<'a, B>,
    row_length: usize,
    num_partial_rows: usize,
}

impl<'a, B: KernelFloat, const NVEC: usize> ReduceDbiasKernel<'a, B, NVEC> {
    /// # Safety
    /// `partial` must hold `num_partial_rows * row_length` elements and
    /// `dbias` `row_length`; blocks read and write them unchecked.
    pub unsafe fn new(
        partial: DevicePtr<'a, f32>,
        dbias: DevicePtrMut<'a, B>,
        row_length: usize,
        num_partial_rows: usize,
    ) -> Self {
        debug_assert_eq!(row_length % NVEC, 0);
        Self {
            partial,
            dbias,
            row_length,
            num_partial_rows,
        }
    }

    /// Blocks needed to cover `row_length` with one thread per vector.
    pub fn num_blocks(row_length: usize) -> usize {
        (row_length / NVEC).div_ceil(REDUCE_DBIAS_NUM_THREADS as usize)
    }
}

impl<B: KernelFloat, const NVEC: usize> BlockKernel for ReduceDbiasKernel<'_, B, NVEC> {
    const NAME: &'static str = "reduce_dbias";

    fn shared_mem_bytes(&self, _block_dim: u32) -> usize {
        0
    }

    fn run_block(&self, block: &mut BlockContext) {
        let block_dim = block.block_dim as usize;
        let row_vectors = self.row_length / NVEC;
        for tid in 0..block_dim {
            let thread_id = block.block_idx as usize * block_dim + tid;
            if thread_id * NVEC >= self.row_length {
                return;
            }
            let thread_in = self.partial.offset(thread_id * NVEC);

            let mut acc = SimdVec::<f32, NVEC>::zeroed();
            for i in 0..self.num_partial_rows {
                let mut part = SimdVec::<f32, NVEC>::zeroed();
                // SAFETY: row i of the workspace holds row_length partials.
                unsafe { part.load_from(thread_in, i * row_vectors) };
                acc += part;
            }

            let mut out = SimdVec::<B, NVEC>::zeroed();
            for j in 0..NVEC {
                out[j] = B::from_f32(acc[j]);
            }
            // SAFETY: one thread per dbias vector.
            unsafe { out.store_to(self.dbias, thread_id) };
        }
    }
}

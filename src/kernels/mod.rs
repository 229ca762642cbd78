//! Device kernels and the block-level execution model they run on.

pub mod cast_transpose;
mod launch;
pub mod reduce_dbias;
pub mod vec;
pub mod warp;

/// Lanes per warp.
pub const THREADS_PER_WARP: usize = 32;

pub use cast_transpose::{
    cast_and_transpose_regs, CastDbias, CastDbiasDgelu, CastOnly, CastOp, CastStore, CastTransposeKernel,
    CastTransposeParam, CAST_TRANSPOSE_NUM_THREADS, N_ITERATIONS, N_WARPS_PER_TILE,
};
pub use launch::{
    BlockContext, BlockKernel, DevicePtr, DevicePtrMut, KernelAttributes, KernelLaunch, LaunchConfig,
};
pub use reduce_dbias::{ReduceDbiasKernel, REDUCE_DBIAS_NUM_THREADS};
pub use vec::SimdVec;
pub use warp::{block_reduce_max, shfl_sync, shfl_xor, warp_reduce_max, AtomicAmax};

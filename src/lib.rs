//! fp8-cast-kernels: fused FP8 cast / transpose / dbias / amax kernels.
//!
//! The kernels keep the structure of their GPU counterparts (warp tiles,
//! double-buffered register loads, a padded shared-memory transpose,
//! per-tile partial sums and one atomic max per block) and run on a host
//! SIMT model: blocks are scheduled on a rayon pool, warps advance in
//! lockstep and barriers separate shared-memory phases.
//!
//! # Quick Start
//!
//! ```ignore
//! use fp8_cast_kernels::{cast_transpose_dbias_owned, AtomicAmax, CastTransposeConfig, Device, Fp8E4M3};
//!
//! let stream = Device::from_env()?.new_stream();
//! let amax = AtomicAmax::default();
//! let config = CastTransposeConfig::new(row_length, num_rows);
//! let out = cast_transpose_dbias_owned::<half::f16, Fp8E4M3>(&stream, &config, &input, Some(scale), Some(&amax))?;
//! ```

pub mod device;
pub mod error;
pub mod fp8;
pub mod kernel_types;
pub mod kernels;
pub mod ops;
pub mod validation;

pub use device::{Device, DeviceConfig, Stream};
pub use error::{BackendError, BackendResult};
pub use fp8::{Fp8E4M3, Fp8E5M2};
pub use kernel_types::{FloatType, Fp8Float, KernelFloat};
pub use kernels::AtomicAmax;
pub use ops::{
    cast_transpose, cast_transpose_dbias, cast_transpose_dbias_dgelu, cast_transpose_dbias_owned,
    workspace_config, workspace_size_elements, CastTransposeConfig, CastTransposeDbiasOutput,
    CastTransposeOutputs, DbiasBuffers, LaunchGeometry, WorkspaceConfig,
};

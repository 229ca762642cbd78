//! Host-side driver of the fused FP8 cast.
//!
//! A call validates the shape and buffers, sizes the launch, picks the
//! aligned or unaligned kernel once for the whole matrix, then runs the main
//! kernel followed by the dbias reduction on the same stream.
//!
//! # Workspace protocol
//!
//! ```ignore
//! let ws = workspace_config::<Fp8E4M3>(row_length, num_rows);
//! let mut workspace = vec![0.0f32; ws.num_elements()];
//! cast_transpose_dbias(&stream, &config, &input, Some(scale), outputs,
//!     DbiasBuffers { dbias: &mut dbias, workspace: &mut workspace }, Some(&amax))?;
//! ```

use crate::device::Stream;
use crate::error::{BackendError, BackendResult};
use crate::kernel_types::{FloatType, Fp8Float, KernelFloat};
use crate::kernels::{
    AtomicAmax, CastDbias, CastDbiasDgelu, CastOnly, CastOp, CastTransposeKernel, CastTransposeParam, DevicePtr,
    DevicePtrMut, KernelAttributes, KernelLaunch, LaunchConfig, ReduceDbiasKernel, CAST_TRANSPOSE_NUM_THREADS,
    N_WARPS_PER_TILE, REDUCE_DBIAS_NUM_THREADS, THREADS_PER_WARP,
};
use crate::validation::{
    compute_matrix_len, to_u32, validate_cast_transpose_dims, validate_input_len,
};

/// Matrix described by a fused call: `num_rows x row_length`, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CastTransposeConfig {
    pub row_length: usize,
    pub num_rows: usize,
}

impl CastTransposeConfig {
    pub fn new(row_length: usize, num_rows: usize) -> Self {
        Self { row_length, num_rows }
    }

    pub fn num_elements(&self) -> BackendResult<usize> {
        compute_matrix_len(self.num_rows, self.row_length).map_err(BackendError::InvalidConfig)
    }
}

/// Cast outputs: `cast` keeps the input layout, `transposed` is
/// `row_length x num_rows`.
pub struct CastTransposeOutputs<'a, O> {
    pub cast: &'a mut [O],
    pub transposed: &'a mut [O],
}

/// Bias gradient (input precision) and its `f32` partial-sum workspace.
pub struct DbiasBuffers<'a, B> {
    pub dbias: &'a mut [B],
    pub workspace: &'a mut [f32],
}

/// Shape and type of the partial-dbias workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkspaceConfig {
    /// One row per row tile.
    pub rows: usize,
    pub cols: usize,
    pub dtype: FloatType,
}

impl WorkspaceConfig {
    pub fn num_elements(&self) -> usize {
        self.rows * self.cols
    }
}

/// Owned results of [`cast_transpose_dbias_owned`].
#[derive(Debug, Clone)]
pub struct CastTransposeDbiasOutput<I, O> {
    pub cast: Vec<O>,
    pub transposed: Vec<O>,
    pub dbias: Vec<I>,
}

/// Tile counts and launch size of the main kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGeometry {
    pub nvec_in: usize,
    pub nvec_out: usize,
    pub num_tiles_x: usize,
    pub num_tiles_y: usize,
    pub num_tiles: usize,
    pub num_blocks: usize,
    /// Both dimensions are whole tiles.
    pub aligned: bool,
}

impl LaunchGeometry {
    pub fn new(row_length: usize, num_rows: usize, nvec_in: usize, nvec_out: usize) -> Self {
        let tile_cols = nvec_in * THREADS_PER_WARP;
        let tile_rows = nvec_out * THREADS_PER_WARP;
        let num_tiles_x = row_length.div_ceil(tile_cols);
        let num_tiles_y = num_rows.div_ceil(tile_rows);
        let num_tiles = num_tiles_x * num_tiles_y;
        let warps_per_block = CAST_TRANSPOSE_NUM_THREADS as usize / THREADS_PER_WARP;
        Self {
            nvec_in,
            nvec_out,
            num_tiles_x,
            num_tiles_y,
            num_tiles,
            num_blocks: (num_tiles * N_WARPS_PER_TILE).div_ceil(warps_per_block),
            aligned: row_length % tile_cols == 0 && num_rows % tile_rows == 0,
        }
    }

    pub fn launch_config(&self) -> BackendResult<LaunchConfig> {
        let grid = to_u32(self.num_blocks, "grid_dim").map_err(BackendError::InvalidConfig)?;
        Ok(LaunchConfig::linear(grid, CAST_TRANSPOSE_NUM_THREADS))
    }
}

/// Workspace elements (`f32`) a dbias call needs:
/// `ceil(num_rows / (32 * nvec_out)) * row_length`.
pub fn workspace_size_elements<O: Fp8Float>(row_length: usize, num_rows: usize) -> usize {
    workspace_config::<O>(row_length, num_rows).num_elements()
}

pub fn workspace_config<O: Fp8Float>(row_length: usize, num_rows: usize) -> WorkspaceConfig {
    WorkspaceConfig {
        rows: num_rows.div_ceil(O::NVEC_OUT * THREADS_PER_WARP),
        cols: row_length,
        dtype: FloatType::F32,
    }
}

/// Cast and transpose without bias reduction.
pub fn cast_transpose<I: KernelFloat, O: Fp8Float>(
    stream: &Stream,
    config: &CastTransposeConfig,
    input: &[I],
    scale: Option<f32>,
    outputs: CastTransposeOutputs<'_, O>,
    amax: Option<&AtomicAmax>,
) -> BackendResult<()> {
    dispatch::<I, O, CastOnly>(stream, config, input, None, scale, outputs, None, amax)
}

/// Fused cast, transpose, column-sum (`dbias`) and amax.
///
/// `scale` defaults to 1.0. `dbias` receives the unscaled column sums in the
/// input precision; `amax` is raised to the largest unscaled magnitude.
pub fn cast_transpose_dbias<I: KernelFloat, O: Fp8Float>(
    stream: &Stream,
    config: &CastTransposeConfig,
    input: &[I],
    scale: Option<f32>,
    outputs: CastTransposeOutputs<'_, O>,
    dbias: DbiasBuffers<'_, I>,
    amax: Option<&AtomicAmax>,
) -> BackendResult<()> {
    dispatch::<I, O, CastDbias>(stream, config, input, None, scale, outputs, Some(dbias), amax)
}

/// As [`cast_transpose_dbias`] on `grad * gelu'(gelu_input)`.
#[allow(clippy::too_many_arguments)]
pub fn cast_transpose_dbias_dgelu<I: KernelFloat, O: Fp8Float>(
    stream: &Stream,
    config: &CastTransposeConfig,
    grad: &[I],
    gelu_input: &[I],
    scale: Option<f32>,
    outputs: CastTransposeOutputs<'_, O>,
    dbias: DbiasBuffers<'_, I>,
    amax: Option<&AtomicAmax>,
) -> BackendResult<()> {
    dispatch::<I, O, CastDbiasDgelu>(stream, config, grad, Some(gelu_input), scale, outputs, Some(dbias), amax)
}

/// [`cast_transpose_dbias`] allocating its outputs and workspace.
pub fn cast_transpose_dbias_owned<I: KernelFloat, O: Fp8Float>(
    stream: &Stream,
    config: &CastTransposeConfig,
    input: &[I],
    scale: Option<f32>,
    amax: Option<&AtomicAmax>,
) -> BackendResult<CastTransposeDbiasOutput<I, O>> {
    validate_cast_transpose_dims(config.row_length, config.num_rows, I::NVEC_IN, O::NVEC_OUT)
        .map_err(BackendError::UnsupportedShape)?;
    let n = config.num_elements()?;
    let mut cast = vec![O::default(); n];
    let mut transposed = vec![O::default(); n];
    let mut dbias = vec![I::zero(); config.row_length];
    let mut workspace = vec![0.0f32; workspace_size_elements::<O>(config.row_length, config.num_rows)];

    cast_transpose_dbias(
        stream,
        config,
        input,
        scale,
        CastTransposeOutputs {
            cast: &mut cast,
            transposed: &mut transposed,
        },
        DbiasBuffers {
            dbias: &mut dbias,
            workspace: &mut workspace,
        },
        amax,
    )?;
    Ok(CastTransposeDbiasOutput {
        cast,
        transposed,
        dbias,
    })
}

/// Pick the kernel instantiation for the type pair's vector widths.
#[allow(clippy::too_many_arguments)]
fn dispatch<I: KernelFloat, O: Fp8Float, Op: CastOp>(
    stream: &Stream,
    config: &CastTransposeConfig,
    input: &[I],
    act: Option<&[I]>,
    scale: Option<f32>,
    outputs: CastTransposeOutputs<'_, O>,
    dbias: Option<DbiasBuffers<'_, I>>,
    amax: Option<&AtomicAmax>,
) -> BackendResult<()> {
    match (I::NVEC_IN, O::NVEC_OUT) {
        (2, 8) => launch_fused::<I, O, Op, 2, 8>(stream, config, input, act, scale, outputs, dbias, amax),
        (4, 8) => launch_fused::<I, O, Op, 4, 8>(stream, config, input, act, scale, outputs, dbias, amax),
        (nvec_in, nvec_out) => Err(BackendError::InvalidConfig(format!(
            "no {} kernel for {} -> {} ({nvec_in} x {nvec_out} vectors)",
            Op::NAME,
            I::TYPE_ID.name(),
            O::TYPE_ID.name()
        ))),
    }
}

#[allow(clippy::too_many_arguments)]
fn launch_fused<I, O, Op, const NI: usize, const NO: usize>(
    stream: &Stream,
    config: &CastTransposeConfig,
    input: &[I],
    act: Option<&[I]>,
    scale: Option<f32>,
    outputs: CastTransposeOutputs<'_, O>,
    dbias: Option<DbiasBuffers<'_, I>>,
    amax: Option<&AtomicAmax>,
) -> BackendResult<()>
where
    I: KernelFloat,
    O: Fp8Float,
    Op: CastOp,
{
    let CastTransposeConfig { row_length, num_rows } = *config;
    validate_cast_transpose_dims(row_length, num_rows, NI, NO).map_err(BackendError::UnsupportedShape)?;

    let n = config.num_elements()?;
    validate_input_len(input.len(), n, "input").map_err(BackendError::InvalidConfig)?;
    if let Some(act) = act {
        validate_input_len(act.len(), n, "gelu_input").map_err(BackendError::InvalidConfig)?;
    }
    validate_input_len(outputs.cast.len(), n, "cast output").map_err(BackendError::InvalidConfig)?;
    validate_input_len(outputs.transposed.len(), n, "transposed output").map_err(BackendError::InvalidConfig)?;

    let (dbias_out, mut workspace) = match dbias {
        Some(DbiasBuffers { dbias, workspace }) => {
            validate_input_len(dbias.len(), row_length, "dbias").map_err(BackendError::InvalidConfig)?;
            let required = workspace_size_elements::<O>(row_length, num_rows);
            if workspace.len() < required {
                return Err(BackendError::WorkspaceTooSmall {
                    required,
                    got: workspace.len(),
                });
            }
            (Some(dbias), Some(workspace))
        }
        None => (None, None),
    };

    if n == 0 {
        log::warn!("{}: empty {num_rows}x{row_length} matrix, nothing to launch", Op::NAME);
        if let Some(dbias) = dbias_out {
            dbias.fill(I::zero());
        }
        return Ok(());
    }

    let geometry = LaunchGeometry::new(row_length, num_rows, NI, NO);
    log::debug!(
        "{}: {num_rows}x{row_length} {} -> {}, {}x{} tiles, {} blocks, {}",
        Op::NAME,
        I::TYPE_ID.name(),
        O::TYPE_ID.name(),
        geometry.num_tiles_y,
        geometry.num_tiles_x,
        geometry.num_blocks,
        if geometry.aligned { "aligned" } else { "unaligned" }
    );

    let param = CastTransposeParam {
        input: DevicePtr::new(input),
        act_input: act.map(DevicePtr::new),
        output_c: DevicePtrMut::new(outputs.cast),
        output_t: DevicePtrMut::new(outputs.transposed),
        workspace: workspace.as_deref_mut().map(DevicePtrMut::new),
        scale,
        amax,
    };
    let launch_config = geometry.launch_config()?;
    let attributes = KernelAttributes {
        preferred_shared_carveout: Some(100),
        max_dynamic_shared_bytes: None,
    };
    // SAFETY: buffer lengths were checked above and tiles partition every
    // output and the workspace; amax is only touched atomically.
    unsafe {
        if geometry.aligned {
            let kernel = CastTransposeKernel::<I, O, Op, NI, NO, true>::new(param, row_length, num_rows);
            KernelLaunch::new(stream, launch_config).attributes(attributes).launch(&kernel)?;
        } else {
            let kernel = CastTransposeKernel::<I, O, Op, NI, NO, false>::new(param, row_length, num_rows);
            KernelLaunch::new(stream, launch_config).attributes(attributes).launch(&kernel)?;
        }
    }

    if let (Some(dbias), Some(workspace)) = (dbias_out, workspace) {
        let grid = ReduceDbiasKernel::<I, NI>::num_blocks(row_length);
        let reduce_config = LaunchConfig::linear(
            to_u32(grid, "reduce grid_dim").map_err(BackendError::InvalidConfig)?,
            REDUCE_DBIAS_NUM_THREADS,
        );
        log::trace!("reduce_dbias: {} partial rows, {grid} blocks", geometry.num_tiles_y);
        // SAFETY: dbias holds row_length elements and the workspace at
        // least num_tiles_y rows, all written by the main kernel queued
        // before on this stream.
        unsafe {
            let reduce = ReduceDbiasKernel::<I, NI>::new(
                DevicePtr::new(&*workspace),
                DevicePtrMut::new(dbias),
                row_length,
                geometry.num_tiles_y,
            );
            KernelLaunch::new(stream, reduce_config).launch(&reduce)?;
        }
    }
    Ok(())
}

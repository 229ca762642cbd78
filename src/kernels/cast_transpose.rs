//! Tile-parallel cast + transpose with per-tile partial dbias and block amax.
//!
//! Each tile covers `32 * NI` columns by `32 * NO` rows and is owned by
//! [`N_WARPS_PER_TILE`] warps. Warp `w` of a tile handles the row groups
//! `w * N_ITERATIONS .. (w + 1) * N_ITERATIONS`; on iteration `i` lane `l`
//! casts the `NO x NI` patch at row group `w * 8 + i` and column vector
//! `(l - w * 8 - i) mod 32`, so that a warp touches 32 distinct column
//! vectors per iteration. Loads of iteration `i + 1` are issued before the
//! cast of iteration `i` (double buffering).
//!
//! The transposed patches stay in registers until every warp of the tile is
//! done, then go through a padded `33 x 32` shared scratch per tile, one
//! `NI` column at a time, and come back out row-contiguous for `output_t`.

use std::marker::PhantomData;
use std::mem::size_of;

use crate::kernel_types::{Fp8Float, KernelFloat};
use crate::kernels::launch::{BlockContext, BlockKernel, DevicePtr, DevicePtrMut};
use crate::kernels::vec::SimdVec;
use crate::kernels::warp::{block_reduce_max, shfl_sync, AtomicAmax};
use crate::kernels::THREADS_PER_WARP;
use crate::ops::activations::dgelu_scalar;

pub const N_WARPS_PER_TILE: usize = 4;
pub const N_ITERATIONS: usize = THREADS_PER_WARP / N_WARPS_PER_TILE;
/// Two tiles per block.
pub const CAST_TRANSPOSE_NUM_THREADS: u32 = 256;

const THREADS_PER_TILE: usize = THREADS_PER_WARP * N_WARPS_PER_TILE;
/// Scratch row pitch in output vectors; the extra column staggers banks.
const SCRATCH_PITCH: usize = THREADS_PER_WARP + 1;

// ============================================================================
// Fused element ops
// ============================================================================

/// Per-element computation fused in front of the cast.
pub trait CastOp: Send + Sync + 'static {
    const NAME: &'static str;
    /// Reads a second matrix of the input's shape.
    const READS_ACT: bool;
    /// Produces per-tile partial column sums.
    const DBIAS: bool;

    fn compute(input: f32, act: f32) -> f32;
}

/// Plain cast + transpose.
#[derive(Debug, Clone, Copy)]
pub struct CastOnly;

/// Cast + transpose + column sums of the input.
#[derive(Debug, Clone, Copy)]
pub struct CastDbias;

/// `grad * dgelu(gelu_input)`, then cast + transpose + column sums.
#[derive(Debug, Clone, Copy)]
pub struct CastDbiasDgelu;

impl CastOp for CastOnly {
    const NAME: &'static str = "cast_transpose";
    const READS_ACT: bool = false;
    const DBIAS: bool = false;

    #[inline(always)]
    fn compute(input: f32, _act: f32) -> f32 {
        input
    }
}

impl CastOp for CastDbias {
    const NAME: &'static str = "cast_transpose_dbias";
    const READS_ACT: bool = false;
    const DBIAS: bool = true;

    #[inline(always)]
    fn compute(input: f32, _act: f32) -> f32 {
        input
    }
}

impl CastOp for CastDbiasDgelu {
    const NAME: &'static str = "cast_transpose_dbias_dgelu";
    const READS_ACT: bool = true;
    const DBIAS: bool = true;

    #[inline(always)]
    fn compute(grad: f32, gelu_input: f32) -> f32 {
        grad * dgelu_scalar(gelu_input)
    }
}

// ============================================================================
// Per-thread primitive
// ============================================================================

/// Forward-output location of one thread's patch.
#[derive(Clone, Copy)]
pub struct CastStore<'a, O> {
    pub output_c: DevicePtrMut<'a, O>,
    /// Vector offset of the patch's first row.
    pub place: usize,
    /// Row pitch in input vectors.
    pub stride: usize,
    /// The patch lies inside the matrix; ignored for full tiles.
    pub valid: bool,
}

/// Cast one `NO x NI` patch held in registers.
///
/// Every element goes through `Op`, is scaled and narrowed, then written to
/// the forward row vector and to `out_trans` at swapped coordinates. `amax`
/// tracks the largest pre-scale magnitude. Returns the pre-scale column sums
/// of the patch. Forward rows are stored only for full tiles or valid
/// patches; `out_trans` is register staging only.
///
/// # Safety
/// When a row is stored, the `NO` row vectors starting at `store.place`
/// with pitch `store.stride` must lie inside `store.output_c` and belong to
/// no other thread.
#[inline(always)]
pub unsafe fn cast_and_transpose_regs<I, O, Op, const NI: usize, const NO: usize, const FULL_TILE: bool>(
    input: &[SimdVec<I, NI>; NO],
    act: &[SimdVec<I, NI>; NO],
    scale: f32,
    out_trans: &mut [SimdVec<O, NO>; NI],
    amax: &mut f32,
    store: CastStore<'_, O>,
) -> SimdVec<f32, NI>
where
    I: KernelFloat,
    O: Fp8Float,
    Op: CastOp,
{
    let mut step_dbias = SimdVec::<f32, NI>::zeroed();
    for i in 0..NO {
        let mut out_c = SimdVec::<O, NI>::zeroed();
        for j in 0..NI {
            let act_v = if Op::READS_ACT { act[i][j].to_f32() } else { 0.0 };
            let tmp = Op::compute(input[i][j].to_f32(), act_v);
            let elt = O::from_f32(scale * tmp);
            out_c[j] = elt;
            out_trans[j][i] = elt;
            if Op::DBIAS {
                step_dbias[j] += tmp;
            }
            *amax = amax.max(tmp.abs());
        }
        if FULL_TILE || store.valid {
            // SAFETY: guaranteed by the caller.
            unsafe { out_c.store_to(store.output_c, store.place + store.stride * i) };
        }
    }
    step_dbias
}

// ============================================================================
// Kernel
// ============================================================================

/// Global buffers of one fused launch.
pub struct CastTransposeParam<'a, I, O> {
    pub input: DevicePtr<'a, I>,
    /// GELU input, read only by ops with `READS_ACT`.
    pub act_input: Option<DevicePtr<'a, I>>,
    pub output_c: DevicePtrMut<'a, O>,
    pub output_t: DevicePtrMut<'a, O>,
    /// `num_tiles_y x row_length` partial sums, written by ops with `DBIAS`.
    pub workspace: Option<DevicePtrMut<'a, f32>>,
    pub scale: Option<f32>,
    pub amax: Option<&'a AtomicAmax>,
}

#[derive(Debug, Clone, Copy)]
struct Tile {
    /// Element offset of the tile in `input` / `output_c`.
    input_base: usize,
    /// Element offset of the tile in `output_t`.
    output_t_base: usize,
    /// Element offset of the tile row in the workspace.
    workspace_base: usize,
    /// Valid column vectors (32 for full tiles).
    length: usize,
    /// Valid row groups (32 for full tiles).
    height: usize,
}

#[derive(Clone, Copy)]
struct ThreadRegs<I, O, const NI: usize, const NO: usize> {
    input: [[SimdVec<I, NI>; NO]; 2],
    act: [[SimdVec<I, NI>; NO]; 2],
    out_space: [[SimdVec<O, NO>; NI]; N_ITERATIONS],
    partial_dbias: SimdVec<f32, NI>,
    amax: f32,
}

impl<I: KernelFloat, O: Fp8Float, const NI: usize, const NO: usize> ThreadRegs<I, O, NI, NO> {
    fn zeroed() -> Self {
        Self {
            input: [[SimdVec::zeroed(); NO]; 2],
            act: [[SimdVec::zeroed(); NO]; 2],
            out_space: [[SimdVec::zeroed(); NI]; N_ITERATIONS],
            partial_dbias: SimdVec::zeroed(),
            amax: 0.0,
        }
    }
}

/// Fused cast-transpose kernel over `num_rows x row_length`.
///
/// `ALIGNED` drops every bounds check and requires the matrix to be an exact
/// multiple of the tile; the unaligned variant clears invalid loads and
/// skips invalid stores.
pub struct CastTransposeKernel<'a, I, O, Op, const NI: usize, const NO: usize, const ALIGNED: bool> {
    param: CastTransposeParam<'a, I, O>,
    row_length: usize,
    num_rows: usize,
    num_tiles_x: usize,
    num_tiles: usize,
    _op: PhantomData<fn() -> Op>,
}

impl<'a, I, O, Op, const NI: usize, const NO: usize, const ALIGNED: bool>
    CastTransposeKernel<'a, I, O, Op, NI, NO, ALIGNED>
where
    I: KernelFloat,
    O: Fp8Float,
    Op: CastOp,
{
    /// # Safety
    /// `input` (and `act_input`), `output_c` and `output_t` must hold
    /// `row_length * num_rows` elements, and `workspace`
    /// `ceil(num_rows / (32 * NO)) * row_length`. With `ALIGNED` both
    /// dimensions must be whole tiles. Blocks of the kernel write through
    /// these views without further checks.
    pub unsafe fn new(param: CastTransposeParam<'a, I, O>, row_length: usize, num_rows: usize) -> Self {
        let tile_cols = NI * THREADS_PER_WARP;
        let tile_rows = NO * THREADS_PER_WARP;
        let (num_tiles_x, num_tiles_y) = if ALIGNED {
            (row_length / tile_cols, num_rows / tile_rows)
        } else {
            (row_length.div_ceil(tile_cols), num_rows.div_ceil(tile_rows))
        };
        Self {
            param,
            row_length,
            num_rows,
            num_tiles_x,
            num_tiles: num_tiles_x * num_tiles_y,
            _op: PhantomData,
        }
    }

    pub fn num_tiles(&self) -> usize {
        self.num_tiles
    }

    fn tile(&self, tile_id: usize) -> Option<Tile> {
        if tile_id >= self.num_tiles {
            return None;
        }
        let id_x = tile_id % self.num_tiles_x;
        let id_y = tile_id / self.num_tiles_x;
        let (length, height) = if ALIGNED {
            (THREADS_PER_WARP, THREADS_PER_WARP)
        } else {
            let stride = self.row_length / NI;
            let output_stride = self.num_rows / NO;
            (
                (stride - id_x * THREADS_PER_WARP).min(THREADS_PER_WARP),
                (output_stride - id_y * THREADS_PER_WARP).min(THREADS_PER_WARP),
            )
        };
        Some(Tile {
            input_base: (id_x * NI + id_y * self.row_length * NO) * THREADS_PER_WARP,
            output_t_base: (id_y * NO + id_x * self.num_rows * NI) * THREADS_PER_WARP,
            workspace_base: id_x * NI * THREADS_PER_WARP + id_y * self.row_length,
            length,
            height,
        })
    }

    #[inline(always)]
    fn load_group(
        &self,
        tile: &Tile,
        input: &mut [SimdVec<I, NI>; NO],
        act: &mut [SimdVec<I, NI>; NO],
        place: usize,
        valid: bool,
    ) {
        let stride = self.row_length / NI;
        let src = self.param.input.offset(tile.input_base);
        let act_src = self.param.act_input.map(|p| p.offset(tile.input_base));
        for j in 0..NO {
            if ALIGNED || valid {
                // SAFETY: valid positions lie inside the tile's rows.
                unsafe { input[j].load_from(src, place + stride * j) };
            } else {
                input[j].clear();
            }
            if Op::READS_ACT {
                match act_src {
                    Some(act_src) if ALIGNED || valid => unsafe { act[j].load_from(act_src, place + stride * j) },
                    _ => act[j].clear(),
                }
            }
        }
    }

    /// LOAD and CAST_TRANSPOSE phases of one warp.
    fn cast_warp(&self, tile: &Tile, warp_in_tile: usize, scale: f32, lanes: &mut [ThreadRegs<I, O, NI, NO>]) {
        let stride = self.row_length / NI;
        let first_group = warp_in_tile * N_ITERATIONS;
        let output_c = self.param.output_c.offset(tile.input_base);

        let mut my_place: [usize; THREADS_PER_WARP] =
            std::array::from_fn(|lane| (lane + THREADS_PER_WARP - first_group) % THREADS_PER_WARP);
        let mut current_stride = first_group * NO * stride;

        for (lane, regs) in lanes.iter_mut().enumerate() {
            let valid = my_place[lane] < tile.length && first_group < tile.height;
            self.load_group(tile, &mut regs.input[0], &mut regs.act[0], current_stride + my_place[lane], valid);
        }

        for i in 0..N_ITERATIONS {
            let current_in = (i + 1) % 2;
            let mut step = [SimdVec::<f32, NI>::zeroed(); THREADS_PER_WARP];
            for (lane, regs) in lanes.iter_mut().enumerate() {
                let place = my_place[lane];
                let place_in = (place + THREADS_PER_WARP - 1) % THREADS_PER_WARP;
                if i < N_ITERATIONS - 1 {
                    let valid = place_in < tile.length && first_group + i + 1 < tile.height;
                    self.load_group(
                        tile,
                        &mut regs.input[current_in],
                        &mut regs.act[current_in],
                        current_stride + place_in + stride * NO,
                        valid,
                    );
                }
                let store = CastStore {
                    output_c,
                    place: current_stride + place,
                    stride,
                    valid: place < tile.length && first_group + i < tile.height,
                };
                let mut out_trans = [SimdVec::<O, NO>::zeroed(); NI];
                // SAFETY: the patch lies in this tile's rows, valid unless
                // the tile is partial and `store.valid` is false; the
                // constructor's contract covers the tile.
                step[lane] = unsafe {
                    cast_and_transpose_regs::<I, O, Op, NI, NO, ALIGNED>(
                        &regs.input[current_in ^ 1],
                        &regs.act[current_in ^ 1],
                        scale,
                        &mut out_trans,
                        &mut regs.amax,
                        store,
                    )
                };
                regs.out_space[i] = out_trans;
                my_place[lane] = place_in;
            }
            current_stride += NO * stride;

            if Op::DBIAS {
                // route each column group's sum to the lane that owns it
                let shuffled = shfl_sync(&step, |lane| lane + i + first_group);
                for (regs, part) in lanes.iter_mut().zip(shuffled) {
                    regs.partial_dbias += part;
                }
            }
        }
    }

    /// SHARED_EXCHANGE and STORE_TRANSPOSED for one `NI` column.
    fn transpose_column(
        &self,
        block: &mut BlockContext,
        tiles: &[Option<Tile>],
        regs: &[ThreadRegs<I, O, NI, NO>],
        scratch: &mut [SimdVec<O, NO>],
        column: usize,
    ) {
        let output_stride = self.num_rows / NO;

        for (t, tile) in tiles.iter().enumerate() {
            if tile.is_none() {
                continue;
            }
            for warp_in_tile in 0..N_WARPS_PER_TILE {
                for lane in 0..THREADS_PER_WARP {
                    let thread = (t * N_WARPS_PER_TILE + warp_in_tile) * THREADS_PER_WARP + lane;
                    let row = (lane + t * THREADS_PER_WARP) * SCRATCH_PITCH;
                    for j in 0..N_ITERATIONS {
                        let col = (lane + THREADS_PER_WARP - j - warp_in_tile * N_ITERATIONS) % THREADS_PER_WARP;
                        scratch[row + col] = regs[thread].out_space[j][column];
                    }
                }
            }
        }
        block.sync_threads();

        for (t, tile) in tiles.iter().enumerate() {
            let Some(tile) = tile else { continue };
            let output_t = self.param.output_t.offset(tile.output_t_base);
            for warp_in_tile in 0..N_WARPS_PER_TILE {
                let first_group = warp_in_tile * N_ITERATIONS;
                for lane in 0..THREADS_PER_WARP {
                    let row = (lane + t * THREADS_PER_WARP) * SCRATCH_PITCH;
                    let mut my_place = (lane + THREADS_PER_WARP - first_group) % THREADS_PER_WARP;
                    let mut current_stride = column * output_stride + first_group * output_stride * NI;
                    for j in 0..N_ITERATIONS {
                        if ALIGNED || (my_place < tile.height && first_group + j < tile.length) {
                            // SAFETY: one writer per transposed vector.
                            unsafe { scratch[row + j + first_group].store_to(output_t, current_stride + my_place) };
                        }
                        my_place = (my_place + THREADS_PER_WARP - 1) % THREADS_PER_WARP;
                        current_stride += output_stride * NI;
                    }
                }
            }
        }
        block.sync_threads();
    }

    /// PARTIAL_BIAS_REDUCE: warp 0 of each tile sums the tile's four warps.
    fn reduce_partial_dbias(
        &self,
        block: &mut BlockContext,
        tiles: &[Option<Tile>],
        regs: &[ThreadRegs<I, O, NI, NO>],
        dbias_scratch: &mut [SimdVec<f32, NI>],
    ) {
        for (slot, r) in dbias_scratch.iter_mut().zip(regs) {
            *slot = r.partial_dbias;
        }
        block.sync_threads();

        let Some(workspace) = self.param.workspace else {
            return;
        };
        for (t, tile) in tiles.iter().enumerate() {
            let Some(tile) = tile else { continue };
            let ws = workspace.offset(tile.workspace_base);
            for lane in 0..THREADS_PER_WARP {
                let tid = t * THREADS_PER_TILE + lane;
                let mut acc = dbias_scratch[tid];
                for w in 1..N_WARPS_PER_TILE {
                    acc += dbias_scratch[tid + w * THREADS_PER_WARP];
                }
                if ALIGNED || lane < tile.length {
                    // SAFETY: tiles partition the workspace columns of a row tile.
                    unsafe { acc.store_to(ws, lane) };
                }
            }
        }
    }
}

impl<I, O, Op, const NI: usize, const NO: usize, const ALIGNED: bool> BlockKernel
    for CastTransposeKernel<'_, I, O, Op, NI, NO, ALIGNED>
where
    I: KernelFloat,
    O: Fp8Float,
    Op: CastOp,
{
    const NAME: &'static str = Op::NAME;

    fn shared_mem_bytes(&self, block_dim: u32) -> usize {
        let threads = block_dim as usize;
        let tiles = threads / THREADS_PER_TILE;
        let transpose = tiles * THREADS_PER_WARP * SCRATCH_PITCH * size_of::<SimdVec<O, NO>>();
        let dbias = if Op::DBIAS { threads * size_of::<SimdVec<f32, NI>>() } else { 0 };
        let amax = threads / THREADS_PER_WARP * size_of::<f32>();
        transpose + dbias + amax
    }

    fn check_block_dim(&self, block_dim: u32) -> Result<(), String> {
        if block_dim as usize % THREADS_PER_TILE != 0 {
            return Err(format!("block_dim {block_dim} is not a multiple of {THREADS_PER_TILE} (one tile)"));
        }
        Ok(())
    }

    fn run_block(&self, block: &mut BlockContext) {
        let block_dim = block.block_dim as usize;
        let tiles_per_block = block_dim / THREADS_PER_TILE;
        let first_tile = block.block_idx as usize * tiles_per_block;
        let scale = self.param.scale.unwrap_or(1.0);

        let mut scratch = block.shared_array::<SimdVec<O, NO>>(tiles_per_block * THREADS_PER_WARP * SCRATCH_PITCH);
        let mut dbias_scratch = if Op::DBIAS {
            block.shared_array::<SimdVec<f32, NI>>(block_dim)
        } else {
            Vec::new()
        };
        let mut amax_staging = block.shared_array::<f32>(block.num_warps());

        let tiles: Vec<Option<Tile>> = (0..tiles_per_block).map(|t| self.tile(first_tile + t)).collect();
        let mut regs = vec![ThreadRegs::<I, O, NI, NO>::zeroed(); block_dim];

        for (t, tile) in tiles.iter().enumerate() {
            let Some(tile) = tile else { continue };
            for warp_in_tile in 0..N_WARPS_PER_TILE {
                let first = (t * N_WARPS_PER_TILE + warp_in_tile) * THREADS_PER_WARP;
                self.cast_warp(tile, warp_in_tile, scale, &mut regs[first..first + THREADS_PER_WARP]);
            }
        }

        for column in 0..NI {
            self.transpose_column(block, &tiles, &regs, &mut scratch, column);
        }

        if Op::DBIAS {
            self.reduce_partial_dbias(block, &tiles, &regs, &mut dbias_scratch);
        }

        let thread_max: Vec<f32> = regs.iter().map(|r| r.amax).collect();
        let block_max = block_reduce_max(&thread_max, &mut amax_staging, block);
        if let Some(amax) = self.param.amax {
            amax.fetch_max(block_max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fp8::Fp8E4M3;

    fn patch(values: impl Fn(usize, usize) -> f32) -> [SimdVec<f32, 2>; 8] {
        std::array::from_fn(|i| SimdVec {
            elt: std::array::from_fn(|j| values(i, j)),
        })
    }

    #[test]
    fn primitive_writes_forward_and_transposed() {
        let input = patch(|i, j| (i * 2 + j) as f32 - 4.0);
        let act = [SimdVec::zeroed(); 8];
        let mut out = vec![Fp8E4M3::ZERO; 32];
        let mut out_trans = [SimdVec::zeroed(); 2];
        let mut amax = 0.0;
        let store = CastStore {
            output_c: DevicePtrMut::new(&mut out),
            place: 0,
            stride: 2,
            valid: false,
        };
        let step = unsafe {
            cast_and_transpose_regs::<f32, Fp8E4M3, CastDbias, 2, 8, true>(
                &input, &act, 0.5, &mut out_trans, &mut amax, store,
            )
        };

        for i in 0..8 {
            for j in 0..2 {
                let expect = Fp8E4M3::from_f32(0.5 * input[i][j]);
                assert_eq!(out[i * 4 + j], expect);
                assert_eq!(out_trans[j][i], expect);
            }
            // odd vectors of each row are untouched
            assert_eq!(out[i * 4 + 2], Fp8E4M3::ZERO);
        }
        // column j holds -4 + j, -2 + j, ..., 10 + j
        assert_eq!(step.elt, [24.0, 32.0]);
        assert_eq!(amax, 11.0);
    }

    #[test]
    fn primitive_skips_invalid_stores_on_partial_tiles() {
        let input = patch(|_, _| 3.0);
        let act = [SimdVec::zeroed(); 8];
        let mut out = vec![Fp8E4M3::ZERO; 16];
        let mut out_trans = [SimdVec::zeroed(); 2];
        let mut amax = 0.0;
        let store = CastStore {
            output_c: DevicePtrMut::new(&mut out),
            place: 0,
            stride: 1,
            valid: false,
        };
        unsafe {
            cast_and_transpose_regs::<f32, Fp8E4M3, CastOnly, 2, 8, false>(
                &input, &act, 1.0, &mut out_trans, &mut amax, store,
            )
        };
        assert!(out.iter().all(|&v| v == Fp8E4M3::ZERO));
        assert_eq!(out_trans[1][7], Fp8E4M3::from_f32(3.0));
        assert_eq!(amax, 3.0);
    }

    #[test]
    fn dgelu_op_multiplies_by_the_derivative() {
        assert_eq!(CastDbiasDgelu::compute(2.0, 0.0), 1.0);
        assert_eq!(CastDbias::compute(2.0, 5.0), 2.0);
    }

    #[test]
    fn shared_budget_fits_the_default_device() {
        let mut out_c = vec![Fp8E4M3::ZERO; 0];
        let mut out_t = vec![Fp8E4M3::ZERO; 0];
        // SAFETY: an empty matrix over empty buffers.
        let kernel = unsafe {
            CastTransposeKernel::<half::f16, Fp8E4M3, CastDbias, 4, 8, true>::new(
                CastTransposeParam {
                    input: DevicePtr::new(&[]),
                    act_input: None,
                    output_c: DevicePtrMut::new(&mut out_c),
                    output_t: DevicePtrMut::new(&mut out_t),
                    workspace: None,
                    scale: None,
                    amax: None,
                },
                0,
                0,
            )
        };
        let bytes = kernel.shared_mem_bytes(CAST_TRANSPOSE_NUM_THREADS);
        // 2 tiles * 33 * 32 * 8 B + 256 * 16 B + 8 * 4 B
        assert_eq!(bytes, 16896 + 4096 + 32);
        assert!(bytes <= 48 * 1024);
        assert!(kernel.check_block_dim(192).is_err());
        assert_eq!(kernel.num_tiles(), 0);
    }
}

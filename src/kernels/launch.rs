//! Block-level kernel launch on the host SIMT model.
//!
//! A launch validates its configuration against the device limits, takes
//! the stream lock, then runs every block of the grid on the device pool.
//! Threads inside a block are executed by the block's own code as lockstep
//! warps; [`BlockContext::sync_threads`] marks the barrier between phases.

use std::marker::PhantomData;
use std::mem::size_of;

use rayon::prelude::*;

use crate::device::Stream;
use crate::error::{BackendError, BackendResult};
use crate::kernels::THREADS_PER_WARP;

/// 1-D launch geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid_dim: u32,
    pub block_dim: u32,
    /// Dynamic shared memory requested on top of the kernel's static usage.
    pub shared_mem_bytes: u32,
}

impl LaunchConfig {
    pub fn linear(grid_dim: u32, block_dim: u32) -> Self {
        Self {
            grid_dim,
            block_dim,
            shared_mem_bytes: 0,
        }
    }
}

/// Per-kernel function attributes applied before a launch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelAttributes {
    /// Preferred share of on-chip memory used as shared memory, in percent.
    pub preferred_shared_carveout: Option<u32>,
    /// Raised dynamic shared memory limit (opt-in).
    pub max_dynamic_shared_bytes: Option<u32>,
}

/// A kernel executed one block at a time.
pub trait BlockKernel: Sync {
    const NAME: &'static str;

    /// Static shared memory one block declares.
    fn shared_mem_bytes(&self, block_dim: u32) -> usize;

    /// Kernel-specific block shape requirements.
    fn check_block_dim(&self, _block_dim: u32) -> Result<(), String> {
        Ok(())
    }

    /// Global accesses rely on the bounds the kernel's `unsafe`
    /// constructor was given.
    fn run_block(&self, block: &mut BlockContext);
}

/// Block coordinates and block-shared resources.
#[derive(Debug)]
pub struct BlockContext {
    pub block_idx: u32,
    pub block_dim: u32,
    pub grid_dim: u32,
    shared_budget: usize,
    shared_used: usize,
    barriers: usize,
}

impl BlockContext {
    pub fn new(block_idx: u32, block_dim: u32, grid_dim: u32, shared_budget: usize) -> Self {
        Self {
            block_idx,
            block_dim,
            grid_dim,
            shared_budget,
            shared_used: 0,
            barriers: 0,
        }
    }

    #[inline]
    pub fn num_warps(&self) -> usize {
        self.block_dim as usize / THREADS_PER_WARP
    }

    /// Carve a zero-initialized region out of the block's shared memory.
    pub fn shared_array<T: Copy + Default>(&mut self, len: usize) -> Vec<T> {
        self.shared_used += len * size_of::<T>();
        debug_assert!(
            self.shared_used <= self.shared_budget,
            "shared memory overflow: {} > {}",
            self.shared_used,
            self.shared_budget
        );
        vec![T::default(); len]
    }

    /// Block-wide barrier: every write issued before is visible after.
    #[inline]
    pub fn sync_threads(&mut self) {
        self.barriers += 1;
    }

    pub fn barriers(&self) -> usize {
        self.barriers
    }

    pub fn shared_used(&self) -> usize {
        self.shared_used
    }
}

/// Read-only view of a global buffer shared by every block of a launch.
pub struct DevicePtr<'a, T> {
    ptr: *const T,
    len: usize,
    _marker: PhantomData<&'a [T]>,
}

impl<T> Clone for DevicePtr<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DevicePtr<'_, T> {}

// SAFETY: a DevicePtr only hands out reads of `T: Sync` data it borrows.
unsafe impl<T: Sync> Send for DevicePtr<'_, T> {}
unsafe impl<T: Sync> Sync for DevicePtr<'_, T> {}

impl<'a, T> DevicePtr<'a, T> {
    pub fn new(slice: &'a [T]) -> Self {
        Self {
            ptr: slice.as_ptr(),
            len: slice.len(),
            _marker: PhantomData,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View starting `count` elements further.
    #[inline(always)]
    pub fn offset(self, count: usize) -> Self {
        Self {
            ptr: self.ptr.wrapping_add(count),
            len: self.len.saturating_sub(count),
            _marker: PhantomData,
        }
    }

    /// # Safety
    /// `idx + N` must not exceed the view.
    #[inline(always)]
    pub unsafe fn read_array<const N: usize>(&self, idx: usize) -> [T; N]
    where
        T: Copy,
    {
        debug_assert!(idx + N <= self.len, "read [{idx}, {}) past {}", idx + N, self.len);
        self.ptr.add(idx).cast::<[T; N]>().read_unaligned()
    }
}

/// Writable view of a global buffer. Copies alias; the launching code
/// guarantees that no two threads touch the same element.
pub struct DevicePtrMut<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

impl<T> Clone for DevicePtrMut<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DevicePtrMut<'_, T> {}

// SAFETY: element accesses are disjoint across threads by launch contract.
unsafe impl<T: Send> Send for DevicePtrMut<'_, T> {}
unsafe impl<T: Send> Sync for DevicePtrMut<'_, T> {}

impl<'a, T> DevicePtrMut<'a, T> {
    pub fn new(slice: &'a mut [T]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
            _marker: PhantomData,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    pub fn offset(self, count: usize) -> Self {
        Self {
            ptr: self.ptr.wrapping_add(count),
            len: self.len.saturating_sub(count),
            _marker: PhantomData,
        }
    }

    /// # Safety
    /// `idx + N` must not exceed the view and no other thread may access
    /// these elements during the launch.
    #[inline(always)]
    pub unsafe fn write_array<const N: usize>(&self, idx: usize, values: [T; N]) {
        debug_assert!(idx + N <= self.len, "write [{idx}, {}) past {}", idx + N, self.len);
        self.ptr.add(idx).cast::<[T; N]>().write_unaligned(values)
    }
}

/// Builder for one kernel launch on a stream.
pub struct KernelLaunch<'a> {
    stream: &'a Stream,
    config: LaunchConfig,
    attributes: KernelAttributes,
}

impl<'a> KernelLaunch<'a> {
    pub fn new(stream: &'a Stream, config: LaunchConfig) -> Self {
        Self {
            stream,
            config,
            attributes: KernelAttributes::default(),
        }
    }

    pub fn attributes(mut self, attributes: KernelAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Check the configuration against the device limits without running.
    pub fn validate<K: BlockKernel>(&self, kernel: &K) -> BackendResult<()> {
        let limits = self.stream.device().config();
        let LaunchConfig {
            grid_dim,
            block_dim,
            shared_mem_bytes,
        } = self.config;

        if grid_dim == 0 {
            return Err(BackendError::launch(K::NAME, "grid_dim is 0"));
        }
        if block_dim == 0 || block_dim as usize % THREADS_PER_WARP != 0 {
            return Err(BackendError::launch(
                K::NAME,
                format!("block_dim {block_dim} is not a positive multiple of {THREADS_PER_WARP}"),
            ));
        }
        if block_dim > limits.max_threads_per_block {
            return Err(BackendError::launch(
                K::NAME,
                format!(
                    "block_dim {block_dim} exceeds the device limit {}",
                    limits.max_threads_per_block
                ),
            ));
        }
        kernel
            .check_block_dim(block_dim)
            .map_err(|reason| BackendError::launch(K::NAME, reason))?;

        if let Some(carveout) = self.attributes.preferred_shared_carveout {
            if carveout > 100 {
                return Err(BackendError::launch(
                    K::NAME,
                    format!("shared memory carve-out {carveout}% above 100%"),
                ));
            }
        }

        let static_bytes = kernel.shared_mem_bytes(block_dim);
        if static_bytes > limits.max_shared_memory_per_block {
            return Err(BackendError::launch(
                K::NAME,
                format!(
                    "static shared memory {static_bytes} B exceeds {} B",
                    limits.max_shared_memory_per_block
                ),
            ));
        }
        let dynamic_limit = match self.attributes.max_dynamic_shared_bytes {
            Some(optin) => {
                if static_bytes + optin as usize > limits.max_shared_memory_per_block_optin {
                    return Err(BackendError::launch(
                        K::NAME,
                        format!(
                            "opt-in shared memory {} B exceeds {} B",
                            static_bytes + optin as usize,
                            limits.max_shared_memory_per_block_optin
                        ),
                    ));
                }
                optin as usize
            }
            None => limits.max_shared_memory_per_block - static_bytes,
        };
        if shared_mem_bytes as usize > dynamic_limit {
            return Err(BackendError::launch(
                K::NAME,
                format!("dynamic shared memory {shared_mem_bytes} B exceeds {dynamic_limit} B"),
            ));
        }
        Ok(())
    }

    /// Run every block of the grid and wait for completion.
    ///
    /// # Safety
    /// The kernel's global writes must be in bounds and disjoint across
    /// threads of the launch.
    pub unsafe fn launch<K: BlockKernel>(self, kernel: &K) -> BackendResult<()> {
        self.validate(kernel)?;
        let _guard = self.stream.lock()?;

        let LaunchConfig {
            grid_dim,
            block_dim,
            shared_mem_bytes,
        } = self.config;
        let shared_budget = kernel.shared_mem_bytes(block_dim) + shared_mem_bytes as usize;
        log::trace!(
            "launch {} on stream {}: grid {} x block {}, {} B shared, carve-out {:?}",
            K::NAME,
            self.stream.id(),
            grid_dim,
            block_dim,
            shared_budget,
            self.attributes.preferred_shared_carveout
        );

        self.stream.device().install(|| {
            (0..grid_dim).into_par_iter().for_each(|block_idx| {
                let mut block = BlockContext::new(block_idx, block_dim, grid_dim, shared_budget);
                kernel.run_block(&mut block);
            })
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::device::{Device, DeviceConfig};

    struct CountBlocks<'a> {
        seen: &'a AtomicUsize,
        out: DevicePtrMut<'a, u32>,
        shared: usize,
    }

    impl BlockKernel for CountBlocks<'_> {
        const NAME: &'static str = "count_blocks";

        fn shared_mem_bytes(&self, _block_dim: u32) -> usize {
            self.shared
        }

        fn run_block(&self, block: &mut BlockContext) {
            self.seen.fetch_add(1, Ordering::Relaxed);
            unsafe { self.out.write_array::<1>(block.block_idx as usize, [block.block_dim]) };
        }
    }

    fn stream() -> Stream {
        Device::new(DeviceConfig {
            num_threads: 2,
            ..DeviceConfig::default()
        })
        .unwrap()
        .new_stream()
    }

    #[test]
    fn runs_every_block_once() {
        let stream = stream();
        let seen = AtomicUsize::new(0);
        let mut out = vec![0u32; 7];
        let kernel = CountBlocks {
            seen: &seen,
            out: DevicePtrMut::new(&mut out),
            shared: 0,
        };
        unsafe { KernelLaunch::new(&stream, LaunchConfig::linear(7, 64)).launch(&kernel) }.unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 7);
        assert_eq!(out, vec![64; 7]);
    }

    #[test]
    fn rejects_invalid_configurations() {
        let stream = stream();
        let seen = AtomicUsize::new(0);
        let mut out = vec![0u32; 1];
        let kernel = CountBlocks {
            seen: &seen,
            out: DevicePtrMut::new(&mut out),
            shared: 0,
        };
        let bad = [
            LaunchConfig::linear(0, 32),
            LaunchConfig::linear(1, 0),
            LaunchConfig::linear(1, 48),
            LaunchConfig::linear(1, 2048),
            LaunchConfig {
                shared_mem_bytes: 64 * 1024,
                ..LaunchConfig::linear(1, 32)
            },
        ];
        for config in bad {
            let err = KernelLaunch::new(&stream, config).validate(&kernel).unwrap_err();
            assert!(matches!(err, BackendError::InvalidLaunch { kernel: "count_blocks", .. }), "{config:?}");
        }
        let carveout = KernelAttributes {
            preferred_shared_carveout: Some(101),
            ..KernelAttributes::default()
        };
        assert!(KernelLaunch::new(&stream, LaunchConfig::linear(1, 32))
            .attributes(carveout)
            .validate(&kernel)
            .is_err());
        assert_eq!(seen.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn opt_in_raises_dynamic_shared_limit() {
        let stream = stream();
        let seen = AtomicUsize::new(0);
        let mut out = vec![0u32; 1];
        let kernel = CountBlocks {
            seen: &seen,
            out: DevicePtrMut::new(&mut out),
            shared: 16 * 1024,
        };
        let config = LaunchConfig {
            shared_mem_bytes: 64 * 1024,
            ..LaunchConfig::linear(1, 32)
        };
        assert!(KernelLaunch::new(&stream, config).validate(&kernel).is_err());
        let optin = KernelAttributes {
            max_dynamic_shared_bytes: Some(64 * 1024),
            ..KernelAttributes::default()
        };
        assert!(KernelLaunch::new(&stream, config).attributes(optin).validate(&kernel).is_ok());
        let too_much = KernelAttributes {
            max_dynamic_shared_bytes: Some(220 * 1024),
            ..KernelAttributes::default()
        };
        assert!(KernelLaunch::new(&stream, config).attributes(too_much).validate(&kernel).is_err());
    }

    #[test]
    fn shared_arrays_are_zeroed_and_accounted() {
        let mut block = BlockContext::new(0, 64, 1, 1024);
        let a = block.shared_array::<f32>(16);
        let b = block.shared_array::<u8>(8);
        assert!(a.iter().all(|&v| v == 0.0));
        assert_eq!(b.len(), 8);
        assert_eq!(block.shared_used(), 72);
        assert_eq!(block.num_warps(), 2);
        block.sync_threads();
        assert_eq!(block.barriers(), 1);
    }

    #[test]
    fn device_ptr_offsets_shrink_the_view() {
        let data: Vec<u16> = (0..16).collect();
        let ptr = DevicePtr::new(&data).offset(4);
        assert_eq!(ptr.len(), 12);
        assert_eq!(unsafe { ptr.read_array::<4>(2) }, [6, 7, 8, 9]);
        assert!(DevicePtr::new(&data).offset(20).is_empty());
    }
}

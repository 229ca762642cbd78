use std::ops::{AddAssign, Index, IndexMut};

use crate::kernels::launch::{DevicePtr, DevicePtrMut};

/// `N` contiguous elements held in registers and moved as one transaction.
///
/// Offsets passed to `load_from`/`store_to` count whole vectors, not
/// elements. There is no bounds checking beyond debug assertions; callers
/// skip the call for positions outside the matrix.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimdVec<T, const N: usize> {
    pub elt: [T; N],
}

impl<T: Copy + Default, const N: usize> SimdVec<T, N> {
    #[inline(always)]
    pub fn zeroed() -> Self {
        Self { elt: [T::default(); N] }
    }

    #[inline(always)]
    pub fn clear(&mut self) {
        self.elt = [T::default(); N];
    }

    /// # Safety
    /// Vector `idx` must lie inside `base`.
    #[inline(always)]
    pub unsafe fn load_from(&mut self, base: DevicePtr<'_, T>, idx: usize) {
        self.elt = base.read_array::<N>(idx * N);
    }

    /// # Safety
    /// Vector `idx` must lie inside `base` and be owned by the calling thread.
    #[inline(always)]
    pub unsafe fn store_to(&self, base: DevicePtrMut<'_, T>, idx: usize) {
        base.write_array::<N>(idx * N, self.elt);
    }
}

impl<T: Copy + Default, const N: usize> Default for SimdVec<T, N> {
    #[inline(always)]
    fn default() -> Self {
        Self::zeroed()
    }
}

impl<const N: usize> AddAssign for SimdVec<f32, N> {
    #[inline(always)]
    fn add_assign(&mut self, rhs: Self) {
        for (a, b) in self.elt.iter_mut().zip(rhs.elt) {
            *a += b;
        }
    }
}

impl<T, const N: usize> Index<usize> for SimdVec<T, N> {
    type Output = T;

    #[inline(always)]
    fn index(&self, i: usize) -> &T {
        &self.elt[i]
    }
}

impl<T, const N: usize> IndexMut<usize> for SimdVec<T, N> {
    #[inline(always)]
    fn index_mut(&mut self, i: usize) -> &mut T {
        &mut self.elt[i]
    }
}

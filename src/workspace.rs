//! The estimator's owned scratch buffers and their init/ensure/finalize
//! lifecycle.
//!
//! Rust's ordinary `Drop` would make "finalize" implicit, but re-entering
//! `init` on a live context, and double-`finalize`, are *programming
//! errors* with an explicit lifecycle - not resource leaks or
//! use-after-free bugs that `Drop` would silently paper over. We model that
//! with an explicit [`WorkspaceState`] and panic on misuse, the same way a
//! systems crate would assert an internal invariant rather than return a
//! `Result` for what is, by definition, a caller bug.

use crate::error::EstimatorError;
use crate::nr::NrTable;
use crate::types::Point2f;

/// A heap buffer of `f32` aligned to at least 16 bytes, for vectorized
/// load/store of the packed-point and LM scratch arrays.
pub(crate) struct AlignedF32Buf {
    ptr: *mut f32,
    len: usize,
    cap: usize,
}

const ALIGN: usize = 16;

impl AlignedF32Buf {
    fn new() -> Self {
        Self {
            ptr: core::ptr::NonNull::dangling().as_ptr(),
            len: 0,
            cap: 0,
        }
    }

    fn layout(cap: usize) -> core::alloc::Layout {
        core::alloc::Layout::from_size_align(cap * core::mem::size_of::<f32>(), ALIGN)
            .expect("valid layout")
    }

    /// Ensures capacity for at least `needed` elements, preserving existing
    /// contents. Returns `false` on allocation failure.
    #[must_use]
    fn reserve(&mut self, needed: usize) -> bool {
        if needed <= self.cap {
            return true;
        }
        let new_cap = needed.max(self.cap * 2).max(16);
        let new_layout = Self::layout(new_cap);
        let new_ptr = unsafe { std::alloc::alloc_zeroed(new_layout) } as *mut f32;
        if new_ptr.is_null() {
            return false;
        }
        if self.cap > 0 {
            unsafe {
                core::ptr::copy_nonoverlapping(self.ptr, new_ptr, self.len);
                std::alloc::dealloc(self.ptr as *mut u8, Self::layout(self.cap));
            }
        }
        self.ptr = new_ptr;
        self.cap = new_cap;
        true
    }

    fn as_mut_slice(&mut self, len: usize) -> &mut [f32] {
        debug_assert!(len <= self.cap);
        self.len = len;
        unsafe { core::slice::from_raw_parts_mut(self.ptr, len) }
    }

    fn as_slice(&self, len: usize) -> &[f32] {
        debug_assert!(len <= self.cap);
        unsafe { core::slice::from_raw_parts(self.ptr, len) }
    }
}

impl Drop for AlignedF32Buf {
    fn drop(&mut self) {
        if self.cap > 0 {
            unsafe { std::alloc::dealloc(self.ptr as *mut u8, Self::layout(self.cap)) }
        }
    }
}

// Safety: AlignedF32Buf is a uniquely-owned heap buffer like Vec<f32>; it
// carries no aliasing of its own across threads.
unsafe impl Send for AlignedF32Buf {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkspaceState {
    Uninitialized,
    Ready,
    Finalized,
}

/// The estimator's aggregate owned workspace: a single struct owning every
/// scratch array, with sub-views (packed-points buffer, NR table) as
/// non-owning borrows from it rather than independent heap objects.
pub struct Workspace {
    state: WorkspaceState,
    /// Packed (x, y) pairs of the current sample's inliers, reused across
    /// LM iterations to avoid per-iteration allocation.
    packed_points: AlignedF32Buf,
    pub(crate) nr: NrTable,
}

impl Workspace {
    /// Constructs an uninitialized workspace. Call [`Workspace::init`]
    /// before use.
    pub fn new() -> Self {
        Self {
            state: WorkspaceState::Uninitialized,
            packed_points: AlignedF32Buf::new(),
            nr: NrTable::new(),
        }
    }

    /// Initializes the workspace's internal buffers.
    ///
    /// # Panics
    /// Panics if called on an already-initialized, non-finalized context.
    pub fn init(&mut self) {
        assert!(
            self.state != WorkspaceState::Ready,
            "programming error: Workspace::init called on a live context"
        );
        self.state = WorkspaceState::Ready;
    }

    fn assert_ready(&self) {
        assert_eq!(
            self.state,
            WorkspaceState::Ready,
            "workspace used before init() or after finalize()"
        );
    }

    /// Ensures the NR table is sized for at least `n` correspondences at
    /// the given `beta`. `n == 0` releases the table.
    pub fn ensure_nr_capacity(&mut self, n: usize, beta: f64, min_inl: usize) {
        self.assert_ready();
        self.nr.ensure_capacity(n, beta, min_inl);
    }

    /// Packs the correspondences selected by `indices` into the scratch
    /// buffer as interleaved (x, y) pairs and returns a view of exactly the
    /// used prefix.
    ///
    /// # Errors
    /// Returns [`EstimatorError::Allocation`] if growing the aligned scratch
    /// buffer fails; the caller must not treat the returned slice as valid
    /// in that case.
    pub(crate) fn pack_points(
        &mut self,
        points: &[Point2f],
        indices: &[usize],
    ) -> Result<&[f32], EstimatorError> {
        self.assert_ready();
        let needed = indices.len() * 2;
        if !self.packed_points.reserve(needed) {
            return Err(EstimatorError::Allocation);
        }
        let buf = self.packed_points.as_mut_slice(needed);
        for (slot, &idx) in indices.iter().enumerate() {
            buf[2 * slot] = points[idx].x;
            buf[2 * slot + 1] = points[idx].y;
        }
        Ok(self.packed_points.as_slice(needed))
    }

    /// Releases every owned buffer.
    ///
    /// # Panics
    /// Panics on double-finalize.
    pub fn finalize(&mut self) {
        assert_ne!(
            self.state,
            WorkspaceState::Finalized,
            "Workspace::finalize called twice"
        );
        self.nr.release();
        self.packed_points = AlignedF32Buf::new();
        self.state = WorkspaceState::Finalized;
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "programming error")]
    fn double_init_panics() {
        let mut ws = Workspace::new();
        ws.init();
        ws.init();
    }

    #[test]
    #[should_panic(expected = "finalize called twice")]
    fn double_finalize_panics() {
        let mut ws = Workspace::new();
        ws.init();
        ws.finalize();
        ws.finalize();
    }

    #[test]
    fn pack_points_round_trips() {
        let mut ws = Workspace::new();
        ws.init();
        let pts = vec![
            Point2f::new(1.0, 2.0),
            Point2f::new(3.0, 4.0),
            Point2f::new(5.0, 6.0),
        ];
        let packed = ws.pack_points(&pts, &[2, 0]).unwrap();
        assert_eq!(packed, &[5.0, 6.0, 1.0, 2.0]);
    }
}

// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! One allocation holding every layer's output matrix.
//!
//! ```text
//!  arena ─┬─ layer 0 ─┬─ layer 1 ──────┬─ layer 2 ─ ...
//!         │ mem_size0 │ mem_size1      │
//!         ▲ offset 0  ▲ offset0+size0  ▲ ...
//! ```
//!
//! The arena is laid out once when the plan is built. Workers then write
//! disjoint tiles through raw views without any lock; the dependency
//! counters order every write before the reads of its consumers.

use crate::{LayerExecState, PlannerError};
use memory_manager::{BufferGuard, MemoryPool};
use std::ops::Range;
use tensor_core::{MatrixView, MatrixViewMut};

pub struct PlanArena {
    base: *mut f32,
    len: usize,
    // Owns the memory behind `base`; the heap block never moves.
    _buffer: BufferGuard,
}

// Access goes through the unsafe view constructors, whose callers
// guarantee tile-disjoint writes.
unsafe impl Send for PlanArena {}
unsafe impl Sync for PlanArena {}

impl PlanArena {
    /// Allocates `size_bytes` of zeroed memory from `pool`.
    pub fn allocate(pool: &MemoryPool, size_bytes: usize) -> Result<Self, PlannerError> {
        let mut buffer = pool.allocate(size_bytes.max(std::mem::size_of::<f32>()))?;
        let base = buffer.as_mut_ptr();
        let len = buffer.len();
        Ok(Self {
            base,
            len,
            _buffer: buffer,
        })
    }

    pub fn size_bytes(&self) -> usize {
        self.len * std::mem::size_of::<f32>()
    }

    /// Number of `f32` slots.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn layer_base(&self, layer: &LayerExecState) -> *mut f32 {
        assert!(
            layer.arena_offset + layer.col_stride * layer.padded_cols <= self.len,
            "layer {} lies outside the arena",
            layer.index
        );
        // SAFETY: bounds checked above.
        unsafe { self.base.add(layer.arena_offset) }
    }

    /// Read-only view of a layer's `rows × cols` output.
    ///
    /// # Safety
    /// No slice obtained through the view may overlap memory that another
    /// thread writes while the slice is alive.
    pub unsafe fn layer_view(&self, layer: &LayerExecState) -> MatrixView<'_> {
        MatrixView::from_raw_parts(self.layer_base(layer), layer.rows, layer.cols, layer.col_stride)
    }

    /// Mutable view of a layer's whole output.
    ///
    /// # Safety
    /// The caller must have exclusive access to the layer's buffer.
    pub unsafe fn layer_view_mut(&self, layer: &LayerExecState) -> MatrixViewMut<'_> {
        MatrixViewMut::from_raw_parts(self.layer_base(layer), layer.rows, layer.cols, layer.col_stride)
    }

    /// Mutable view of one tile.
    ///
    /// # Safety
    /// The caller must have exclusive access to the tile's rectangle.
    pub unsafe fn tile_view_mut(
        &self,
        layer: &LayerExecState,
        rows: Range<usize>,
        cols: Range<usize>,
    ) -> MatrixViewMut<'_> {
        assert!(rows.end <= layer.rows && cols.end <= layer.cols, "tile outside layer {}", layer.index);
        let origin = self.layer_base(layer).add(cols.start * layer.col_stride + rows.start);
        MatrixViewMut::from_raw_parts(origin, rows.len(), cols.len(), layer.col_stride)
    }
}

impl std::fmt::Debug for PlanArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanArena").field("len", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_manager::MemoryBudget;

    #[test]
    fn test_tiles_are_disjoint() {
        let pool = MemoryPool::new(MemoryBudget::from_mb(1));
        let layer = LayerExecState::new(0, 3, 4, 2, 2, 64, 0, 0);
        let arena = PlanArena::allocate(&pool, layer.mem_size).unwrap();
        assert_eq!(layer.col_stride, 4);

        unsafe {
            arena.tile_view_mut(&layer, 0..2, 0..2).fill(1.0);
            arena.tile_view_mut(&layer, 2..3, 0..2).fill(2.0);
            arena.tile_view_mut(&layer, 0..3, 2..4).fill(3.0);
            let v = arena.layer_view(&layer);
            assert_eq!(v.column(0), &[1.0, 1.0, 2.0]);
            assert_eq!(v.column(3), &[3.0, 3.0, 3.0]);
        }
    }

    #[test]
    fn test_arena_returns_memory() {
        let pool = MemoryPool::new(MemoryBudget::from_mb(1));
        {
            let _arena = PlanArena::allocate(&pool, 4096).unwrap();
            assert_eq!(pool.allocated_bytes(), 4096);
        }
        assert_eq!(pool.allocated_bytes(), 0);
    }
}

// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII buffer guard that returns memory to the pool on drop.

use crate::pool::{Block, PoolInner, MEM_ALIGN};
use std::sync::Arc;

const FLOATS_PER_BLOCK: usize = MEM_ALIGN / 4;

/// An aligned `f32` buffer on loan from a [`MemoryPool`](crate::MemoryPool).
///
/// Dropping the guard puts the storage back on the pool's free list.
pub struct BufferGuard {
    data: Vec<Block>,
    pool: Arc<PoolInner>,
    size_bytes: usize,
}

impl BufferGuard {
    pub(crate) fn new(data: Vec<Block>, pool: Arc<PoolInner>, size_bytes: usize) -> Self {
        Self {
            data,
            pool,
            size_bytes,
        }
    }

    /// Requested size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Number of `f32` values the caller asked room for.
    pub fn len(&self) -> usize {
        self.size_bytes.div_ceil(4)
    }

    pub fn is_empty(&self) -> bool {
        self.size_bytes == 0
    }

    pub fn as_f32_slice(&self) -> &[f32] {
        debug_assert!(self.len() <= self.data.len() * FLOATS_PER_BLOCK);
        // SAFETY: `Block` is `repr(C)` over `[f32; N]`, so the block vector
        // is a contiguous run of initialised f32 values.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr().cast::<f32>(), self.len()) }
    }

    pub fn as_f32_slice_mut(&mut self) -> &mut [f32] {
        let len = self.len();
        // SAFETY: see `as_f32_slice`.
        unsafe { std::slice::from_raw_parts_mut(self.data.as_mut_ptr().cast::<f32>(), len) }
    }

    /// Base pointer of the buffer. Stable for the guard's lifetime.
    pub fn as_mut_ptr(&mut self) -> *mut f32 {
        self.data.as_mut_ptr().cast::<f32>()
    }
}

impl Drop for BufferGuard {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.data);
        self.pool.return_buffer(buffer, self.size_bytes);
    }
}

impl std::fmt::Debug for BufferGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferGuard")
            .field("size_bytes", &self.size_bytes)
            .field("blocks", &self.data.len())
            .finish()
    }
}

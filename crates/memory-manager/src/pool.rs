// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Size-class free-list allocator with budget enforcement.
//!
//! The [`MemoryPool`] hands out plan arenas and scratch buffers. It:
//!
//! 1. Enforces a hard memory ceiling. Allocations that would exceed the
//!    budget return `Err(OutOfMemory)`.
//! 2. Keeps returned buffers on a free list binned by size class, so
//!    rebuilding a plan with the same shape reuses the previous arena.
//! 3. Tracks allocation statistics.
//!
//! # Alignment
//! Storage is a vector of [`MEM_ALIGN`]-byte blocks, so every buffer starts
//! on a cache-line boundary and its capacity is a whole number of lines.
//!
//! # Size Classes
//! A request is served from the class `next_power_of_two(max(size, 4 KiB))`.
//! A cached buffer of that class always has room for the request.

use crate::{AllocationStats, BufferGuard, MemoryBudget, MemoryError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Byte alignment of every buffer handed out by the pool.
pub const MEM_ALIGN: usize = 64;

/// Minimum size class: 4 KiB.
const MIN_SIZE_CLASS: usize = 4096;

/// One aligned storage unit.
#[derive(Clone, Copy)]
#[repr(C, align(64))]
pub(crate) struct Block(pub(crate) [f32; MEM_ALIGN / 4]);

impl Block {
    pub(crate) const ZERO: Block = Block([0.0; MEM_ALIGN / 4]);
}

/// State shared between the pool and its outstanding guards.
pub struct PoolInner {
    budget: MemoryBudget,
    allocated_bytes: AtomicUsize,
    /// size class (bytes) → cached buffers.
    free_buffers: Mutex<HashMap<usize, Vec<Vec<Block>>>>,
    free_list_bytes: AtomicUsize,
    stats: Mutex<AllocationStats>,
}

impl PoolInner {
    /// Called by `BufferGuard::drop`.
    pub(crate) fn return_buffer(&self, buffer: Vec<Block>, size_bytes: usize) {
        self.allocated_bytes.fetch_sub(size_bytes, Ordering::Release);

        if let Ok(mut stats) = self.stats.lock() {
            stats.record_deallocation();
        }

        let size_class = size_class_for(size_bytes);
        self.free_list_bytes
            .fetch_add(buffer.len() * MEM_ALIGN, Ordering::Release);

        if let Ok(mut free) = self.free_buffers.lock() {
            free.entry(size_class).or_default().push(buffer);
        }
    }
}

/// The allocator for plan arenas.
///
/// # Example
/// ```
/// use memory_manager::{MemoryPool, MemoryBudget};
///
/// let pool = MemoryPool::new(MemoryBudget::from_mb(64));
///
/// let guard = pool.allocate(1024 * 1024).unwrap();
/// assert_eq!(pool.allocated_bytes(), 1024 * 1024);
///
/// drop(guard);
/// assert_eq!(pool.allocated_bytes(), 0);
/// ```
#[derive(Clone)]
pub struct MemoryPool {
    inner: Arc<PoolInner>,
}

impl MemoryPool {
    /// Creates a pool with the given budget.
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                budget,
                allocated_bytes: AtomicUsize::new(0),
                free_buffers: Mutex::new(HashMap::new()),
                free_list_bytes: AtomicUsize::new(0),
                stats: Mutex::new(AllocationStats::default()),
            }),
        }
    }

    /// Allocates a zeroed, [`MEM_ALIGN`]-aligned buffer of at least `size_bytes`.
    ///
    /// A cached buffer of the same size class is reused when available.
    /// The returned [`BufferGuard`] gives the memory back on drop.
    pub fn allocate(&self, size_bytes: usize) -> Result<BufferGuard, MemoryError> {
        if size_bytes == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }

        let current = self.inner.allocated_bytes.load(Ordering::Acquire);
        let budget = self.inner.budget.as_bytes();

        if current + size_bytes > budget {
            if let Ok(mut stats) = self.inner.stats.lock() {
                stats.record_oom();
            }
            tracing::debug!(
                "allocation of {size_bytes} bytes refused: {current} of {budget} in use"
            );
            return Err(MemoryError::OutOfMemory {
                requested_bytes: size_bytes,
                available_bytes: budget.saturating_sub(current),
                budget_bytes: budget,
            });
        }

        let blocks = size_bytes.div_ceil(MEM_ALIGN);
        let size_class = size_class_for(size_bytes);
        let mut buffer = None;

        if let Ok(mut free) = self.inner.free_buffers.lock() {
            if let Some(mut buf) = free.get_mut(&size_class).and_then(Vec::pop) {
                self.inner
                    .free_list_bytes
                    .fetch_sub(buf.len() * MEM_ALIGN, Ordering::Release);
                buf.truncate(blocks);
                buf.iter_mut().for_each(|b| *b = Block::ZERO);
                buf.resize(blocks, Block::ZERO);
                buffer = Some(buf);
            }
        }

        let is_hit = buffer.is_some();
        let data = buffer.unwrap_or_else(|| {
            let mut fresh = Vec::with_capacity(size_class / MEM_ALIGN);
            fresh.resize(blocks, Block::ZERO);
            fresh
        });

        self.inner
            .allocated_bytes
            .fetch_add(size_bytes, Ordering::Release);

        if let Ok(mut stats) = self.inner.stats.lock() {
            if is_hit {
                stats.record_cache_hit(size_bytes);
            } else {
                stats.record_cache_miss(size_bytes);
            }
            let new_total = self.inner.allocated_bytes.load(Ordering::Acquire);
            stats.update_peak(new_total);
        }

        Ok(BufferGuard::new(data, Arc::clone(&self.inner), size_bytes))
    }

    /// Allocates room for `len` `f32` values.
    pub fn allocate_f32(&self, len: usize) -> Result<BufferGuard, MemoryError> {
        self.allocate(len * std::mem::size_of::<f32>())
    }

    /// Bytes currently handed out.
    pub fn allocated_bytes(&self) -> usize {
        self.inner.allocated_bytes.load(Ordering::Acquire)
    }

    /// Bytes remaining before the budget is hit.
    pub fn available_bytes(&self) -> usize {
        let budget = self.inner.budget.as_bytes();
        budget.saturating_sub(self.allocated_bytes())
    }

    pub fn budget(&self) -> MemoryBudget {
        self.inner.budget
    }

    /// Snapshot of allocation statistics.
    pub fn stats(&self) -> AllocationStats {
        self.inner
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Drops every cached free buffer. Live buffers are unaffected.
    pub fn shrink(&self) {
        if let Ok(mut free) = self.inner.free_buffers.lock() {
            let released = self.inner.free_list_bytes.swap(0, Ordering::AcqRel);
            free.clear();
            tracing::debug!("memory pool shrunk, released {released} cached bytes");
        }
    }

    /// Approximate bytes held on the free list.
    pub fn free_list_bytes(&self) -> usize {
        self.inner.free_list_bytes.load(Ordering::Acquire)
    }
}

/// Smallest power of two ≥ `size` and ≥ [`MIN_SIZE_CLASS`].
fn size_class_for(size: usize) -> usize {
    size.max(MIN_SIZE_CLASS).next_power_of_two()
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("budget", &self.inner.budget)
            .field("allocated_bytes", &self.allocated_bytes())
            .field("available_bytes", &self.available_bytes())
            .finish()
    }
}

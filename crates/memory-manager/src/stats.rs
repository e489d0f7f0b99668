// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Allocation statistics.

/// Cumulative counters describing how a [`MemoryPool`](crate::MemoryPool)
/// has been used.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AllocationStats {
    /// Allocation requests, including refused ones.
    pub total_allocations: u64,
    /// Requests served from the free list.
    pub cache_hits: u64,
    /// Requests that needed fresh memory.
    pub cache_misses: u64,
    /// Requests refused for exceeding the budget.
    pub oom_count: u64,
    /// High-water mark of live bytes.
    pub peak_allocated_bytes: usize,
    /// Largest single successful request.
    pub largest_allocation_bytes: usize,
    pub total_deallocations: u64,
}

impl AllocationStats {
    /// Fraction of successful requests served from the free list.
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / total as f64
    }

    pub(crate) fn record_cache_hit(&mut self, size: usize) {
        self.total_allocations += 1;
        self.cache_hits += 1;
        self.largest_allocation_bytes = self.largest_allocation_bytes.max(size);
    }

    pub(crate) fn record_cache_miss(&mut self, size: usize) {
        self.total_allocations += 1;
        self.cache_misses += 1;
        self.largest_allocation_bytes = self.largest_allocation_bytes.max(size);
    }

    pub(crate) fn record_oom(&mut self) {
        self.total_allocations += 1;
        self.oom_count += 1;
    }

    pub(crate) fn record_deallocation(&mut self) {
        self.total_deallocations += 1;
    }

    pub(crate) fn update_peak(&mut self, current_bytes: usize) {
        self.peak_allocated_bytes = self.peak_allocated_bytes.max(current_bytes);
    }

    /// One-line summary for logs and CLI output.
    pub fn summary(&self) -> String {
        let mb = |b: usize| b as f64 / (1024.0 * 1024.0);
        format!(
            "Allocations: {} total ({} reused, {:.0}% hit rate), {} OOMs, \
             peak {:.2} MB, largest {:.2} MB",
            self.total_allocations,
            self.cache_hits,
            self.cache_hit_ratio() * 100.0,
            self.oom_count,
            mb(self.peak_allocated_bytes),
            mb(self.largest_allocation_bytes),
        )
    }
}

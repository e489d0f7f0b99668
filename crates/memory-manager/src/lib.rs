// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # memory-manager
//!
//! The size-class free-list allocator behind execution-plan arenas.
//!
//! # Key Components
//!
//! - [`MemoryBudget`] — a hard ceiling with human-readable parsing
//!   (`"256M"`, `"1G"`).
//! - [`MemoryPool`] — the allocator. It enforces the budget, hands out
//!   cache-line aligned `f32` storage, and caches returned buffers by
//!   size class.
//! - [`BufferGuard`] — RAII ownership of one buffer. Dropping it returns
//!   the storage to the pool.
//! - [`AllocationStats`] — cumulative counters.
//!
//! A pool is owned by a runtime context rather than living in a global,
//! so two independent runtimes never share free lists.
//!
//! # Ownership Model
//!
//! ```text
//! MemoryPool::allocate(size)
//!       │
//!       ▼
//!   BufferGuard  ◄─── owns aligned blocks, holds Arc<PoolInner>
//!       │
//!       │  drop()
//!       ▼
//!   PoolInner::return_buffer()  ──► free list[size class]
//! ```

mod budget;
mod error;
mod guard;
pub mod pool;
mod stats;

pub use budget::MemoryBudget;
pub use error::MemoryError;
pub use guard::BufferGuard;
pub use pool::{MemoryPool, MEM_ALIGN};
pub use stats::AllocationStats;

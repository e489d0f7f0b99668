// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pool-scoped runtime context and device selection.
//!
//! Everything a worker needs beyond its own queue lives in one
//! [`RuntimeContext`] shared through an `Arc`: the GPU count, the memory
//! pool plan arenas come from, and the kernel registry.

use crate::KernelRegistry;
use memory_manager::{MemoryBudget, MemoryPool};
use partition_planner::MAX_DEVICES;

/// The kind of executor a worker pool drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum DeviceKind {
    Cpu,
    /// GPU with the given index.
    Gpu(usize),
}

impl DeviceKind {
    pub fn is_gpu(&self) -> bool {
        matches!(self, Self::Gpu(_))
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Gpu(i) => write!(f, "gpu{i}"),
        }
    }
}

/// What a worker pool executes on and which compute device it serves.
///
/// `node` is the device id instructions are assigned to by a
/// [`PartitionStrategy`](partition_planner::PartitionStrategy), e.g. 0
/// for the edge and 1 for the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DeviceSelector {
    pub kind: DeviceKind,
    pub node: usize,
}

impl DeviceSelector {
    pub fn cpu(node: usize) -> Self {
        Self {
            kind: DeviceKind::Cpu,
            node,
        }
    }

    pub fn gpu(index: usize, node: usize) -> Self {
        Self {
            kind: DeviceKind::Gpu(index),
            node,
        }
    }

    /// Checks the selector against `ctx`.
    ///
    /// A GPU index beyond the context's GPU count falls back to the CPU.
    pub fn resolve(self, ctx: &RuntimeContext) -> Self {
        match self.kind {
            DeviceKind::Gpu(i) if i >= ctx.gpu_count() => {
                tracing::warn!(
                    "gpu {i} requested but only {} available; falling back to cpu",
                    ctx.gpu_count()
                );
                Self::cpu(self.node)
            }
            _ => self,
        }
    }

    pub fn is_valid_node(&self) -> bool {
        self.node < MAX_DEVICES
    }
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@node{}", self.kind, self.node)
    }
}

/// Shared state of every pool in a process.
pub struct RuntimeContext {
    gpu_count: usize,
    memory: MemoryPool,
    kernels: KernelRegistry,
}

impl RuntimeContext {
    pub fn new(memory: MemoryPool, kernels: KernelRegistry) -> Self {
        Self {
            gpu_count: 0,
            memory,
            kernels,
        }
    }

    /// CPU-only context with the built-in kernels.
    pub fn cpu(budget: MemoryBudget) -> Self {
        Self::new(MemoryPool::new(budget), KernelRegistry::with_builtin_kernels())
    }

    /// Sets the number of GPUs workers may select.
    pub fn with_gpus(mut self, count: usize) -> Self {
        self.gpu_count = count;
        self
    }

    pub fn gpu_count(&self) -> usize {
        self.gpu_count
    }

    /// Size-class allocator for plan arenas.
    pub fn memory(&self) -> &MemoryPool {
        &self.memory
    }

    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("gpu_count", &self.gpu_count)
            .field("memory", &self.memory)
            .field("kernels", &self.kernels.len())
            .finish()
    }
}

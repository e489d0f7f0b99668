// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for plan construction and affinity assignment.

/// Errors that can occur while building or preparing an execution plan.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    /// The tiling parameters cannot produce a valid plan.
    #[error("invalid tiling configuration: {0}")]
    InvalidTiling(String),

    /// The batch size must be at least one.
    #[error("batch size must be positive")]
    ZeroBatch,

    /// The plan has more instructions than a `u32` index can address.
    #[error("plan has {0} instructions, exceeding the u32 index range")]
    TooManyInstructions(usize),

    /// The plan's output buffers could not be allocated.
    #[error("failed to allocate plan arena: {0}")]
    Memory(#[from] memory_manager::MemoryError),

    /// The input buffer does not match the input layer's size.
    #[error("input has {actual} values, expected {expected}")]
    InputSizeMismatch { expected: usize, actual: usize },

    /// The plan is in flight and its buffers may not be rewritten.
    #[error("plan {0} has already been submitted; reset it before reloading input")]
    AlreadySubmitted(u64),

    /// A layer's output was requested before all of its tiles completed.
    #[error("layer {layer} is incomplete: {completed}/{total} instructions")]
    LayerIncomplete {
        layer: usize,
        completed: usize,
        total: usize,
    },

    /// A layer index outside the network.
    #[error("layer {0} does not exist")]
    UnknownLayer(usize),

    /// An affinity argument out of range (device, core, ratio, split layer).
    #[error("strategy '{strategy}' failed: {detail}")]
    StrategyFailed { strategy: String, detail: String },
}

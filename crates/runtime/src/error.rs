// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the scheduler runtime.

use model_ir::LayerType;

/// Recoverable runtime errors.
///
/// Scheduling invariant violations inside a worker are not represented
/// here: they abort the process.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A network layer has no registered kernel.
    #[error("no kernel registered for layer '{layer}' ({layer_type})")]
    MissingKernel { layer: String, layer_type: LayerType },

    /// `run()` on a worker that is already running.
    #[error("worker {worker} is already running")]
    AlreadyRunning { worker: usize },

    /// `stop()` on a worker that is already stopped.
    #[error("worker {worker} is already stopped")]
    AlreadyStopped { worker: usize },

    /// The worker has been killed and cannot change state.
    #[error("worker {worker} has been killed")]
    WorkerKilled { worker: usize },

    /// The worker pool was started before being attached to a ready pool.
    #[error("worker pool is not attached to a ready pool")]
    NotAttached,

    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// A kernel failed on a tile.
    #[error("execution error in layer '{layer}': {source}")]
    ExecutionError {
        layer: String,
        #[source]
        source: tensor_core::TensorError,
    },

    /// A blocking task of the async facade failed.
    #[error("background task failed: {0}")]
    TaskFailed(String),

    /// Memory allocation failed.
    #[error("memory error: {0}")]
    MemoryError(#[from] memory_manager::MemoryError),

    /// Plan construction, input loading or affinity assignment failed.
    #[error("planner error: {0}")]
    PlannerError(#[from] partition_planner::PlannerError),

    /// Network loading or validation failed.
    #[error("model error: {0}")]
    ModelError(#[from] model_ir::ModelError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! Executes tiled instruction graphs on pools of worker threads.
//!
//! The runtime takes:
//! - A validated `Network` from `model-ir`.
//! - An `ExecutionPlan` from `partition-planner`, with affinities assigned.
//! - A `MemoryPool` from `memory-manager`, owned by the [`RuntimeContext`].
//!
//! ```text
//!   submit_plan ──► ReadyPool ◄──── fetch / return ────┐
//!                    │  queue groups per                │
//!                    │  (plan, layer, affinity)         │
//!                    ▼                                  │
//!              ┌──────────┐   ┌──────────┐        ┌──────────┐
//!              │ worker 0 │   │ worker 1 │  ...   │ worker n │
//!              │  cache   │   │  cache   │        │  cache   │
//!              └────┬─────┘   └────┬─────┘        └────┬─────┘
//!                   └─ kernel ─► on_completed ─► children ready
//! ```
//!
//! Each worker keeps a local [`WorkerCache`] kept near a target size by
//! batch fetches from and returns to the shared [`ReadyPool`]. Finished
//! instructions release their children through [`on_completed`]; the last
//! finisher of a layer completes the layer and the last layer completes
//! the plan.
//!
//! # Type-State Pipeline
//! The [`InferenceEngine`] wraps the whole flow:
//! ```text
//! InferenceEngine<Idle> → InferenceEngine<Planned> → InferenceEngine<Ready>
//! ```
//! Transitions are compile-time checked. Runs are `async`; the waiting
//! happens on a `tokio` blocking thread.

mod config;
mod context;
mod engine;
mod error;
pub mod kernels;
mod metrics;
pub mod policy;
mod pool;
mod propagation;
mod ready_pool;
pub mod reference;
mod worker;
mod worker_cache;

pub use config::{RuntimeConfig, POLICIES, STRATEGIES};
pub use context::{DeviceKind, DeviceSelector, RuntimeContext};
pub use engine::{EngineState, Idle, InferenceEngine, InferenceOutput, Planned, Ready};
pub use error::RuntimeError;
pub use kernels::{Kernel, KernelRegistry, TileContext};
pub use metrics::{InferenceMetrics, LayerMetrics, WorkerMetrics};
pub use policy::{Priority, RoundRobin, SelectionPolicy, Weighted};
pub use pool::{
    block_until_plan_complete, reset_plan_for_rerun, reset_pool, submit_plan, wait_for_plan,
    wait_for_plan_or_cancel, WorkerPool,
};
pub use propagation::{on_completed, Propagation};
pub use ready_pool::{GroupKey, PoolStats, QueueGroup, ReadyInst, ReadyPool, Requester};
pub use worker::{Worker, WorkerState};
pub use worker_cache::{CacheThresholds, Rebalance, WorkerCache};

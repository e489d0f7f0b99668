// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # partition-planner
//!
//! Turns a validated [`Network`](model_ir::Network) into a tiled
//! instruction graph and assigns device/core affinity to its instructions.
//!
//! - [`PlanBuilder`] / [`TilingConfig`] — tiling and dependency discovery.
//! - [`ExecutionPlan`] — layers, instructions, counters and the output arena.
//! - [`Affinity`] — per-instruction device and core masks.
//! - [`PartitionStrategy`] — pluggable affinity assignment (offload policies).
//!
//! # Strategies
//!
//! | Strategy | Effect |
//! |---|---|
//! | [`AllowAll`] | Any device, any core |
//! | [`FullLocal`] | Every instruction on one device |
//! | [`FullOffload`] | Input on the edge, all layers on the server |
//! | [`SequentialOffload`] | Layers up to a split on the edge, the rest on the server |
//! | [`PartialOffload`] | As sequential, but a ratio of each later layer stays on the server |
//! | [`RandomOffload`] | Each instruction offloaded with a probability |
//!
//! # Example
//! ```no_run
//! use memory_manager::{MemoryBudget, MemoryPool};
//! use model_ir::NetworkManifest;
//! use partition_planner::{FullLocal, PartitionStrategy, PlanBuilder};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let net = NetworkManifest::from_file(Path::new("./net.json")).unwrap().build().unwrap();
//! let pool = MemoryPool::new(MemoryBudget::from_mb(256));
//! let plan = PlanBuilder::new(Arc::new(net)).batch(4).build(&pool).unwrap();
//! FullLocal::new(0).assign(&plan).unwrap();
//! println!("{}", plan.summary());
//! ```

mod affinity;
mod arena;
mod builder;
mod error;
mod plan;
pub mod strategy;

pub use affinity::{Affinity, MAX_CORES, MAX_DEVICES};
pub use arena::PlanArena;
pub use builder::{PlanBuilder, TilingConfig};
pub use error::PlannerError;
pub use plan::{ExecutionPlan, Instruction, InstructionState, LayerExecState};
pub use strategy::local::{AllowAll, FullLocal};
pub use strategy::offload::{FullOffload, PartialOffload, RandomOffload, SequentialOffload};
pub use strategy::{pin_cores_randomly, PartitionStrategy};

// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The [`PartitionStrategy`] trait and affinity assignments.
//!
//! A strategy decides which device computes each instruction of a plan.
//! The ready pool only reads the result: an instruction restricted to
//! device `d` lands in a queue group that only workers on device `d`
//! fetch from.

pub mod local;
pub mod offload;

use crate::{Affinity, ExecutionPlan, PlannerError, MAX_CORES, MAX_DEVICES};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Assigns device affinities to the instructions of a plan.
///
/// Strategies run before a plan is submitted and are purely algorithmic,
/// so they can be unit tested against a freshly built plan.
pub trait PartitionStrategy: Send + Sync {
    /// Human-readable name of this strategy.
    fn name(&self) -> &str;

    /// Overwrites the device masks of every instruction in `plan`.
    fn assign(&self, plan: &ExecutionPlan) -> Result<(), PlannerError>;

    /// Devices [`assign`](Self::assign) may pin instructions to, without
    /// duplicates. Empty when every instruction may run anywhere. Each
    /// listed device needs workers or its instructions are never fetched.
    fn devices(&self) -> Vec<usize>;
}

/// `edge` and `server`, or just `edge` when they are the same device.
pub(crate) fn edge_and_server(edge: usize, server: usize) -> Vec<usize> {
    if edge == server {
        vec![edge]
    } else {
        vec![edge, server]
    }
}

/// Pins every non-input instruction to one random core in `0..num_cores`.
pub fn pin_cores_randomly(plan: &ExecutionPlan, num_cores: usize, seed: u64) -> Result<(), PlannerError> {
    if num_cores == 0 || num_cores > MAX_CORES {
        return Err(PlannerError::StrategyFailed {
            strategy: "random-cores".into(),
            detail: format!("core count {num_cores} outside 1..={MAX_CORES}"),
        });
    }
    let mut rng = StdRng::seed_from_u64(seed);
    for inst in plan.instructions().iter().filter(|i| i.layer() > 0) {
        inst.affinity().allow_random_core(num_cores, &mut rng);
    }
    tracing::debug!("plan {}: instructions pinned across {num_cores} cores", plan.id());
    Ok(())
}

pub(crate) fn check_device(strategy: &str, device: usize) -> Result<(), PlannerError> {
    if device >= MAX_DEVICES {
        return Err(PlannerError::StrategyFailed {
            strategy: strategy.into(),
            detail: format!("device {device} outside 0..{MAX_DEVICES}"),
        });
    }
    Ok(())
}

pub(crate) fn check_ratio(strategy: &str, ratio: f32) -> Result<(), PlannerError> {
    if !(0.0..=1.0).contains(&ratio) {
        return Err(PlannerError::StrategyFailed {
            strategy: strategy.into(),
            detail: format!("offload ratio {ratio} outside [0, 1]"),
        });
    }
    Ok(())
}

pub(crate) fn check_split(strategy: &str, plan: &ExecutionPlan, split_layer: usize) -> Result<(), PlannerError> {
    if split_layer >= plan.num_layers() {
        return Err(PlannerError::StrategyFailed {
            strategy: strategy.into(),
            detail: format!("split layer {split_layer} outside a {}-layer network", plan.num_layers()),
        });
    }
    Ok(())
}

/// Restricts `affinity` to exactly `device`.
pub(crate) fn pin(affinity: &Affinity, device: usize) {
    affinity.clear_compute_devices();
    affinity.set_compute_device(device);
}

// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Edge/server offload assignments.
//!
//! | Strategy | Edge computes | Server computes |
//! |---|---|---|
//! | [`FullOffload`] | input only | everything else |
//! | [`SequentialOffload`] | layers `..=split` | layers after the split |
//! | [`PartialOffload`] | layers `..=split`, then a `1 - ratio` share of each layer | a `ratio` share of each layer after the split |
//! | [`RandomOffload`] | input, then each tile with probability `1 - ratio` | each tile with probability `ratio` |

use super::{check_device, check_ratio, check_split, edge_and_server, pin, PartitionStrategy};
use crate::{ExecutionPlan, PlannerError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Only the input lives on the edge; the server computes every layer.
#[derive(Debug, Clone)]
pub struct FullOffload {
    pub edge: usize,
    pub server: usize,
}

impl PartitionStrategy for FullOffload {
    fn name(&self) -> &str {
        "full-offload"
    }

    fn assign(&self, plan: &ExecutionPlan) -> Result<(), PlannerError> {
        check_device(self.name(), self.edge)?;
        check_device(self.name(), self.server)?;
        for inst in plan.instructions() {
            let device = if inst.layer() == 0 { self.edge } else { self.server };
            pin(inst.affinity(), device);
        }
        Ok(())
    }

    fn devices(&self) -> Vec<usize> {
        edge_and_server(self.edge, self.server)
    }
}

/// The edge computes up to and including `split_layer`, the server the rest.
#[derive(Debug, Clone)]
pub struct SequentialOffload {
    pub split_layer: usize,
    pub edge: usize,
    pub server: usize,
}

impl PartitionStrategy for SequentialOffload {
    fn name(&self) -> &str {
        "sequential-offload"
    }

    fn assign(&self, plan: &ExecutionPlan) -> Result<(), PlannerError> {
        check_device(self.name(), self.edge)?;
        check_device(self.name(), self.server)?;
        check_split(self.name(), plan, self.split_layer)?;
        for inst in plan.instructions() {
            let device = if inst.layer() <= self.split_layer {
                self.edge
            } else {
                self.server
            };
            pin(inst.affinity(), device);
        }
        Ok(())
    }

    fn devices(&self) -> Vec<usize> {
        edge_and_server(self.edge, self.server)
    }
}

/// Splits each layer after `split_layer` between server and edge.
///
/// The first `ceil(ratio × n)` instructions of such a layer go to the
/// server, the remainder stays on the edge.
#[derive(Debug, Clone)]
pub struct PartialOffload {
    pub split_layer: usize,
    pub ratio: f32,
    pub edge: usize,
    pub server: usize,
}

impl PartitionStrategy for PartialOffload {
    fn name(&self) -> &str {
        "partial-offload"
    }

    fn assign(&self, plan: &ExecutionPlan) -> Result<(), PlannerError> {
        check_device(self.name(), self.edge)?;
        check_device(self.name(), self.server)?;
        check_ratio(self.name(), self.ratio)?;
        check_split(self.name(), plan, self.split_layer)?;

        for layer in plan.layers() {
            let on_server = if layer.index <= self.split_layer {
                0
            } else {
                (layer.num_instructions as f32 * self.ratio).ceil() as usize
            };
            for (i, inst) in plan.layer_instructions(layer.index).iter().enumerate() {
                let device = if i < on_server { self.server } else { self.edge };
                pin(inst.affinity(), device);
            }
        }
        Ok(())
    }

    fn devices(&self) -> Vec<usize> {
        edge_and_server(self.edge, self.server)
    }
}

/// Sends each non-input instruction to the server with probability `ratio`.
#[derive(Debug, Clone)]
pub struct RandomOffload {
    pub ratio: f32,
    pub edge: usize,
    pub server: usize,
    pub seed: u64,
}

impl PartitionStrategy for RandomOffload {
    fn name(&self) -> &str {
        "random-offload"
    }

    fn assign(&self, plan: &ExecutionPlan) -> Result<(), PlannerError> {
        check_device(self.name(), self.edge)?;
        check_device(self.name(), self.server)?;
        check_ratio(self.name(), self.ratio)?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut offloaded = 0usize;
        for inst in plan.instructions() {
            let to_server = inst.layer() > 0 && rng.random::<f32>() < self.ratio;
            offloaded += usize::from(to_server);
            pin(inst.affinity(), if to_server { self.server } else { self.edge });
        }
        tracing::debug!(
            "plan {}: {offloaded}/{} instructions offloaded",
            plan.id(),
            plan.num_instructions()
        );
        Ok(())
    }

    fn devices(&self) -> Vec<usize> {
        edge_and_server(self.edge, self.server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PlanBuilder;
    use memory_manager::{MemoryBudget, MemoryPool};
    use model_ir::{Activation, NetworkBuilder};
    use std::sync::Arc;

    fn plan() -> ExecutionPlan {
        let mut b = NetworkBuilder::new("o", 4, 8, 8);
        b.conv("c1", 8, 3, 1, 1, Activation::Relu);
        b.conv("c2", 8, 3, 1, 1, Activation::Relu);
        b.max_pool("p", 2, 2, 0);
        PlanBuilder::new(Arc::new(b.build().unwrap()))
            .build(&MemoryPool::new(MemoryBudget::from_mb(4)))
            .unwrap()
    }

    fn devices_of(plan: &ExecutionPlan, layer: usize) -> Vec<u16> {
        plan.layer_instructions(layer)
            .iter()
            .map(|i| i.affinity().device_mask())
            .collect()
    }

    #[test]
    fn test_full_offload() {
        let plan = plan();
        FullOffload { edge: 0, server: 1 }.assign(&plan).unwrap();
        assert!(devices_of(&plan, 0).iter().all(|&m| m == 0b01));
        for layer in 1..plan.num_layers() {
            assert!(devices_of(&plan, layer).iter().all(|&m| m == 0b10));
        }
    }

    #[test]
    fn test_sequential_offload() {
        let plan = plan();
        SequentialOffload {
            split_layer: 1,
            edge: 0,
            server: 1,
        }
        .assign(&plan)
        .unwrap();
        assert!(devices_of(&plan, 1).iter().all(|&m| m == 0b01));
        assert!(devices_of(&plan, 2).iter().all(|&m| m == 0b10));
    }

    #[test]
    fn test_partial_offload_share() {
        let plan = plan();
        PartialOffload {
            split_layer: 1,
            ratio: 0.5,
            edge: 0,
            server: 1,
        }
        .assign(&plan)
        .unwrap();

        assert!(devices_of(&plan, 1).iter().all(|&m| m == 0b01));
        let layer2 = devices_of(&plan, 2);
        let on_server = layer2.iter().filter(|&&m| m == 0b10).count();
        assert_eq!(on_server, layer2.len().div_ceil(2));
    }

    #[test]
    fn test_random_offload_reproducible() {
        let a = plan();
        let b = plan();
        let s = RandomOffload {
            ratio: 0.5,
            edge: 0,
            server: 1,
            seed: 42,
        };
        s.assign(&a).unwrap();
        s.assign(&b).unwrap();
        for (x, y) in a.instructions().iter().zip(b.instructions()) {
            assert_eq!(x.affinity().device_mask(), y.affinity().device_mask());
        }
        assert!(devices_of(&a, 0).iter().all(|&m| m == 0b01));
    }

    #[test]
    fn test_devices_cover_edge_and_server() {
        let s = SequentialOffload {
            split_layer: 1,
            edge: 0,
            server: 2,
        };
        assert_eq!(s.devices(), vec![0, 2]);
        assert_eq!(FullOffload { edge: 1, server: 1 }.devices(), vec![1]);
    }

    #[test]
    fn test_invalid_arguments() {
        let plan = plan();
        let bad_ratio = PartialOffload {
            split_layer: 0,
            ratio: 1.5,
            edge: 0,
            server: 1,
        };
        assert!(bad_ratio.assign(&plan).is_err());
        let bad_split = SequentialOffload {
            split_layer: 10,
            edge: 0,
            server: 1,
        };
        assert!(bad_split.assign(&plan).is_err());
    }

    #[test]
    fn test_pin_cores_randomly() {
        let plan = plan();
        crate::pin_cores_randomly(&plan, 3, 7).unwrap();
        for inst in plan.instructions().iter().filter(|i| i.layer() > 0) {
            assert!(inst.affinity().allowed_core_index().unwrap() < 3);
        }
        assert!(crate::pin_cores_randomly(&plan, 0, 7).is_err());
    }
}

// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Single-device assignments.

use super::{check_device, pin, PartitionStrategy};
use crate::{ExecutionPlan, PlannerError};

/// Lifts every restriction: any device, any core.
#[derive(Debug, Clone, Default)]
pub struct AllowAll;

impl PartitionStrategy for AllowAll {
    fn name(&self) -> &str {
        "allow-all"
    }

    fn assign(&self, plan: &ExecutionPlan) -> Result<(), PlannerError> {
        for inst in plan.instructions() {
            inst.affinity().clear_compute_devices();
            inst.affinity().allow_all_cores();
        }
        Ok(())
    }

    fn devices(&self) -> Vec<usize> {
        Vec::new()
    }
}

/// Everything on one device.
#[derive(Debug, Clone, Default)]
pub struct FullLocal {
    pub device: usize,
}

impl FullLocal {
    pub fn new(device: usize) -> Self {
        Self { device }
    }
}

impl PartitionStrategy for FullLocal {
    fn name(&self) -> &str {
        "full-local"
    }

    fn assign(&self, plan: &ExecutionPlan) -> Result<(), PlannerError> {
        check_device(self.name(), self.device)?;
        for inst in plan.instructions() {
            pin(inst.affinity(), self.device);
        }
        tracing::debug!("plan {}: all instructions on device {}", plan.id(), self.device);
        Ok(())
    }

    fn devices(&self) -> Vec<usize> {
        vec![self.device]
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
        let mut b = NetworkBuilder::new("l", 2, 4, 4);
        b.conv("c", 2, 3, 1, 1, Activation::None);
        PlanBuilder::new(Arc::new(b.build().unwrap()))
            .build(&MemoryPool::new(MemoryBudget::from_mb(4)))
            .unwrap()
    }

    #[test]
    fn test_full_local() {
        let plan = plan();
        FullLocal::new(2).assign(&plan).unwrap();
        for inst in plan.instructions() {
            assert!(inst.affinity().is_device_compute(2));
            assert!(!inst.affinity().is_device_compute(0));
        }
    }

    #[test]
    fn test_allow_all_clears() {
        let plan = plan();
        FullLocal::new(1).assign(&plan).unwrap();
        AllowAll.assign(&plan).unwrap();
        assert!(plan.instructions().iter().all(|i| i.affinity().device_mask() == 0));
    }

    #[test]
    fn test_devices() {
        assert!(AllowAll.devices().is_empty());
        assert_eq!(FullLocal::new(3).devices(), vec![3]);
    }

    #[test]
    fn test_device_out_of_range() {
        assert!(FullLocal::new(9).assign(&plan()).is_err());
    }
}

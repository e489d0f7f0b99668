// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Completion propagation.
//!
//! After an instruction reaches `Completed`, every child counts one more
//! completed parent. The single caller whose increment reaches the child's
//! parent count moves it to `Ready` and enqueues it. The same
//! last-increment-wins rule decides, one level up, which caller completes
//! the layer and which completes the plan.

use crate::{ReadyInst, ReadyPool, Requester, WorkerCache};

/// What one [`on_completed`] call caused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Propagation {
    /// Children this call moved to `Ready`.
    pub became_ready: usize,
    /// This call completed the instruction's layer.
    pub layer_completed: bool,
    /// This call completed the whole plan.
    pub plan_completed: bool,
}

/// Propagates the completion of `ready`, which must already be `Completed`.
///
/// With `local` set, children the worker may execute itself go to its
/// cache and the rest to `pool`. Without it every child goes to `pool`.
/// When the plan completes, its queue groups in `pool` are disabled.
///
/// # Panics
/// Panics if a child whose last parent just completed is not `NotReady`.
pub fn on_completed(
    ready: &ReadyInst,
    mut local: Option<(&mut WorkerCache, &Requester)>,
    pool: &ReadyPool,
) -> Propagation {
    let plan = ready.plan();
    let inst = ready.instruction();
    let mut out = Propagation::default();
    let mut shared = Vec::new();

    for &index in inst.children() {
        let child = plan.instruction(index);
        if !child.complete_parent() {
            continue;
        }
        if let Err(state) = child.mark_ready() {
            tracing::error!(
                "plan {}: child {index} of instruction {} was {state} when its last parent completed",
                plan.id(),
                inst.index()
            );
            panic!("instruction {index} became ready twice");
        }
        out.became_ready += 1;

        let item = ReadyInst::new(plan.clone(), index);
        match local.as_mut() {
            Some((cache, requester)) if item.admits(requester) => cache.push_back(item),
            _ => shared.push(item),
        }
    }
    if !shared.is_empty() {
        pool.push(shared);
    }

    let layer = plan.layer(inst.layer());
    if layer.complete_instruction() {
        out.layer_completed = true;
        tracing::debug!(
            "plan {}: layer {} complete ({} instructions)",
            plan.id(),
            layer.index,
            layer.num_instructions
        );
        if plan.complete_layer(layer.index) {
            out.plan_completed = true;
            pool.disable_plan(plan.id());
            tracing::info!("plan {} complete", plan.id());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ready_pool::tests::tiny_plan;
    use crate::CacheThresholds;
    use partition_planner::InstructionState;

    /// Completes every instruction of the plan in ready order, single-threaded.
    fn drain(pool: &ReadyPool) -> (usize, usize, usize) {
        let (mut executed, mut layers, mut plans) = (0, 0, 0);
        loop {
            let batch = pool.fetch(1, &Requester::on_device(0));
            let Some(ready) = batch.into_iter().next() else {
                break;
            };
            ready.instruction().mark_completed().unwrap();
            let p = on_completed(&ready, None, pool);
            executed += 1;
            layers += usize::from(p.layer_completed);
            plans += usize::from(p.plan_completed);
        }
        (executed, layers, plans)
    }

    #[test]
    fn test_full_plan_completes_once() {
        let plan = tiny_plan();
        let pool = ReadyPool::default();
        pool.register_plan(plan.id());
        plan.for_each_ready_after_reset(|i| pool.push_one(ReadyInst::new(plan.clone(), i.index())));

        let (executed, layers, plans) = drain(&pool);
        assert_eq!(executed, plan.num_instructions() - plan.layer(0).num_instructions);
        assert_eq!(layers, plan.num_layers() - 1);
        assert_eq!(plans, 1);
        assert!(plan.is_complete());
        assert!(plan
            .instructions()
            .iter()
            .all(|i| i.state() == InstructionState::Completed));
    }

    #[test]
    fn test_output_layer_completes_plan_beside_dead_end_branch() {
        use memory_manager::{MemoryBudget, MemoryPool};
        use model_ir::{Activation, NetworkBuilder};
        use partition_planner::PlanBuilder;
        use std::sync::Arc;

        // input ─┬─ side (never reaches the output)
        //        └─ out
        let mut b = NetworkBuilder::new("branch", 4, 8, 8);
        b.conv("side", 4, 1, 1, 0, Activation::Relu);
        b.at(0);
        b.conv("out", 4, 3, 1, 1, Activation::None);
        let plan = PlanBuilder::new(Arc::new(b.build().unwrap()))
            .build(&MemoryPool::new(MemoryBudget::from_mb(4)))
            .unwrap();
        let plan = Arc::new(plan);
        assert_eq!(plan.num_layers(), 3);

        let pool = ReadyPool::default();
        pool.register_plan(plan.id());
        plan.for_each_ready_after_reset(|i| pool.push_one(ReadyInst::new(plan.clone(), i.index())));

        let mut outputs = Vec::new();
        for ready in pool.fetch(usize::MAX, &Requester::on_device(0)) {
            if ready.instruction().layer() == 2 {
                outputs.push(ready);
            } else {
                pool.push_one(ready);
            }
        }
        let side = plan.layer(1).num_instructions;
        assert_eq!(outputs.len(), plan.layer(2).num_instructions);

        let mut completions = 0;
        for ready in &outputs {
            ready.instruction().mark_completed().unwrap();
            completions += usize::from(on_completed(ready, None, &pool).plan_completed);
        }
        assert_eq!(completions, 1);
        assert!(plan.is_complete());
        assert!(plan.completed_layers() < plan.num_layers());

        // The side branch stays queued but is no longer handed out.
        assert_eq!(pool.plan_len(plan.id()), side);
        assert!(pool.fetch(usize::MAX, &Requester::on_device(0)).is_empty());
    }

    #[test]
    fn test_children_go_to_local_cache() {
        let plan = tiny_plan();
        let pool = ReadyPool::default();
        let mut firsts = Vec::new();
        plan.for_each_ready_after_reset(|i| firsts.push(ReadyInst::new(plan.clone(), i.index())));

        let mut cache = WorkerCache::new(CacheThresholds::default());
        let requester = Requester::on_device(0);
        let mut became = 0;
        for ready in &firsts {
            ready.instruction().mark_completed().unwrap();
            became += on_completed(ready, Some((&mut cache, &requester)), &pool).became_ready;
        }
        assert_eq!(became, plan.layer(2).num_instructions);
        assert_eq!(cache.len(), became);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_foreign_children_go_to_pool() {
        let plan = tiny_plan();
        for inst in plan.layer_instructions(2) {
            inst.affinity().set_compute_device(1);
        }
        let pool = ReadyPool::default();
        let mut firsts = Vec::new();
        plan.for_each_ready_after_reset(|i| firsts.push(ReadyInst::new(plan.clone(), i.index())));

        let mut cache = WorkerCache::new(CacheThresholds::default());
        let requester = Requester::on_device(0);
        for ready in &firsts {
            ready.instruction().mark_completed().unwrap();
            on_completed(ready, Some((&mut cache, &requester)), &pool);
        }
        assert!(cache.is_empty());
        assert_eq!(pool.len(), plan.layer(2).num_instructions);
    }
}

// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The shared pool of dependency-satisfied instructions.
//!
//! ```text
//!            push(ready)                         fetch(max, requester)
//!                │                                        ▲
//!                ▼                                        │
//!   ┌─────────── key = {plan, layer, devices, cores} ─────┴───────────┐
//!   │ group 0  w=1  [i7 i8 i9]     ◄── SelectionPolicy picks one       │
//!   │ group 1  w=0  [ ]                group per fetched instruction   │
//!   │ group 2  w=3  [i20 i21]                                          │
//!   └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every operation runs under one short mutex; nothing blocks on work.
//! Each pushed instruction is handed to exactly one fetch call, or stays in
//! the pool until it is reset.

use crate::policy::{RoundRobin, SelectionPolicy};
use partition_planner::{Affinity, ExecutionPlan, Instruction, MAX_CORES};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// ── Items and keys ─────────────────────────────────────────────────

/// A ready instruction together with the plan that owns it.
#[derive(Clone)]
pub struct ReadyInst {
    plan: Arc<ExecutionPlan>,
    index: u32,
}

impl ReadyInst {
    pub fn new(plan: Arc<ExecutionPlan>, index: u32) -> Self {
        Self { plan, index }
    }

    pub fn plan(&self) -> &Arc<ExecutionPlan> {
        &self.plan
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn instruction(&self) -> &Instruction {
        self.plan.instruction(self.index)
    }

    /// Whether a worker described by `requester` may execute this.
    pub fn admits(&self, requester: &Requester) -> bool {
        self.instruction().affinity().admits(requester.device, requester.core)
    }
}

impl std::fmt::Debug for ReadyInst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReadyInst(plan {} #{})", self.plan.id(), self.index)
    }
}

/// Identity of a queue group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub plan: u64,
    pub layer: usize,
    /// Device mask snapshot; 0 means any device.
    pub devices: u16,
    pub cores: u64,
}

impl GroupKey {
    pub fn of(ready: &ReadyInst) -> Self {
        let inst = ready.instruction();
        Self {
            plan: ready.plan.id(),
            layer: inst.layer(),
            devices: inst.affinity().device_mask(),
            cores: inst.affinity().core_mask(),
        }
    }

    pub fn admits(&self, requester: &Requester) -> bool {
        Affinity::masks_admit(self.devices, self.cores, requester.device, requester.core)
    }
}

/// Who is asking for work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Requester {
    /// Compute device the worker serves.
    pub device: usize,
    /// Worker core id. `None` matches any core mask.
    pub core: Option<usize>,
}

impl Requester {
    pub fn new(device: usize, core: Option<usize>) -> Self {
        Self { device, core }
    }

    /// A requester on `device` without a core id.
    pub fn on_device(device: usize) -> Self {
        Self::new(device, None)
    }

    /// The requester of worker `worker` on `device`. Workers past the
    /// core-mask width take no core id and so match any core mask.
    pub fn for_worker(device: usize, worker: usize) -> Self {
        Self::new(device, (worker < MAX_CORES).then_some(worker))
    }
}

// ── Queue groups ───────────────────────────────────────────────────

/// FIFO of ready instructions sharing one [`GroupKey`].
pub struct QueueGroup {
    key: GroupKey,
    weight: u32,
    /// Weight restored when the plan is registered again.
    base_weight: u32,
    queue: VecDeque<ReadyInst>,
}

impl QueueGroup {
    fn new(key: GroupKey, weight: u32) -> Self {
        Self {
            key,
            weight,
            base_weight: weight,
            queue: VecDeque::new(),
        }
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Positive weight, non-empty, and admitting `requester`.
    pub fn is_eligible(&self, requester: &Requester) -> bool {
        self.weight > 0 && !self.queue.is_empty() && self.key.admits(requester)
    }

    fn set_weight(&mut self, weight: u32) {
        self.weight = weight;
        self.base_weight = weight;
    }

    #[cfg(test)]
    pub(crate) fn for_test(key: GroupKey, weight: u32, len: usize) -> Self {
        let plan = tests::tiny_plan();
        let mut g = Self::new(key, weight);
        g.queue.extend((0..len).map(|_| ReadyInst::new(plan.clone(), 0)));
        g
    }
}

impl std::fmt::Debug for QueueGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueGroup")
            .field("key", &self.key)
            .field("weight", &self.weight)
            .field("len", &self.queue.len())
            .finish()
    }
}

// ── Pool ───────────────────────────────────────────────────────────

struct PoolState {
    /// Groups in creation order.
    groups: Vec<QueueGroup>,
    index: HashMap<GroupKey, usize>,
    policy: Box<dyn SelectionPolicy>,
    /// Plans submitted and not yet unregistered.
    plans: HashSet<u64>,
    /// Plans whose groups were zeroed by `disable_plan`. Groups created for
    /// them afterwards start disabled too.
    disabled: HashSet<u64>,
}

impl PoolState {
    fn group_mut(&mut self, key: GroupKey) -> &mut QueueGroup {
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => {
                let weight = self.policy.initial_weight(&key);
                let mut group = QueueGroup::new(key, weight);
                if self.disabled.contains(&key.plan) {
                    group.weight = 0;
                }
                self.groups.push(group);
                self.index.insert(key, self.groups.len() - 1);
                tracing::trace!("new queue group {key:?} (weight {weight})");
                self.groups.len() - 1
            }
        };
        &mut self.groups[slot]
    }

    fn remove_where(&mut self, mut pred: impl FnMut(&GroupKey) -> bool) -> usize {
        let mut dropped = 0;
        let policy = &mut self.policy;
        self.groups.retain(|g| {
            if pred(&g.key) {
                dropped += g.queue.len();
                policy.forget(&g.key);
                false
            } else {
                true
            }
        });
        self.index = self.groups.iter().enumerate().map(|(i, g)| (g.key, i)).collect();
        dropped
    }
}

/// Counters of a [`ReadyPool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub pushed: u64,
    pub fetched: u64,
    pub queued: usize,
    pub groups: usize,
    pub ref_workers: usize,
    pub num_plans: usize,
}

/// Multi-group ready queue shared by every worker pool of a process.
pub struct ReadyPool {
    state: Mutex<PoolState>,
    pushed: AtomicU64,
    fetched: AtomicU64,
    ref_workers: AtomicUsize,
}

impl ReadyPool {
    pub fn new(policy: Box<dyn SelectionPolicy>) -> Self {
        tracing::debug!("ready pool created with {} selection", policy.name());
        Self {
            state: Mutex::new(PoolState {
                groups: Vec::new(),
                index: HashMap::new(),
                policy,
                plans: HashSet::new(),
                disabled: HashSet::new(),
            }),
            pushed: AtomicU64::new(0),
            fetched: AtomicU64::new(0),
            ref_workers: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Critical sections leave the state consistent even if a panic
        // unwinds through a caller.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policy_name(&self) -> String {
        self.lock().policy.name().to_string()
    }

    // ── Push / fetch ───────────────────────────────────────────────

    /// Appends `items` to the tails of their queue groups.
    pub fn push(&self, items: impl IntoIterator<Item = ReadyInst>) {
        let mut state = self.lock();
        let mut n = 0u64;
        for item in items {
            let key = GroupKey::of(&item);
            state.group_mut(key).queue.push_back(item);
            n += 1;
        }
        drop(state);
        self.pushed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn push_one(&self, item: ReadyInst) {
        self.push(std::iter::once(item));
    }

    /// Removes up to `max` instructions `requester` may execute.
    ///
    /// Never blocks. Returns an empty vector when nothing eligible is
    /// queued.
    pub fn fetch(&self, max: usize, requester: &Requester) -> Vec<ReadyInst> {
        let mut out = Vec::with_capacity(max.min(64));
        let mut state = self.lock();
        let PoolState { groups, policy, .. } = &mut *state;
        while out.len() < max {
            let Some(slot) = policy.select(groups, requester) else {
                break;
            };
            match groups[slot].queue.pop_front() {
                Some(item) => out.push(item),
                None => break,
            }
        }
        drop(state);
        self.fetched.fetch_add(out.len() as u64, Ordering::Relaxed);
        out
    }

    // ── Weights ────────────────────────────────────────────────────

    /// Sets the weight of one group, creating it if needed.
    pub fn set_group_weight(&self, key: GroupKey, weight: u32) {
        self.lock().group_mut(key).set_weight(weight);
    }

    /// Sets the weight of every existing group of `plan`.
    pub fn set_plan_weight(&self, plan: u64, weight: u32) {
        for g in self.lock().groups.iter_mut().filter(|g| g.key.plan == plan) {
            g.set_weight(weight);
        }
    }

    /// Sets the weight of every existing group of one layer of `plan`.
    pub fn set_layer_weight(&self, plan: u64, layer: usize, weight: u32) {
        for g in self
            .lock()
            .groups
            .iter_mut()
            .filter(|g| g.key.plan == plan && g.key.layer == layer)
        {
            g.set_weight(weight);
        }
    }

    /// Zeroes every group of a finished plan so no fetch selects it.
    ///
    /// Empty groups still at the policy's initial weight are dropped, so a
    /// long-lived pool fed fresh plans does not accumulate groups. The
    /// remaining groups get their configured weights back on the next
    /// [`register_plan`](Self::register_plan).
    pub fn disable_plan(&self, plan: u64) {
        let mut state = self.lock();
        let idle: HashSet<GroupKey> = state
            .groups
            .iter()
            .filter(|g| {
                g.key.plan == plan && g.queue.is_empty() && g.base_weight == state.policy.initial_weight(&g.key)
            })
            .map(|g| g.key)
            .collect();
        let removed = if idle.is_empty() {
            0
        } else {
            let before = state.groups.len();
            state.remove_where(|k| idle.contains(k));
            before - state.groups.len()
        };
        let mut disabled = 0;
        for g in state.groups.iter_mut().filter(|g| g.key.plan == plan) {
            g.weight = 0;
            disabled += 1;
        }
        state.disabled.insert(plan);
        tracing::debug!("plan {plan}: {disabled} queue groups disabled, {removed} dropped");
    }

    // ── Plans and workers ──────────────────────────────────────────

    /// Records a plan submission and re-enables its groups.
    pub fn register_plan(&self, plan: u64) {
        let mut state = self.lock();
        for g in state.groups.iter_mut().filter(|g| g.key.plan == plan) {
            g.weight = g.base_weight;
        }
        state.disabled.remove(&plan);
        state.plans.insert(plan);
    }

    /// Drops the plan's groups. Returns how many queued instructions were
    /// discarded with them.
    pub fn unregister_plan(&self, plan: u64) -> usize {
        let mut state = self.lock();
        let dropped = state.remove_where(|k| k.plan == plan);
        state.plans.remove(&plan);
        state.disabled.remove(&plan);
        drop(state);
        if dropped > 0 {
            tracing::warn!("plan {plan} unregistered with {dropped} queued instructions");
        }
        dropped
    }

    /// Plans currently registered.
    pub fn num_plans(&self) -> usize {
        self.lock().plans.len()
    }

    pub fn attach_worker(&self) {
        self.ref_workers.fetch_add(1, Ordering::AcqRel);
    }

    pub fn detach_worker(&self) {
        let _ = self
            .ref_workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Number of workers currently attached.
    pub fn ref_workers(&self) -> usize {
        self.ref_workers.load(Ordering::Acquire)
    }

    // ── Inspection ─────────────────────────────────────────────────

    /// Queued instructions across all groups.
    pub fn len(&self) -> usize {
        self.lock().groups.iter().map(QueueGroup::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn plan_len(&self, plan: u64) -> usize {
        self.lock()
            .groups
            .iter()
            .filter(|g| g.key.plan == plan)
            .map(QueueGroup::len)
            .sum()
    }

    pub fn num_groups(&self) -> usize {
        self.lock().groups.len()
    }

    /// Weight of the group with `key`, if it exists.
    pub fn group_weight(&self, key: &GroupKey) -> Option<u32> {
        let state = self.lock();
        state.index.get(key).map(|&slot| state.groups[slot].weight)
    }

    /// Removes every group and plan registration. Returns the number of
    /// instructions discarded.
    pub fn reset(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.remove_where(|_| true);
        state.plans.clear();
        state.disabled.clear();
        drop(state);
        tracing::debug!("ready pool reset ({dropped} instructions discarded)");
        dropped
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            pushed: self.pushed.load(Ordering::Relaxed),
            fetched: self.fetched.load(Ordering::Relaxed),
            queued: state.groups.iter().map(QueueGroup::len).sum(),
            groups: state.groups.len(),
            ref_workers: self.ref_workers(),
            num_plans: state.plans.len(),
        }
    }
}

impl Default for ReadyPool {
    fn default() -> Self {
        Self::new(Box::new(RoundRobin::new()))
    }
}

impl std::fmt::Debug for ReadyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyPool").field("stats", &self.stats()).finish()
    }
}

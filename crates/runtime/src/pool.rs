// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Worker pools and plan submission.
//!
//! ```text
//! let pool = WorkerPool::initialize(n, selector, ctx, thresholds)?;
//! pool.attach(rpool)?;                 // every worker fetches from rpool
//! submit_plan(&ctx, &rpool, &plan, &input)?;
//! pool.start()?;
//! block_until_plan_complete(&plan);
//! pool.stop()?;
//! reset_plan_for_rerun(&plan);         // then submit again
//! pool.destroy();
//! ```
//!
//! Several pools, e.g. one per compute device, may share one ready pool.

use crate::{
    CacheThresholds, DeviceSelector, ReadyInst, ReadyPool, RuntimeContext, RuntimeError, Worker,
    WorkerMetrics,
};
use partition_planner::ExecutionPlan;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A fixed set of worker threads serving one compute device.
pub struct WorkerPool {
    selector: DeviceSelector,
    workers: Vec<Worker>,
    rpool: Option<Arc<ReadyPool>>,
}

impl WorkerPool {
    /// Spawns `num_workers` stopped workers. Worker `i` runs as core `i`.
    pub fn initialize(
        num_workers: usize,
        selector: DeviceSelector,
        ctx: Arc<RuntimeContext>,
        thresholds: CacheThresholds,
    ) -> Result<Self, RuntimeError> {
        if num_workers == 0 {
            return Err(RuntimeError::ConfigError("a worker pool needs at least one worker".into()));
        }
        if !selector.is_valid_node() {
            return Err(RuntimeError::ConfigError(format!(
                "compute device {} out of range",
                selector.node
            )));
        }
        thresholds.validate()?;
        let selector = selector.resolve(&ctx);

        let workers = (0..num_workers)
            .map(|i| Worker::spawn(i, selector, Arc::clone(&ctx), thresholds))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::info!(
            "worker pool initialized: {num_workers} workers on {selector}, cache {}±{}",
            thresholds.target,
            thresholds.tolerance
        );
        Ok(Self {
            selector,
            workers,
            rpool: None,
        })
    }

    /// Connects every worker to `rpool`. The pool must be stopped.
    pub fn attach(&mut self, rpool: Arc<ReadyPool>) -> Result<(), RuntimeError> {
        for w in &self.workers {
            w.attach(Arc::clone(&rpool))?;
        }
        tracing::debug!("{} workers attached ({} total)", self.workers.len(), rpool.ref_workers());
        self.rpool = Some(rpool);
        Ok(())
    }

    pub fn ready_pool(&self) -> Option<&Arc<ReadyPool>> {
        self.rpool.as_ref()
    }

    /// Runs every worker.
    pub fn start(&self) -> Result<(), RuntimeError> {
        if self.rpool.is_none() {
            return Err(RuntimeError::NotAttached);
        }
        for w in &self.workers {
            w.run()?;
        }
        tracing::debug!("worker pool on {} started", self.selector);
        Ok(())
    }

    /// Stops every worker, each after its current batch.
    pub fn stop(&self) -> Result<(), RuntimeError> {
        for w in &self.workers {
            w.stop()?;
        }
        tracing::debug!("worker pool on {} stopped", self.selector);
        Ok(())
    }

    /// Kills and joins every worker.
    pub fn destroy(mut self) {
        self.kill_all();
        tracing::info!("worker pool on {} destroyed", self.selector);
    }

    fn kill_all(&mut self) {
        for w in &mut self.workers {
            w.kill();
        }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn selector(&self) -> DeviceSelector {
        self.selector
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn metrics(&self) -> Vec<WorkerMetrics> {
        self.workers.iter().map(Worker::metrics).collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.kill_all();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("selector", &self.selector)
            .field("workers", &self.workers.len())
            .field("attached", &self.rpool.is_some())
            .finish()
    }
}

// ── Plan submission ────────────────────────────────────────────────

/// Loads `input` into the plan and seeds `rpool` with the first ready set.
///
/// The plan must be freshly built or reset. Returns the number of seeded
/// instructions.
pub fn submit_plan(
    ctx: &RuntimeContext,
    rpool: &ReadyPool,
    plan: &Arc<ExecutionPlan>,
    input: &[f32],
) -> Result<usize, RuntimeError> {
    ctx.kernels().covers(plan.network())?;
    plan.load_input(input)?;
    plan.mark_submitted()?;
    rpool.register_plan(plan.id());

    let mut seeded = Vec::new();
    plan.for_each_ready_after_reset(|inst| seeded.push(ReadyInst::new(Arc::clone(plan), inst.index())));
    let n = seeded.len();
    rpool.push(seeded);
    tracing::info!(
        "plan {} submitted: {} instructions, {n} initially ready",
        plan.id(),
        plan.num_instructions()
    );
    Ok(n)
}

/// Busy-polls until the plan's output layer has completed every
/// instruction.
pub fn block_until_plan_complete(plan: &ExecutionPlan) {
    while !plan.is_complete() {
        std::hint::spin_loop();
        std::thread::yield_now();
    }
}

/// As [`block_until_plan_complete`], giving up after `timeout`.
/// Returns whether the plan completed.
pub fn wait_for_plan(plan: &ExecutionPlan, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !plan.is_complete() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::yield_now();
    }
    true
}

/// As [`block_until_plan_complete`], returning early once `cancel` is set.
/// Returns whether the plan completed.
pub fn wait_for_plan_or_cancel(plan: &ExecutionPlan, cancel: &AtomicBool) -> bool {
    while !plan.is_complete() {
        if cancel.load(Ordering::Acquire) {
            tracing::debug!("wait for plan {} cancelled", plan.id());
            return false;
        }
        std::thread::yield_now();
    }
    true
}

/// Returns the plan to its pre-run state so it can be submitted again.
/// No worker may be executing it.
pub fn reset_plan_for_rerun(plan: &ExecutionPlan) {
    plan.reset();
}

/// Discards everything queued in `rpool` and forgets its plans.
pub fn reset_pool(rpool: &ReadyPool) -> usize {
    rpool.reset()
}

// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Worker threads and their run/stop/kill state machine.
//!
//! ```text
//!            run()                 stop()  (waits until parked)
//!  Stopped ─────────► Running ─────────► Stopped
//!     │                  │
//!     └──── kill() ──────┴──────► Killed  (thread exits, joined)
//! ```
//!
//! While `Running`, each iteration rebalances the worker's cache against
//! the ready pool, then drains the number of instructions the cache held
//! at that point. While not `Running` the thread sleeps on a condvar.

use crate::kernels::TileContext;
use crate::propagation::on_completed;
use crate::{
    CacheThresholds, DeviceSelector, ReadyInst, ReadyPool, Requester, RuntimeContext, RuntimeError,
    WorkerCache, WorkerMetrics,
};
use partition_planner::InstructionState;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

/// Lifecycle state of a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
    /// Terminal; the thread exits.
    Killed,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Killed => "killed",
        })
    }
}

// ── Control block ──────────────────────────────────────────────────

struct ControlState {
    state: WorkerState,
    /// The thread is waiting on `wake` (or has exited).
    parked: bool,
    rpool: Option<Arc<ReadyPool>>,
}

struct Control {
    inner: Mutex<ControlState>,
    /// Signalled on every state change.
    wake: Condvar,
    /// Signalled when the thread parks.
    idle: Condvar,
}

impl Control {
    fn new() -> Self {
        Self {
            inner: Mutex::new(ControlState {
                state: WorkerState::Stopped,
                parked: false,
                rpool: None,
            }),
            wake: Condvar::new(),
            idle: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_running(&self) -> bool {
        self.lock().state == WorkerState::Running
    }

    /// Parks until the worker is running, returning its ready pool, or
    /// `None` once it is killed.
    fn wait_for_run(&self) -> Option<Arc<ReadyPool>> {
        let mut st = self.lock();
        loop {
            match (st.state, st.rpool.as_ref()) {
                (WorkerState::Running, Some(rpool)) => {
                    let rpool = Arc::clone(rpool);
                    st.parked = false;
                    return Some(rpool);
                }
                (WorkerState::Killed, _) => {
                    st.parked = true;
                    self.idle.notify_all();
                    return None;
                }
                _ => {}
            }
            if !st.parked {
                st.parked = true;
                self.idle.notify_all();
            }
            st = self.wake.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[derive(Default)]
struct Counters {
    executed: AtomicU64,
    skipped: AtomicU64,
    batches: AtomicU64,
}

struct Shared {
    control: Control,
    counters: Counters,
}

// ── Worker handle ──────────────────────────────────────────────────

/// One OS thread executing instructions for one compute device.
pub struct Worker {
    id: usize,
    selector: DeviceSelector,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns the thread in the `Stopped` state.
    ///
    /// The worker requests work as core `id` of `selector.node`, or as no
    /// particular core once `id` is past the core-mask width.
    pub fn spawn(
        id: usize,
        selector: DeviceSelector,
        ctx: Arc<RuntimeContext>,
        thresholds: CacheThresholds,
    ) -> Result<Self, RuntimeError> {
        let shared = Arc::new(Shared {
            control: Control::new(),
            counters: Counters::default(),
        });
        let mut runner = Runner {
            id,
            requester: Requester::for_worker(selector.node, id),
            selector,
            ctx,
            shared: Arc::clone(&shared),
            cache: WorkerCache::new(thresholds),
            scratch: Vec::new(),
        };
        let handle = std::thread::Builder::new()
            .name(format!("tile-worker-{id}"))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| runner.main()));
                if result.is_err() {
                    // Shared counters may be inconsistent; continuing is unsafe.
                    tracing::error!("worker {id} hit a fatal error, aborting");
                    std::process::abort();
                }
            })?;
        tracing::debug!("worker {id} spawned on {selector}");
        Ok(Self {
            id,
            selector,
            shared,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn selector(&self) -> DeviceSelector {
        self.selector
    }

    pub fn state(&self) -> WorkerState {
        self.shared.control.lock().state
    }

    /// Binds the worker to `rpool`, replacing any previous pool.
    pub fn attach(&self, rpool: Arc<ReadyPool>) -> Result<(), RuntimeError> {
        let mut st = self.shared.control.lock();
        match st.state {
            WorkerState::Running => return Err(RuntimeError::AlreadyRunning { worker: self.id }),
            WorkerState::Killed => return Err(RuntimeError::WorkerKilled { worker: self.id }),
            WorkerState::Stopped => {}
        }
        rpool.attach_worker();
        if let Some(old) = st.rpool.replace(rpool) {
            old.detach_worker();
        }
        Ok(())
    }

    /// Stopped → Running.
    pub fn run(&self) -> Result<(), RuntimeError> {
        let mut st = self.shared.control.lock();
        match st.state {
            WorkerState::Running => {
                tracing::warn!("run() on worker {} which is already running", self.id);
                Err(RuntimeError::AlreadyRunning { worker: self.id })
            }
            WorkerState::Killed => Err(RuntimeError::WorkerKilled { worker: self.id }),
            WorkerState::Stopped if st.rpool.is_none() => Err(RuntimeError::NotAttached),
            WorkerState::Stopped => {
                st.state = WorkerState::Running;
                self.shared.control.wake.notify_all();
                Ok(())
            }
        }
    }

    /// Running → Stopped. Blocks until the worker finishes its current
    /// batch and parks.
    pub fn stop(&self) -> Result<(), RuntimeError> {
        let control = &self.shared.control;
        let mut st = control.lock();
        match st.state {
            WorkerState::Stopped => {
                tracing::warn!("stop() on worker {} which is already stopped", self.id);
                Err(RuntimeError::AlreadyStopped { worker: self.id })
            }
            WorkerState::Killed => Err(RuntimeError::WorkerKilled { worker: self.id }),
            WorkerState::Running => {
                st.state = WorkerState::Stopped;
                control.wake.notify_all();
                while !st.parked {
                    st = control.idle.wait(st).unwrap_or_else(PoisonError::into_inner);
                }
                Ok(())
            }
        }
    }

    /// Ends the thread from any state and joins it.
    pub fn kill(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let rpool = {
            let mut st = self.shared.control.lock();
            st.state = WorkerState::Killed;
            self.shared.control.wake.notify_all();
            st.rpool.take()
        };
        if handle.join().is_err() {
            tracing::error!("worker {} thread panicked", self.id);
        }
        if let Some(rpool) = rpool {
            rpool.detach_worker();
        }
        tracing::debug!("worker {} killed", self.id);
    }

    pub fn metrics(&self) -> WorkerMetrics {
        let c = &self.shared.counters;
        WorkerMetrics {
            worker: self.id,
            device: self.selector,
            executed: c.executed.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            batches: c.batches.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.kill();
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("selector", &self.selector)
            .field("state", &self.state())
            .finish()
    }
}

// ── Thread body ────────────────────────────────────────────────────

struct Runner {
    id: usize,
    requester: Requester,
    selector: DeviceSelector,
    ctx: Arc<RuntimeContext>,
    shared: Arc<Shared>,
    cache: WorkerCache,
    scratch: Vec<f32>,
}

impl Runner {
    fn main(&mut self) {
        while let Some(rpool) = self.shared.control.wait_for_run() {
            tracing::trace!("worker {} running", self.id);
            while self.shared.control.is_running() {
                if self.run_batch(&rpool) == 0 {
                    std::thread::yield_now();
                }
            }
            // Nothing stays stranded in a parked worker.
            let returned = self.cache.flush(&rpool);
            if returned > 0 {
                tracing::trace!("worker {} returned {returned} instructions on stop", self.id);
            }
        }
    }

    /// One rebalance plus one drain. Returns the number of instructions
    /// processed.
    fn run_batch(&mut self, rpool: &ReadyPool) -> usize {
        self.cache.rebalance(rpool, &self.requester);
        let n = self.cache.len();
        for _ in 0..n {
            let Some(ready) = self.cache.pop_front() else {
                break;
            };
            self.execute(&ready);
            on_completed(&ready, Some((&mut self.cache, &self.requester)), rpool);
        }
        if n > 0 {
            self.shared.counters.batches.fetch_add(1, Ordering::Relaxed);
        }
        n
    }

    fn execute(&mut self, ready: &ReadyInst) {
        let plan = ready.plan();
        let inst = ready.instruction();
        let state = inst.state();
        if state != InstructionState::Ready {
            self.fatal(format_args!(
                "instruction {} of plan {} fetched in state {state}",
                inst.index(),
                plan.id()
            ));
        }

        let layer = plan.layer_def(inst.layer());
        let Some(kernel) = self.ctx.kernels().get(layer.layer_type).cloned() else {
            self.fatal(format_args!(
                "no kernel for layer '{}' ({})",
                layer.name, layer.layer_type
            ));
        };

        let counters = &self.shared.counters;
        if kernel.supports(self.selector.kind) {
            let mut tile = TileContext::new(plan, inst, &mut self.scratch);
            if let Err(e) = kernel.execute(&mut tile) {
                self.fatal(format_args!("instruction {}: {e}", inst.index()));
            }
            counters.executed.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                "worker {} executed #{} ({} rows {:?} cols {:?})",
                self.id,
                inst.index(),
                layer.name,
                inst.row_range(),
                inst.col_range()
            );
        } else {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                "worker {} skipped #{}: {} unsupported on {}",
                self.id,
                inst.index(),
                kernel.name(),
                self.selector.kind
            );
        }

        if let Err(state) = inst.mark_completed() {
            self.fatal(format_args!(
                "instruction {} of plan {} completed from state {state}",
                inst.index(),
                plan.id()
            ));
        }
    }

    fn fatal(&self, msg: std::fmt::Arguments<'_>) -> ! {
        tracing::error!("worker {}: {msg}", self.id);
        panic!("worker {}: {msg}", self.id);
    }
}

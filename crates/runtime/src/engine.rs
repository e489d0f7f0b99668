// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The inference engine with a type-state–enforced pipeline.
//!
//! ```text
//! InferenceEngine<Idle>
//!     │  .load_model() / .load_network()
//!     ▼
//! InferenceEngine<Planned>     plan built, affinities assigned
//!     │  .prepare()
//!     ▼
//! InferenceEngine<Ready>       ready pool + worker pools attached
//!     │  .run(input).await     (repeatable)
//!     ▼
//!   InferenceOutput
//! ```
//!
//! Each state transition consumes the old value and returns a new one,
//! making invalid state sequences a compile error. The data a state needs
//! lives in its marker, so no accessor has to unwrap.

use crate::{
    reset_plan_for_rerun, submit_plan, wait_for_plan_or_cancel, DeviceSelector, InferenceMetrics,
    ReadyPool, RuntimeConfig, RuntimeContext, RuntimeError, WorkerPool,
};
use model_ir::graph::Validated;
use model_ir::{Network, NetworkBuilder, NetworkManifest};
use partition_planner::{ExecutionPlan, PlanBuilder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

// ── Type-state markers ─────────────────────────────────────────────

/// Engine is created but no network is loaded.
#[derive(Debug)]
pub struct Idle;

/// Network is loaded and an execution plan has been built.
#[derive(Debug)]
pub struct Planned {
    ctx: Arc<RuntimeContext>,
    plan: Arc<ExecutionPlan>,
    /// Devices the strategy pinned work to; empty means any device.
    devices: Vec<usize>,
}

/// Workers are spawned and attached; the engine can run inference.
pub struct Ready {
    ctx: Arc<RuntimeContext>,
    plan: Arc<ExecutionPlan>,
    rpool: Arc<ReadyPool>,
    pools: Arc<Vec<WorkerPool>>,
    /// Serialises runs; the plan supports one run in flight. The blocking
    /// wait of a run owns the guard, so a dropped run still finishes
    /// stopping the pools before the next one starts.
    run_lock: Arc<tokio::sync::Mutex<()>>,
}

impl std::fmt::Debug for Ready {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ready")
            .field("plan", &self.plan.id())
            .field("pools", &self.pools.len())
            .field("policy", &self.rpool.policy_name())
            .finish()
    }
}

/// Sealed trait for engine states.
pub trait EngineState: std::fmt::Debug {}
impl EngineState for Idle {}
impl EngineState for Planned {}
impl EngineState for Ready {}

// ── Inference output ───────────────────────────────────────────────

/// The result of a single inference run.
#[derive(Debug)]
pub struct InferenceOutput {
    /// Output layer values in the plan's dense layout.
    pub output: Vec<f32>,
    /// Tiling, worker and pool metrics of this run.
    pub metrics: InferenceMetrics,
}

// ── Engine ─────────────────────────────────────────────────────────

/// The primary inference engine.
///
/// `S` is a type-state marker that enforces the pipeline ordering at
/// compile time. You cannot call `.run()` on an `Idle` engine or
/// `.load_model()` on a `Ready` engine.
///
/// # Example
/// ```no_run
/// use runtime::{InferenceEngine, RuntimeConfig};
///
/// # async fn example() -> Result<(), runtime::RuntimeError> {
/// let engine = InferenceEngine::new(RuntimeConfig::default())
///     .load_model()?
///     .prepare()?;
/// let input = vec![0.0; engine.input_len()];
/// let output = engine.run(&input).await?;
/// println!("{}", output.metrics.summary());
/// # Ok(())
/// # }
/// ```
pub struct InferenceEngine<S: EngineState = Idle> {
    config: RuntimeConfig,
    state: S,
}

// ── Idle → Planned ─────────────────────────────────────────────────

impl InferenceEngine<Idle> {
    /// Creates a new engine from the given configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        tracing::info!(
            "engine created with offload '{}' and policy '{}'",
            config.offload,
            config.selection_policy
        );
        Self { config, state: Idle }
    }

    /// Loads the network named by `model_path`, or the synthetic network
    /// when none is set, and plans it.
    pub fn load_model(self) -> Result<InferenceEngine<Planned>, RuntimeError> {
        let network = match &self.config.model_path {
            Some(path) => {
                tracing::info!("loading network manifest {}", path.display());
                NetworkManifest::from_file(path)?.build()?
            }
            None => {
                tracing::info!("no model path, using the synthetic network");
                NetworkBuilder::synthetic(self.config.seed)?
            }
        };
        self.load_network(network)
    }

    /// Plans an already built network. Transitions to `Planned`.
    ///
    /// Steps:
    /// 1. Parse the memory budget and build the runtime context.
    /// 2. Tile the network into an execution plan.
    /// 3. Assign device affinities with the configured strategy.
    /// 4. Check that every layer type has a kernel.
    pub fn load_network(
        self,
        network: Network<Validated>,
    ) -> Result<InferenceEngine<Planned>, RuntimeError> {
        tracing::info!("{}", network.summary());
        let budget = self.config.parse_budget()?;
        tracing::info!("memory budget: {budget}");
        let ctx = Arc::new(RuntimeContext::cpu(budget));
        ctx.kernels().covers(&network)?;

        let plan = PlanBuilder::new(Arc::new(network))
            .batch(self.config.batch_size)
            .tiling(self.config.tiling()?)
            .build(ctx.memory())?;

        let strategy = self.config.create_strategy()?;
        strategy.assign(&plan)?;
        tracing::info!("affinities assigned by '{}'", strategy.name());
        tracing::info!("{}", plan.summary());

        Ok(InferenceEngine {
            config: self.config,
            state: Planned {
                ctx,
                plan: Arc::new(plan),
                devices: strategy.devices(),
            },
        })
    }
}

// ── Planned → Ready ────────────────────────────────────────────────

impl InferenceEngine<Planned> {
    pub fn plan(&self) -> &ExecutionPlan {
        &self.state.plan
    }

    pub fn network(&self) -> &Network<Validated> {
        self.state.plan.network()
    }

    /// Spawns the worker pools and attaches them to a fresh ready pool.
    /// Transitions to `Ready`.
    ///
    /// Every device the strategy assigned work to gets its own pool, all
    /// sharing the ready pool. A strategy that leaves devices open runs on
    /// one pool for the edge device.
    pub fn prepare(self) -> Result<InferenceEngine<Ready>, RuntimeError> {
        let Planned { ctx, plan, devices } = self.state;
        let thresholds = self.config.cache_thresholds()?;
        let num_workers = self.config.resolve_workers();
        let rpool = Arc::new(ReadyPool::new(self.config.create_policy()?));

        let devices = if devices.is_empty() {
            vec![self.config.edge_device]
        } else {
            devices
        };
        let mut pools = Vec::with_capacity(devices.len());
        for device in devices {
            let mut pool = WorkerPool::initialize(
                num_workers,
                DeviceSelector::cpu(device),
                Arc::clone(&ctx),
                thresholds,
            )?;
            pool.attach(Arc::clone(&rpool))?;
            pools.push(pool);
        }
        tracing::info!(
            "engine ready: {} pool(s) of {num_workers} workers, policy '{}'",
            pools.len(),
            rpool.policy_name()
        );

        Ok(InferenceEngine {
            config: self.config,
            state: Ready {
                ctx,
                plan,
                rpool,
                pools: Arc::new(pools),
                run_lock: Arc::new(tokio::sync::Mutex::new(())),
            },
        })
    }
}

// ── Ready: run inference ───────────────────────────────────────────

impl InferenceEngine<Ready> {
    pub fn plan(&self) -> &ExecutionPlan {
        &self.state.plan
    }

    pub fn network(&self) -> &Network<Validated> {
        self.state.plan.network()
    }

    pub fn ready_pool(&self) -> &ReadyPool {
        &self.state.rpool
    }

    pub fn pools(&self) -> &[WorkerPool] {
        &self.state.pools
    }

    /// Number of input values one run expects.
    pub fn input_len(&self) -> usize {
        self.network().input_len(self.plan().batch())
    }

    /// Runs the plan once on `input`.
    ///
    /// The workers start, the calling task waits on a blocking thread
    /// until the output layer completes, and the workers stop again before
    /// the output is read. Concurrent calls queue behind each other.
    ///
    /// Dropping the returned future ends the blocking wait and stops the
    /// workers; the next run resets the plan.
    pub async fn run(&self, input: &[f32]) -> Result<InferenceOutput, RuntimeError> {
        let guard = Arc::clone(&self.state.run_lock).lock_owned().await;
        let Ready {
            ctx,
            plan,
            rpool,
            pools,
            ..
        } = &self.state;

        if plan.is_submitted() {
            let stale = rpool.unregister_plan(plan.id());
            if stale > 0 {
                tracing::debug!("dropped {stale} stale instructions of plan {}", plan.id());
            }
            reset_plan_for_rerun(plan);
        }

        let workers_before: Vec<_> = pools.iter().flat_map(|p| p.metrics()).collect();
        let pool_before = rpool.stats();
        let run_start = Instant::now();

        submit_plan(ctx, rpool, plan, input)?;
        for pool in pools.iter() {
            pool.start()?;
        }

        let cancel = CancelOnDrop(Arc::new(AtomicBool::new(false)));
        let waiting_cancel = Arc::clone(&cancel.0);
        let waiting_plan = Arc::clone(plan);
        let waiting_pools = Arc::clone(pools);
        let completed = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let completed = wait_for_plan_or_cancel(&waiting_plan, &waiting_cancel);
            waiting_pools.iter().try_for_each(WorkerPool::stop)?;
            Ok::<_, RuntimeError>(completed)
        })
        .await
        .map_err(|e| RuntimeError::TaskFailed(e.to_string()))??;
        if !completed {
            return Err(RuntimeError::TaskFailed(format!("run of plan {} cancelled", plan.id())));
        }
        let total = run_start.elapsed();

        let output = plan.read_output()?;
        let mut metrics = InferenceMetrics::from_plan(plan);
        if self.config.enable_profiling {
            let workers = pools
                .iter()
                .flat_map(|p| p.metrics())
                .zip(&workers_before)
                .map(|(now, before)| now.since(before))
                .collect();
            metrics.finalise(total, workers, &pool_before, &rpool.stats());
            tracing::info!("{}", metrics.summary());
        } else {
            metrics.total_duration = total;
        }

        Ok(InferenceOutput { output, metrics })
    }

    /// Kills every worker and releases the plan.
    pub fn shutdown(self) {
        let Ready { rpool, pools, plan, .. } = self.state;
        match Arc::try_unwrap(pools) {
            Ok(pools) => pools.into_iter().for_each(WorkerPool::destroy),
            // A cancelled run still holds the pools; they die with it.
            Err(_) => tracing::warn!("worker pools still referenced at shutdown"),
        }
        rpool.unregister_plan(plan.id());
        tracing::info!("engine for plan {} shut down", plan.id());
    }
}

/// Raises its flag when dropped, ending the blocking wait of a run whose
/// future went away.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

impl<S: EngineState> InferenceEngine<S> {
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl<S: EngineState> std::fmt::Debug for InferenceEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("state", &std::any::type_name::<S>())
            .field("offload", &self.config.offload)
            .field("policy", &self.config.selection_policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference;
    use model_ir::Activation;
    use partition_planner::{FullLocal, PartitionStrategy};

    fn small_network() -> Network<Validated> {
        let mut b = NetworkBuilder::new("engine-test", 4, 8, 8);
        b.conv("c1", 8, 3, 1, 1, Activation::Relu);
        b.conv("c2", 4, 3, 1, 1, Activation::None);
        b.residual("add", 0, Activation::None);
        b.build().unwrap()
    }

    fn config() -> RuntimeConfig {
        RuntimeConfig {
            num_workers: Some(3),
            flop_per_instruction: 4096,
            memory_budget: "16M".into(),
            ..Default::default()
        }
    }

    fn input(len: usize) -> Vec<f32> {
        (0..len).map(|i| ((i % 13) as f32 - 6.0) / 6.0).collect()
    }

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() <= 1e-4 * (1.0 + y.abs()), "{x} vs {y}");
        }
    }

    #[test]
    fn test_idle_to_planned() {
        let engine = InferenceEngine::new(config()).load_network(small_network()).unwrap();
        assert_eq!(engine.network().num_layers(), 4);
        assert!(engine.plan().layer(1).num_instructions > 1);
    }

    #[test]
    fn test_bad_config_rejected() {
        let cfg = RuntimeConfig {
            offload: "teleport".into(),
            ..config()
        };
        assert!(InferenceEngine::new(cfg).load_network(small_network()).is_err());

        let cfg = RuntimeConfig {
            selection_policy: "lottery".into(),
            ..config()
        };
        let planned = InferenceEngine::new(cfg).load_network(small_network()).unwrap();
        assert!(planned.prepare().is_err());
    }

    #[tokio::test]
    async fn test_full_pipeline_matches_reference() {
        let engine = InferenceEngine::new(config())
            .load_network(small_network())
            .unwrap()
            .prepare()
            .unwrap();
        let x = input(engine.input_len());
        let out = engine.run(&x).await.unwrap();

        let expected = reference::evaluate_output(engine.network(), 1, &x).unwrap();
        assert_close(&out.output, &expected);
        assert_eq!(out.metrics.executed as usize, out.metrics.instructions_total);
        assert_eq!(out.metrics.skipped, 0);
        assert_eq!(out.metrics.workers.len(), 3);
        assert!(out.metrics.total_duration.as_nanos() > 0);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_multiple_runs_are_identical() {
        let engine = InferenceEngine::new(config())
            .load_network(small_network())
            .unwrap()
            .prepare()
            .unwrap();
        let x = input(engine.input_len());
        let first = engine.run(&x).await.unwrap();
        for _ in 0..3 {
            let again = engine.run(&x).await.unwrap();
            assert_eq!(again.output, first.output);
            assert_eq!(again.metrics.executed, first.metrics.executed);
        }
        assert_eq!(engine.ready_pool().len(), 0);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_partial_offload_uses_two_pools() {
        let cfg = RuntimeConfig {
            offload: "partial-offload".into(),
            split_layer: 1,
            offload_ratio: 0.5,
            ..config()
        };
        let engine = InferenceEngine::new(cfg)
            .load_network(small_network())
            .unwrap()
            .prepare()
            .unwrap();
        assert_eq!(engine.pools().len(), 2);
        assert_eq!(engine.ready_pool().ref_workers(), 6);

        let x = input(engine.input_len());
        let out = engine.run(&x).await.unwrap();
        let expected = reference::evaluate_output(engine.network(), 1, &x).unwrap();
        assert_close(&out.output, &expected);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_offload_alias_spawns_server_pool() {
        let cfg = RuntimeConfig {
            offload: "sequential".into(),
            split_layer: 1,
            num_workers: Some(2),
            ..config()
        };
        let engine = InferenceEngine::new(cfg)
            .load_network(small_network())
            .unwrap()
            .prepare()
            .unwrap();
        assert_eq!(engine.pools().len(), 2);
        assert_eq!(engine.pools()[1].selector(), DeviceSelector::cpu(1));

        let x = input(engine.input_len());
        let out = tokio::time::timeout(std::time::Duration::from_secs(60), engine.run(&x))
            .await
            .expect("run finished")
            .unwrap();
        let expected = reference::evaluate_output(engine.network(), 1, &x).unwrap();
        assert_close(&out.output, &expected);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_dropped_run_stops_workers() {
        let engine = InferenceEngine::new(config())
            .load_network(small_network())
            .unwrap()
            .prepare()
            .unwrap();
        // Route the output layer to a device no pool serves.
        let last = engine.plan().num_layers() - 1;
        for inst in engine.plan().layer_instructions(last) {
            inst.affinity().clear_compute_devices();
            inst.affinity().set_compute_device(5);
        }
        let x = input(engine.input_len());
        let stalled = tokio::time::timeout(std::time::Duration::from_millis(200), engine.run(&x)).await;
        assert!(stalled.is_err());

        FullLocal::new(0).assign(engine.plan()).unwrap();
        let out = engine.run(&x).await.unwrap();
        let expected = reference::evaluate_output(engine.network(), 1, &x).unwrap();
        assert_close(&out.output, &expected);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_wrong_input_length() {
        let engine = InferenceEngine::new(config())
            .load_network(small_network())
            .unwrap()
            .prepare()
            .unwrap();
        assert!(engine.run(&[0.0; 3]).await.is_err());
        // A failed submission leaves the engine usable.
        let x = input(engine.input_len());
        assert!(engine.run(&x).await.is_ok());
        engine.shutdown();
    }

    #[test]
    fn test_debug_format() {
        let engine = InferenceEngine::new(RuntimeConfig::default());
        let debug = format!("{engine:?}");
        assert!(debug.contains("InferenceEngine"));
        assert!(debug.contains("full-local"));
    }
}

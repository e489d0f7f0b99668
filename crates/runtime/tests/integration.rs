// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: end-to-end scheduling of tiled plans.
//!
//! These tests exercise the complete flow from network construction →
//! tiling → submission → concurrent execution, and check scheduled
//! results against the direct reference evaluation.

use memory_manager::{MemoryBudget, MemoryPool};
use model_ir::{graph::Validated, Activation, Network, NetworkBuilder};
use partition_planner::{
    pin_cores_randomly, ExecutionPlan, InstructionState, PartitionStrategy, PlanBuilder,
    SequentialOffload, TilingConfig,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use runtime::{
    block_until_plan_complete, on_completed, reference, reset_plan_for_rerun, submit_plan,
    wait_for_plan, CacheThresholds, DeviceSelector, InferenceEngine, Priority, ReadyInst,
    ReadyPool, Requester, RuntimeConfig, RuntimeContext, Weighted, WorkerPool,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Helpers ────────────────────────────────────────────────────────

/// `input → conv3x3 → add(input)` on a 4 × 8 × 8 input.
fn conv_residual() -> Network<Validated> {
    let mut b = NetworkBuilder::new("conv-residual", 4, 8, 8);
    b.conv("conv", 4, 3, 1, 1, Activation::Relu);
    b.residual("add", 0, Activation::None);
    b.build().unwrap()
}

/// Two branches off the input joined by a residual:
///
/// ```text
///        ┌─► a (1x1 conv) ─┐
/// input ─┤                 ├─► join
///        └─► b (3x3 conv) ─┘
/// ```
fn diamond() -> Network<Validated> {
    let mut b = NetworkBuilder::new("diamond", 4, 8, 8);
    let a = b.conv("a", 6, 1, 1, 0, Activation::None);
    b.at(0);
    b.conv("b", 6, 3, 1, 1, Activation::Relu);
    b.residual("join", a, Activation::None);
    b.build().unwrap()
}

fn small_tiles() -> TilingConfig {
    TilingConfig {
        flop_per_instruction: 2048,
        ..Default::default()
    }
}

fn plan_for(network: Network<Validated>, batch: usize, memory: &MemoryPool) -> Arc<ExecutionPlan> {
    let plan = PlanBuilder::new(Arc::new(network))
        .batch(batch)
        .tiling(small_tiles())
        .build(memory)
        .unwrap();
    Arc::new(plan)
}

fn ctx() -> Arc<RuntimeContext> {
    Arc::new(RuntimeContext::cpu(MemoryBudget::from_mb(32)))
}

fn random_input(len: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random_range(-1.0..1.0)).collect()
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() <= 1e-4 * (1.0 + e.abs()), "element {i}: {a} vs {e}");
    }
}

/// Instructions a run has to complete (everything but the input layer).
fn work(plan: &ExecutionPlan) -> usize {
    plan.num_instructions() - plan.layer(0).num_instructions
}

// ── Graph mechanics without kernels ────────────────────────────────

#[test]
fn test_diamond_concurrent_manual_drivers() {
    let memory = MemoryPool::new(MemoryBudget::from_mb(16));
    let plan = plan_for(diamond(), 1, &memory);
    assert!(plan.layer(3).num_instructions > 1);

    let rpool = Arc::new(ReadyPool::default());
    rpool.register_plan(plan.id());
    plan.for_each_ready_after_reset(|i| rpool.push_one(ReadyInst::new(Arc::clone(&plan), i.index())));

    let seen: Vec<AtomicBool> = (0..plan.num_instructions()).map(|_| AtomicBool::new(false)).collect();
    let seen = Arc::new(seen);
    let plan_completions = Arc::new(AtomicUsize::new(0));

    let drivers: Vec<_> = (0..4)
        .map(|_| {
            let (plan, rpool) = (Arc::clone(&plan), Arc::clone(&rpool));
            let (seen, plan_completions) = (Arc::clone(&seen), Arc::clone(&plan_completions));
            std::thread::spawn(move || {
                let requester = Requester::on_device(0);
                while !plan.is_complete() {
                    for ready in rpool.fetch(3, &requester) {
                        let inst = ready.instruction();
                        assert_eq!(inst.state(), InstructionState::Ready);
                        assert!(!seen[inst.index() as usize].swap(true, Ordering::SeqCst));
                        inst.mark_completed().unwrap();
                        if on_completed(&ready, None, &rpool).plan_completed {
                            plan_completions.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    std::thread::yield_now();
                }
            })
        })
        .collect();
    for d in drivers {
        d.join().unwrap();
    }

    assert_eq!(plan_completions.load(Ordering::SeqCst), 1);
    assert_eq!(plan.completed_layers(), plan.num_layers());
    for layer in plan.layers() {
        assert_eq!(layer.completed(), layer.num_instructions, "layer {}", layer.index);
    }
    for inst in plan.instructions() {
        assert_eq!(inst.state(), InstructionState::Completed);
        assert_eq!(inst.parents_completed(), inst.num_parents());
    }
    let executed = seen.iter().filter(|s| s.load(Ordering::SeqCst)).count();
    assert_eq!(executed, work(&plan));
    assert!(rpool.is_empty());
}

#[test]
fn test_no_false_completion() {
    let memory = MemoryPool::new(MemoryBudget::from_mb(16));
    let plan = plan_for(conv_residual(), 1, &memory);
    let output_layer = plan.num_layers() - 1;
    let rpool = ReadyPool::default();
    plan.for_each_ready_after_reset(|i| rpool.push_one(ReadyInst::new(Arc::clone(&plan), i.index())));

    // Drain everything but the first output-layer instruction.
    let requester = Requester::on_device(0);
    let mut held = None;
    loop {
        let batch = rpool.fetch(4, &requester);
        if batch.is_empty() {
            break;
        }
        for ready in batch {
            if held.is_none() && ready.instruction().layer() == output_layer {
                held = Some(ready);
                continue;
            }
            ready.instruction().mark_completed().unwrap();
            on_completed(&ready, None, &rpool);
        }
    }

    let held = held.unwrap();
    let out = plan.output_layer();
    assert!(!plan.is_complete());
    assert_eq!(out.completed(), out.num_instructions - 1);
    assert_eq!(plan.completed_layers(), plan.num_layers() - 1);

    held.instruction().mark_completed().unwrap();
    let p = on_completed(&held, None, &rpool);
    assert!(p.layer_completed && p.plan_completed);
    assert!(plan.is_complete());
}

// ── Worker pools ───────────────────────────────────────────────────

#[test]
fn test_conv_residual_matches_reference() {
    let ctx = ctx();
    let plan = plan_for(conv_residual(), 1, ctx.memory());
    assert!(plan.layer(1).num_instructions >= 4);

    let rpool = Arc::new(ReadyPool::default());
    let mut pool =
        WorkerPool::initialize(4, DeviceSelector::cpu(0), Arc::clone(&ctx), CacheThresholds::new(4, 2)).unwrap();
    pool.attach(Arc::clone(&rpool)).unwrap();

    let x = random_input(plan.network().input_len(1), 1);
    submit_plan(&ctx, &rpool, &plan, &x).unwrap();
    pool.start().unwrap();
    assert!(wait_for_plan(&plan, Duration::from_secs(30)));
    pool.stop().unwrap();

    let expected = reference::evaluate_output(plan.network(), 1, &x).unwrap();
    assert_close(&plan.read_output().unwrap(), &expected);

    for layer in plan.layers() {
        assert!(layer.is_complete());
    }
    let executed: u64 = pool.metrics().iter().map(|m| m.executed).sum();
    assert_eq!(executed as usize, work(&plan));
    pool.destroy();
}

#[test]
fn test_intermediate_layers_match_reference() {
    let ctx = ctx();
    let plan = plan_for(diamond(), 2, ctx.memory());
    let rpool = Arc::new(ReadyPool::new(Box::new(Weighted::new())));
    let mut pool =
        WorkerPool::initialize(3, DeviceSelector::cpu(0), Arc::clone(&ctx), CacheThresholds::new(2, 1)).unwrap();
    pool.attach(Arc::clone(&rpool)).unwrap();

    let x = random_input(plan.network().input_len(2), 2);
    submit_plan(&ctx, &rpool, &plan, &x).unwrap();
    pool.start().unwrap();
    block_until_plan_complete(&plan);
    pool.stop().unwrap();

    let expected = reference::evaluate(plan.network(), 2, &x).unwrap();
    for (i, layer) in expected.iter().enumerate() {
        assert_close(&plan.read_layer_output(i).unwrap(), layer);
    }
}

#[test]
fn test_rerun_is_bit_identical() {
    let ctx = ctx();
    let plan = plan_for(NetworkBuilder::synthetic(11).unwrap(), 1, ctx.memory());
    let rpool = Arc::new(ReadyPool::new(Box::new(Priority)));
    let mut pool =
        WorkerPool::initialize(4, DeviceSelector::cpu(0), Arc::clone(&ctx), CacheThresholds::default()).unwrap();
    pool.attach(Arc::clone(&rpool)).unwrap();

    let x = random_input(plan.network().input_len(1), 3);
    let mut outputs = Vec::new();
    for _ in 0..3 {
        submit_plan(&ctx, &rpool, &plan, &x).unwrap();
        pool.start().unwrap();
        block_until_plan_complete(&plan);
        pool.stop().unwrap();
        outputs.push(plan.read_output().unwrap());
        reset_plan_for_rerun(&plan);
    }
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[1], outputs[2]);

    let expected = reference::evaluate_output(plan.network(), 1, &x).unwrap();
    assert_close(&outputs[0], &expected);
}

#[test]
fn test_two_plans_share_one_ready_pool() {
    let ctx = ctx();
    let first = plan_for(conv_residual(), 1, ctx.memory());
    let second = plan_for(diamond(), 1, ctx.memory());
    let rpool = Arc::new(ReadyPool::default());
    let mut pool =
        WorkerPool::initialize(4, DeviceSelector::cpu(0), Arc::clone(&ctx), CacheThresholds::new(3, 1)).unwrap();
    pool.attach(Arc::clone(&rpool)).unwrap();

    let x1 = random_input(first.network().input_len(1), 4);
    let x2 = random_input(second.network().input_len(1), 5);
    submit_plan(&ctx, &rpool, &first, &x1).unwrap();
    submit_plan(&ctx, &rpool, &second, &x2).unwrap();
    assert_eq!(rpool.num_plans(), 2);

    pool.start().unwrap();
    assert!(wait_for_plan(&first, Duration::from_secs(30)));
    assert!(wait_for_plan(&second, Duration::from_secs(30)));
    pool.stop().unwrap();

    assert_close(&first.read_output().unwrap(), &reference::evaluate_output(first.network(), 1, &x1).unwrap());
    assert_close(&second.read_output().unwrap(), &reference::evaluate_output(second.network(), 1, &x2).unwrap());
}

#[test]
fn test_sequential_offload_across_two_pools() {
    let ctx = ctx();
    let plan = plan_for(NetworkBuilder::synthetic(5).unwrap(), 1, ctx.memory());
    SequentialOffload {
        split_layer: 4,
        edge: 0,
        server: 1,
    }
    .assign(&plan)
    .unwrap();

    let rpool = Arc::new(ReadyPool::default());
    let mut edge =
        WorkerPool::initialize(2, DeviceSelector::cpu(0), Arc::clone(&ctx), CacheThresholds::new(4, 2)).unwrap();
    let mut server =
        WorkerPool::initialize(2, DeviceSelector::cpu(1), Arc::clone(&ctx), CacheThresholds::new(4, 2)).unwrap();
    edge.attach(Arc::clone(&rpool)).unwrap();
    server.attach(Arc::clone(&rpool)).unwrap();
    assert_eq!(rpool.ref_workers(), 4);

    let x = random_input(plan.network().input_len(1), 6);
    submit_plan(&ctx, &rpool, &plan, &x).unwrap();
    edge.start().unwrap();
    server.start().unwrap();
    assert!(wait_for_plan(&plan, Duration::from_secs(60)));
    edge.stop().unwrap();
    server.stop().unwrap();

    // Each side ran exactly the instructions pinned to its device.
    let on_edge: usize = (1..=4).map(|l| plan.layer(l).num_instructions).sum();
    let edge_done: u64 = edge.metrics().iter().map(|m| m.executed).sum();
    let server_done: u64 = server.metrics().iter().map(|m| m.executed).sum();
    assert_eq!(edge_done as usize, on_edge);
    assert_eq!(server_done as usize, work(&plan) - on_edge);

    let expected = reference::evaluate_output(plan.network(), 1, &x).unwrap();
    assert_close(&plan.read_output().unwrap(), &expected);
}

#[test]
fn test_core_pinned_instructions_run_on_their_core() {
    let ctx = ctx();
    let plan = plan_for(conv_residual(), 1, ctx.memory());
    pin_cores_randomly(&plan, 3, 9).unwrap();

    let rpool = Arc::new(ReadyPool::default());
    let mut pool =
        WorkerPool::initialize(3, DeviceSelector::cpu(0), Arc::clone(&ctx), CacheThresholds::new(2, 1)).unwrap();
    pool.attach(Arc::clone(&rpool)).unwrap();

    let x = random_input(plan.network().input_len(1), 7);
    submit_plan(&ctx, &rpool, &plan, &x).unwrap();
    pool.start().unwrap();
    assert!(wait_for_plan(&plan, Duration::from_secs(30)));
    pool.stop().unwrap();

    let mut per_core = [0u64; 3];
    for inst in plan.instructions().iter().filter(|i| i.layer() > 0) {
        per_core[inst.affinity().allowed_core_index().unwrap()] += 1;
    }
    for m in pool.metrics() {
        assert_eq!(m.executed, per_core[m.worker]);
    }
    let expected = reference::evaluate_output(plan.network(), 1, &x).unwrap();
    assert_close(&plan.read_output().unwrap(), &expected);
}

#[test]
fn test_gpu_pool_skips_without_computing() {
    let ctx = Arc::new(RuntimeContext::cpu(MemoryBudget::from_mb(16)).with_gpus(1));
    let plan = plan_for(conv_residual(), 1, ctx.memory());
    let rpool = Arc::new(ReadyPool::default());
    let mut pool =
        WorkerPool::initialize(2, DeviceSelector::gpu(0, 0), Arc::clone(&ctx), CacheThresholds::default()).unwrap();
    pool.attach(Arc::clone(&rpool)).unwrap();

    let x = random_input(plan.network().input_len(1), 8);
    submit_plan(&ctx, &rpool, &plan, &x).unwrap();
    pool.start().unwrap();
    assert!(wait_for_plan(&plan, Duration::from_secs(30)));
    pool.stop().unwrap();

    let skipped: u64 = pool.metrics().iter().map(|m| m.skipped).sum();
    let executed: u64 = pool.metrics().iter().map(|m| m.executed).sum();
    assert_eq!(executed, 0);
    assert_eq!(skipped as usize, work(&plan));
    assert!(plan.read_output().unwrap().iter().all(|&v| v == 0.0));
}

#[test]
fn test_concurrent_submitters_share_workers() {
    let ctx = ctx();
    let rpool = Arc::new(ReadyPool::default());
    let mut pool =
        WorkerPool::initialize(4, DeviceSelector::cpu(0), Arc::clone(&ctx), CacheThresholds::new(4, 2)).unwrap();
    pool.attach(Arc::clone(&rpool)).unwrap();
    pool.start().unwrap();

    let failures = Arc::new(Mutex::new(Vec::new()));
    let submitters: Vec<_> = (0..3)
        .map(|s| {
            let (ctx, rpool, failures) = (Arc::clone(&ctx), Arc::clone(&rpool), Arc::clone(&failures));
            std::thread::spawn(move || {
                let plan = plan_for(diamond(), 1, ctx.memory());
                let x = random_input(plan.network().input_len(1), 100 + s);
                submit_plan(&ctx, &rpool, &plan, &x).unwrap();
                if !wait_for_plan(&plan, Duration::from_secs(60)) {
                    failures.lock().unwrap().push(format!("submitter {s} timed out"));
                    return;
                }
                let expected = reference::evaluate_output(plan.network(), 1, &x).unwrap();
                let actual = plan.read_output().unwrap();
                if actual.iter().zip(&expected).any(|(a, e)| (a - e).abs() > 1e-4 * (1.0 + e.abs())) {
                    failures.lock().unwrap().push(format!("submitter {s} mismatched"));
                }
            })
        })
        .collect();
    for s in submitters {
        s.join().unwrap();
    }
    pool.stop().unwrap();
    let failures = failures.lock().unwrap();
    assert!(failures.is_empty(), "{failures:?}");
}

// ── Engine ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_engine_synthetic_network() {
    let config = RuntimeConfig {
        num_workers: Some(4),
        selection_policy: "weighted".into(),
        offload: "random-offload".into(),
        offload_ratio: 0.3,
        memory_budget: "64M".into(),
        ..Default::default()
    };
    let engine = InferenceEngine::new(config).load_model().unwrap().prepare().unwrap();
    assert_eq!(engine.network().name, "synthetic-resnet");
    assert_eq!(engine.pools().len(), 2);

    let x = random_input(engine.input_len(), 10);
    let out = engine.run(&x).await.unwrap();
    let expected = reference::evaluate_output(engine.network(), 1, &x).unwrap();
    assert_close(&out.output, &expected);
    for column in out.output.chunks(10) {
        assert!((column.iter().sum::<f32>() - 1.0).abs() < 1e-4);
    }
    assert_eq!(out.metrics.executed as usize, out.metrics.instructions_total);
    assert!(out.metrics.summary().contains("Inference:"));
    engine.shutdown();
}

#[tokio::test]
async fn test_engine_loads_manifest() {
    let json = r#"{
        "name": "manifest-net",
        "input": { "channels": 2, "height": 4, "width": 4 },
        "layers": [
            { "name": "c", "type": "conv", "out_channels": 2, "kernel": 3, "padding": 1, "activation": "relu" },
            { "name": "add", "type": "residual", "parents": ["c", "input"] },
            { "name": "p", "type": "max_pool", "kernel": 2, "stride": 2 }
        ]
    }"#;
    let path = std::env::temp_dir().join(format!("tile-rt-manifest-{}.json", std::process::id()));
    std::fs::write(&path, json).unwrap();

    let config = RuntimeConfig {
        model_path: Some(path.clone()),
        num_workers: Some(2),
        batch_size: 2,
        memory_budget: "8M".into(),
        ..Default::default()
    };
    let engine = InferenceEngine::new(config).load_model().unwrap().prepare().unwrap();
    std::fs::remove_file(&path).unwrap();

    let x = random_input(engine.input_len(), 12);
    let out = engine.run(&x).await.unwrap();
    assert_eq!(out.output.len(), 2 * 2 * 2 * 2);
    let expected = reference::evaluate_output(engine.network(), 2, &x).unwrap();
    assert_close(&out.output, &expected);
    engine.shutdown();
}

#[test]
fn test_engine_missing_manifest() {
    let config = RuntimeConfig {
        model_path: Some("/nonexistent/net.json".into()),
        ..Default::default()
    };
    assert!(InferenceEngine::new(config).load_model().is_err());
}

// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Inference profiling metrics.
//!
//! [`InferenceMetrics`] combines the static tiling of a plan with what the
//! workers and the ready pool did during one run. These numbers are the
//! primary tool for comparing worker counts, selection policies and
//! offload strategies.

use crate::{DeviceSelector, PoolStats};
use model_ir::LayerType;
use partition_planner::ExecutionPlan;
use std::time::Duration;

/// Tiling of one layer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LayerMetrics {
    pub name: String,
    pub layer_type: LayerType,
    pub instructions: usize,
    pub tile_rows: usize,
    pub tile_cols: usize,
    /// Floating-point operations of the whole layer.
    pub flops: u64,
}

/// Counters of one worker.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct WorkerMetrics {
    pub worker: usize,
    pub device: DeviceSelector,
    /// Instructions a kernel ran for.
    pub executed: u64,
    /// Instructions completed without compute (kernel unsupported on the device).
    pub skipped: u64,
    /// Non-empty cache drains.
    pub batches: u64,
}

impl WorkerMetrics {
    /// Counter growth since `before`.
    pub fn since(&self, before: &WorkerMetrics) -> WorkerMetrics {
        WorkerMetrics {
            executed: self.executed.saturating_sub(before.executed),
            skipped: self.skipped.saturating_sub(before.skipped),
            batches: self.batches.saturating_sub(before.batches),
            ..*self
        }
    }
}

/// Aggregate metrics for one inference run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InferenceMetrics {
    pub plan_id: u64,
    pub batch: usize,
    /// Wall-clock time from submission to completion.
    pub total_duration: Duration,
    pub layers: Vec<LayerMetrics>,
    /// Instructions in the plan, input layer excluded.
    pub instructions_total: usize,
    pub executed: u64,
    pub skipped: u64,
    pub workers: Vec<WorkerMetrics>,
    pub pool_pushed: u64,
    pub pool_fetched: u64,
    pub total_flops: u64,
    /// Bytes of the plan's output arena.
    pub arena_bytes: usize,
}

impl InferenceMetrics {
    /// Static part of the metrics, taken from the plan.
    pub fn from_plan(plan: &ExecutionPlan) -> Self {
        let layers: Vec<LayerMetrics> = plan
            .layers()
            .iter()
            .skip(1)
            .map(|l| {
                let def = plan.layer_def(l.index);
                LayerMetrics {
                    name: def.name.clone(),
                    layer_type: def.layer_type,
                    instructions: l.num_instructions,
                    tile_rows: l.tile_rows,
                    tile_cols: l.tile_cols,
                    flops: (l.rows * l.cols * def.flop_per_output()) as u64,
                }
            })
            .collect();
        Self {
            plan_id: plan.id(),
            batch: plan.batch(),
            total_duration: Duration::ZERO,
            instructions_total: layers.iter().map(|l| l.instructions).sum(),
            layers,
            executed: 0,
            skipped: 0,
            workers: Vec::new(),
            pool_pushed: 0,
            pool_fetched: 0,
            total_flops: plan.total_flops(),
            arena_bytes: plan.arena_bytes(),
        }
    }

    /// Records per-worker deltas and the pool counter growth of a run.
    pub fn finalise(
        &mut self,
        total: Duration,
        workers: Vec<WorkerMetrics>,
        pool_before: &PoolStats,
        pool_after: &PoolStats,
    ) {
        self.total_duration = total;
        self.executed = workers.iter().map(|w| w.executed).sum();
        self.skipped = workers.iter().map(|w| w.skipped).sum();
        self.workers = workers;
        self.pool_pushed = pool_after.pushed.saturating_sub(pool_before.pushed);
        self.pool_fetched = pool_after.fetched.saturating_sub(pool_before.fetched);
    }

    /// Throughput in GFLOP/s.
    pub fn gflops(&self) -> f64 {
        let secs = self.total_duration.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.total_flops as f64 / secs / 1e9
    }

    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        format!(
            "Inference: {:.2}ms total, {} layers, {} instructions \
             ({} executed, {} skipped) on {} workers, \
             pool {} pushed / {} fetched, {:.3} GFLOP/s",
            self.total_duration.as_secs_f64() * 1000.0,
            self.layers.len(),
            self.instructions_total,
            self.executed,
            self.skipped,
            self.workers.len(),
            self.pool_pushed,
            self.pool_fetched,
            self.gflops(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ready_pool::tests::tiny_plan;

    fn worker(id: usize, executed: u64, skipped: u64) -> WorkerMetrics {
        WorkerMetrics {
            worker: id,
            device: DeviceSelector::cpu(0),
            executed,
            skipped,
            batches: 1,
        }
    }

    #[test]
    fn test_from_plan() {
        let plan = tiny_plan();
        let m = InferenceMetrics::from_plan(&plan);
        assert_eq!(m.layers.len(), plan.num_layers() - 1);
        assert_eq!(m.layers[0].name, "c1");
        assert_eq!(m.instructions_total, plan.num_instructions() - plan.layer(0).num_instructions);
        assert_eq!(m.layers.iter().map(|l| l.flops).sum::<u64>(), m.total_flops);
        assert_eq!(m.gflops(), 0.0);
    }

    #[test]
    fn test_finalise() {
        let plan = tiny_plan();
        let mut m = InferenceMetrics::from_plan(&plan);
        let before = PoolStats {
            pushed: 10,
            fetched: 10,
            ..Default::default()
        };
        let after = PoolStats {
            pushed: 15,
            fetched: 18,
            ..Default::default()
        };
        m.finalise(Duration::from_millis(2), vec![worker(0, 3, 0), worker(1, 4, 1)], &before, &after);
        assert_eq!(m.executed, 7);
        assert_eq!(m.skipped, 1);
        assert_eq!(m.pool_pushed, 5);
        assert_eq!(m.pool_fetched, 8);
        assert!(m.gflops() > 0.0);

        let s = m.summary();
        assert!(s.contains("Inference:"));
        assert!(s.contains("7 executed"));
        assert!(s.contains("2 workers"));
    }

    #[test]
    fn test_worker_delta() {
        let now = worker(2, 10, 4);
        let d = now.since(&worker(2, 7, 1));
        assert_eq!((d.worker, d.executed, d.skipped, d.batches), (2, 3, 3, 0));
    }
}

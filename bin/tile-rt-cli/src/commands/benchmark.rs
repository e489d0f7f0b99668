// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `tile-rt benchmark` command: sweep worker counts and selection policies.
//!
//! Runs the same plan with every combination and prints a comparison table
//! of latency, throughput and ready-pool traffic.

use super::{load_network, print_banner, random_input};
use runtime::{InferenceEngine, RuntimeConfig};

pub async fn execute(config: RuntimeConfig, workers: &str, policies: &str, runs: usize) -> anyhow::Result<()> {
    print_banner("tile-rt · Benchmark Suite");

    let worker_counts: Vec<usize> = workers
        .split(',')
        .map(|s| {
            s.trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid worker count '{}': {e}", s.trim()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let policy_names: Vec<&str> = policies.split(',').map(str::trim).collect();
    let runs = runs.max(1);

    let network = load_network(&config)?;
    println!("  Network:  {}", network.summary());
    println!("  Workers:  {worker_counts:?}");
    println!("  Policies: {policy_names:?}");
    println!("  Offload:  {}", config.offload);
    println!("  Runs:     {runs} timed + 1 warm-up");
    println!();

    // ── Results Table ──────────────────────────────────────────────
    println!(
        "  {:<14} {:>8} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "Policy", "Workers", "Mean ms", "Best ms", "GFLOP/s", "Pushed", "Fetched",
    );
    println!("  {}", "-".repeat(78));

    let mut results: Vec<BenchResult> = Vec::new();
    for &n in &worker_counts {
        for &policy in &policy_names {
            let run_config = RuntimeConfig {
                num_workers: Some(n),
                selection_policy: policy.to_string(),
                ..config.clone()
            };
            match run_single(run_config, network.clone(), runs).await {
                Ok(r) => {
                    println!(
                        "  {:<14} {:>8} {:>10.3} {:>10.3} {:>10.3} {:>10} {:>10}",
                        r.policy, r.workers, r.mean_ms, r.best_ms, r.gflops, r.pushed, r.fetched,
                    );
                    results.push(r);
                }
                Err(e) => println!("  {policy:<14} {n:>8}     FAILED: {e}"),
            }
        }
    }
    println!();

    // ── Summary ────────────────────────────────────────────────────
    let Some(fastest) = results.iter().min_by(|a, b| a.mean_ms.total_cmp(&b.mean_ms)) else {
        println!("  No successful benchmark runs.");
        return Ok(());
    };
    println!("  Summary:");
    println!(
        "   Fastest: {} with {} workers ({:.3} ms mean)",
        fastest.policy, fastest.workers, fastest.mean_ms,
    );
    if let Some(single) = results.iter().find(|r| r.workers == 1 && r.policy == fastest.policy) {
        println!("   Speed-up over 1 worker: {:.2}x", single.mean_ms / fastest.mean_ms);
    }
    println!();
    Ok(())
}

#[derive(Debug)]
struct BenchResult {
    policy: String,
    workers: usize,
    mean_ms: f64,
    best_ms: f64,
    gflops: f64,
    pushed: u64,
    fetched: u64,
}

/// Builds an engine for one configuration and times `runs` runs.
async fn run_single(
    config: RuntimeConfig,
    network: model_ir::Network<model_ir::graph::Validated>,
    runs: usize,
) -> anyhow::Result<BenchResult> {
    let policy = config.selection_policy.clone();
    let workers = config.resolve_workers();
    let input_seed = config.seed;
    let engine = InferenceEngine::new(config).load_network(network)?.prepare()?;
    let input = random_input(engine.input_len(), input_seed);

    // Warm up: first touch of the arena and thread wake-up.
    engine.run(&input).await?;

    let mut total_ms = 0.0;
    let mut best_ms = f64::INFINITY;
    let mut last = None;
    for _ in 0..runs {
        let output = engine.run(&input).await?;
        let ms = output.metrics.total_duration.as_secs_f64() * 1000.0;
        total_ms += ms;
        best_ms = best_ms.min(ms);
        last = Some(output.metrics);
    }
    engine.shutdown();

    let Some(m) = last else {
        anyhow::bail!("no timed run");
    };
    let mean_ms = total_ms / runs as f64;
    Ok(BenchResult {
        policy,
        workers,
        mean_ms,
        best_ms,
        gflops: if mean_ms > 0.0 {
            m.total_flops as f64 / (mean_ms / 1000.0) / 1e9
        } else {
            0.0
        },
        pushed: m.pool_pushed,
        fetched: m.pool_fetched,
    })
}

// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `tile-rt run` command: execute a network on worker pools.
//!
//! Walks the full type-state pipeline:
//! ```text
//! InferenceEngine<Idle> → load_network → <Planned> → prepare → <Ready> → run
//! ```

use super::{load_network, print_banner, random_input};
use runtime::{reference, InferenceEngine, InferenceOutput, RuntimeConfig};

/// Largest element-wise deviation accepted by `--verify`.
const VERIFY_TOLERANCE: f32 = 1e-3;

pub async fn execute(config: RuntimeConfig, runs: usize, verify: bool, json: bool) -> anyhow::Result<()> {
    print_banner("tile-rt · Inference Runner");

    println!("  Config:");
    match &config.model_path {
        Some(path) => println!("   Model:    {}", path.display()),
        None => println!("   Model:    synthetic (seed {})", config.seed),
    }
    println!("   Batch:    {}", config.batch_size);
    println!("   Workers:  {} per pool", config.resolve_workers());
    println!("   Policy:   {}", config.selection_policy);
    println!("   Offload:  {}", config.offload);
    println!("   Budget:   {}", config.memory_budget);
    println!();

    // Step 1: Idle → Planned (load network, tile it, assign affinities).
    println!("  [1/3] Loading network and building the execution plan...");
    let network = load_network(&config)?;
    let seed = config.seed;
    let planned = InferenceEngine::new(config).load_network(network)?;
    println!("        {}", planned.network().summary());
    println!("        {}", planned.plan().summary());
    println!();

    // Step 2: Planned → Ready (spawn and attach workers).
    println!("  [2/3] Spawning worker pools...");
    let ready = planned.prepare()?;
    for pool in ready.pools() {
        println!("        {} workers on {}", pool.num_workers(), pool.selector());
    }
    println!();

    // Step 3: run.
    println!("  [3/3] Running {runs} time(s)...");
    let input = random_input(ready.input_len(), seed);
    let mut last: Option<InferenceOutput> = None;
    for i in 0..runs.max(1) {
        let output = ready.run(&input).await?;
        println!("        run {}: {:.3} ms", i + 1, output.metrics.total_duration.as_secs_f64() * 1000.0);
        if let Some(prev) = &last {
            if prev.output != output.output {
                anyhow::bail!("run {} differs from the previous run", i + 1);
            }
        }
        last = Some(output);
    }
    println!();

    let Some(output) = last else {
        anyhow::bail!("no run completed");
    };
    print_results(&output);
    print_top_classes(&output.output, ready.plan().output_layer().rows);

    if verify {
        let expected = reference::evaluate_output(ready.network(), ready.plan().batch(), &input)?;
        let max_diff = output
            .output
            .iter()
            .zip(&expected)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        println!("  Verify: max |scheduled - reference| = {max_diff:.2e}");
        if max_diff > VERIFY_TOLERANCE {
            anyhow::bail!("output deviates from the reference by {max_diff}");
        }
        println!("          OK");
        println!();
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&output.metrics)?);
    }

    ready.shutdown();
    Ok(())
}

fn print_results(output: &InferenceOutput) {
    let m = &output.metrics;
    println!("  Results:");
    println!(
        "   Output: {} values, first {:?}{}",
        output.output.len(),
        &output.output[..output.output.len().min(6)],
        if output.output.len() > 6 { " ..." } else { "" },
    );
    println!();

    println!("  {:<16} {:<12} {:>8} {:>10} {:>12}", "Layer", "Type", "Tiles", "Tile", "MFLOP");
    println!("  {}", "-".repeat(62));
    for l in &m.layers {
        println!(
            "  {:<16} {:<12} {:>8} {:>10} {:>12.3}",
            truncate(&l.name, 16),
            l.layer_type.as_str(),
            l.instructions,
            format!("{}x{}", l.tile_rows, l.tile_cols),
            l.flops as f64 / 1e6,
        );
    }
    println!();

    if !m.workers.is_empty() {
        println!("  {:<8} {:<12} {:>10} {:>10} {:>10}", "Worker", "Device", "Executed", "Skipped", "Batches");
        println!("  {}", "-".repeat(54));
        for w in &m.workers {
            println!(
                "  {:<8} {:<12} {:>10} {:>10} {:>10}",
                w.worker,
                w.device.to_string(),
                w.executed,
                w.skipped,
                w.batches
            );
        }
        println!();
    }

    println!("  Metrics:");
    println!("   {}", m.summary());
    println!();
}

/// Prints the five largest output channels of every output column.
fn print_top_classes(output: &[f32], channels: usize) {
    if channels == 0 {
        return;
    }
    println!("  Top classes:");
    for (col, values) in output.chunks(channels).enumerate().take(8) {
        let mut ranked: Vec<(usize, f32)> = values.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let top: Vec<String> = ranked.iter().take(5).map(|(c, v)| format!("{c}:{v:.4}")).collect();
        println!("   column {col:<4} {}", top.join("  "));
    }
    println!();
}

/// Truncates a string with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    }
}

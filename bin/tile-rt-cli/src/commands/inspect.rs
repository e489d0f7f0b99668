// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `tile-rt inspect` command: display network structure and plan tiling.
//!
//! Builds the execution plan without spawning workers and prints, per
//! layer, the output matrix, tile grid, buffer size and how the affinity
//! strategy spread the layer's instructions across devices.

use super::{load_network, print_banner};
use partition_planner::{ExecutionPlan, PlanBuilder, MAX_DEVICES};
use runtime::{KernelRegistry, RuntimeConfig};
use std::sync::Arc;

pub fn execute(config: RuntimeConfig) -> anyhow::Result<()> {
    print_banner("tile-rt · Network Inspector");

    let network = load_network(&config)?;

    // ── Summary ────────────────────────────────────────────────────
    println!("  Network: {}", network.name);
    println!("  Layers:  {}", network.num_layers());
    println!(
        "  Weights: {:.2} MB",
        network.total_weight_bytes() as f64 / (1024.0 * 1024.0),
    );
    println!(
        "  Work:    {:.3} MFLOP at batch {}",
        network.total_flops(config.batch_size) as f64 / 1e6,
        config.batch_size,
    );
    let kernels = KernelRegistry::with_builtin_kernels();
    match kernels.covers(&network) {
        Ok(()) => println!("  Kernels: all layer types covered"),
        Err(e) => println!("  Kernels: {e}"),
    }
    println!();

    // ── Plan ───────────────────────────────────────────────────────
    let memory = memory_manager::MemoryPool::new(config.parse_budget()?);
    let plan = PlanBuilder::new(Arc::new(network))
        .batch(config.batch_size)
        .tiling(config.tiling()?)
        .build(&memory)?;
    let strategy = config.create_strategy()?;
    strategy.assign(&plan)?;
    println!("  {}", plan.summary());
    println!("  Strategy: {}", strategy.name());
    println!();

    println!(
        "  {:<4} {:<16} {:<10} {:>10} {:>8} {:>8} {:>8} {:>10}  {}",
        "Idx", "Name", "Type", "Output", "Tile", "Instr", "Parents", "Buffer", "Devices",
    );
    println!("  {}", "-".repeat(95));
    for layer in plan.layers() {
        let def = plan.layer_def(layer.index);
        println!(
            "  {:<4} {:<16} {:<10} {:>10} {:>8} {:>8} {:>8.1} {:>7.1} KB  {}",
            layer.index,
            truncate(&def.name, 16),
            def.layer_type.as_str(),
            format!("{}x{}", layer.rows, layer.cols),
            format!("{}x{}", layer.tile_rows, layer.tile_cols),
            layer.num_instructions,
            mean_parents(&plan, layer.index),
            layer.mem_size as f64 / 1024.0,
            device_spread(&plan, layer.index),
        );
    }
    println!();

    let edges: usize = plan.instructions().iter().map(|i| i.num_parents()).sum();
    println!("  Dependencies: {edges} edges across {} instructions", plan.num_instructions());
    println!();
    Ok(())
}

/// Mean number of parent instructions per instruction of one layer.
fn mean_parents(plan: &ExecutionPlan, layer: usize) -> f64 {
    let insts = plan.layer_instructions(layer);
    if insts.is_empty() {
        return 0.0;
    }
    insts.iter().map(|i| i.num_parents()).sum::<usize>() as f64 / insts.len() as f64
}

/// Instructions per device for one layer, e.g. `d0:6 d1:2`. Instructions
/// with an empty device mask count as `any`.
fn device_spread(plan: &ExecutionPlan, layer: usize) -> String {
    let mut per_device = [0usize; MAX_DEVICES];
    let mut any = 0;
    for inst in plan.layer_instructions(layer) {
        let affinity = inst.affinity();
        if affinity.device_mask() == 0 {
            any += 1;
            continue;
        }
        for (d, count) in per_device.iter_mut().enumerate() {
            if affinity.is_device_compute(d) {
                *count += 1;
            }
        }
    }
    let mut parts: Vec<String> = per_device
        .iter()
        .enumerate()
        .filter(|&(_, &n)| n > 0)
        .map(|(d, n)| format!("d{d}:{n}"))
        .collect();
    if any > 0 {
        parts.push(format!("any:{any}"));
    }
    parts.join(" ")
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

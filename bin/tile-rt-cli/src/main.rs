// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tile-rt
//!
//! Command-line interface for the tiled instruction-graph runtime.
//!
//! ## Usage
//! ```bash
//! # Run the synthetic network on 4 workers and check it against the reference
//! tile-rt run --workers 4 --verify
//!
//! # Run a manifest with half of every late layer offloaded
//! tile-rt run --model ./networks/tiny.json --offload partial-offload --split-layer 2
//!
//! # Sweep worker counts and selection policies
//! tile-rt benchmark --workers 1,2,4 --policies round-robin,priority,weighted
//!
//! # Print the tiling of a network
//! tile-rt inspect --model ./networks/tiny.json --flop-per-instruction 20000
//! ```

mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tile-rt",
    about = "Tiled instruction-graph runtime for layered networks",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file. Command-line flags override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every command that builds a plan.
#[derive(Args, Debug, Clone, Default)]
pub struct PlanArgs {
    /// JSON network manifest. Omit to use the built-in synthetic network.
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// Batch size.
    #[arg(long)]
    pub batch: Option<usize>,

    /// Target floating-point operations per instruction.
    #[arg(long)]
    pub flop_per_instruction: Option<usize>,

    /// Affinity strategy: full-local, allow-all, full-offload,
    /// partial-offload, random-offload, sequential-offload.
    #[arg(short, long)]
    pub offload: Option<String>,

    /// Last layer kept on the edge device by the split strategies.
    #[arg(long)]
    pub split_layer: Option<usize>,

    /// Share of instructions sent to the server device.
    #[arg(long)]
    pub offload_ratio: Option<f32>,

    /// Memory budget for plan arenas (e.g., "64M").
    #[arg(short = 'b', long)]
    pub memory_budget: Option<String>,

    /// Seed for synthetic weights and random offload.
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a network on worker pools.
    Run {
        #[command(flatten)]
        plan: PlanArgs,

        /// Worker threads per pool.
        #[arg(short, long)]
        workers: Option<usize>,

        /// Queue-group selection policy: round-robin, priority, weighted.
        #[arg(short, long)]
        policy: Option<String>,

        /// Number of consecutive runs of the same plan.
        #[arg(long, default_value_t = 1)]
        runs: usize,

        /// Compare the output against direct single-threaded evaluation.
        #[arg(long)]
        verify: bool,

        /// Print the metrics of the last run as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Benchmark worker counts and selection policies.
    Benchmark {
        #[command(flatten)]
        plan: PlanArgs,

        /// Comma-separated worker counts to sweep.
        #[arg(long, default_value = "1,2,4")]
        workers: String,

        /// Comma-separated selection policies to sweep.
        #[arg(long, default_value = "round-robin,priority,weighted")]
        policies: String,

        /// Timed runs per configuration (after one warm-up run).
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },

    /// Inspect a network: layers, tiling and affinity assignment.
    Inspect {
        #[command(flatten)]
        plan: PlanArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging based on verbosity.
    commands::init_tracing(cli.verbose);

    let config = commands::load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Run {
            plan,
            workers,
            policy,
            runs,
            verify,
            json,
        } => {
            let mut config = plan.apply(config);
            config.num_workers = workers.or(config.num_workers);
            if let Some(policy) = policy {
                config.selection_policy = policy;
            }
            commands::run::execute(config, runs, verify, json).await
        }
        Commands::Benchmark {
            plan,
            workers,
            policies,
            runs,
        } => commands::benchmark::execute(plan.apply(config), &workers, &policies, runs).await,
        Commands::Inspect { plan } => commands::inspect::execute(plan.apply(config)),
    }
}

// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! model_path = "./networks/resnet-tiny.json"   # omit for the synthetic network
//! batch_size = 1
//! num_workers = 4
//! flop_per_instruction = 50000
//! cache_target = 16
//! cache_tolerance = 8
//! selection_policy = "round-robin"
//! offload = "partial-offload"
//! split_layer = 2
//! offload_ratio = 0.5
//! memory_budget = "256M"
//! enable_profiling = true
//! ```

use crate::policy::{Priority, RoundRobin, SelectionPolicy, Weighted};
use crate::{CacheThresholds, RuntimeError};
use memory_manager::MemoryBudget;
use model_ir::DEFAULT_SEED;
use partition_planner::{
    AllowAll, FullLocal, FullOffload, PartialOffload, PartitionStrategy, RandomOffload,
    SequentialOffload, TilingConfig,
};
use std::path::{Path, PathBuf};

/// Selection policy names accepted by [`RuntimeConfig::create_policy`].
pub const POLICIES: [&str; 3] = ["round-robin", "priority", "weighted"];

/// Strategy names accepted by [`RuntimeConfig::create_strategy`].
pub const STRATEGIES: [&str; 6] = [
    "full-local",
    "allow-all",
    "full-offload",
    "partial-offload",
    "random-offload",
    "sequential-offload",
];

/// Configuration for the inference runtime.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// JSON network manifest. `None` runs the built-in synthetic network.
    pub model_path: Option<PathBuf>,
    pub batch_size: usize,
    /// Worker threads per pool (defaults to the number of online cores).
    pub num_workers: Option<usize>,

    // Tiling.
    pub flop_per_instruction: usize,
    pub min_tile_rows: usize,
    pub min_tile_cols: usize,
    pub min_tiles_per_layer: usize,
    pub mem_align: usize,

    // Worker cache band.
    pub cache_target: usize,
    pub cache_tolerance: usize,

    /// `"round-robin"`, `"priority"` or `"weighted"`.
    pub selection_policy: String,
    /// Affinity strategy, see [`STRATEGIES`].
    pub offload: String,
    pub split_layer: usize,
    pub offload_ratio: f32,
    pub edge_device: usize,
    pub server_device: usize,
    /// Seed for random offload and synthetic weights.
    pub seed: u64,

    /// Memory budget for plan arenas (human-readable, e.g., `"256M"`).
    pub memory_budget: String,
    /// Whether to collect per-run metrics.
    pub enable_profiling: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let tiling = TilingConfig::default();
        let cache = CacheThresholds::default();
        Self {
            model_path: None,
            batch_size: 1,
            num_workers: None,
            flop_per_instruction: tiling.flop_per_instruction,
            min_tile_rows: tiling.min_tile_rows,
            min_tile_cols: tiling.min_tile_cols,
            min_tiles_per_layer: tiling.min_tiles_per_layer,
            mem_align: tiling.mem_align,
            cache_target: cache.target,
            cache_tolerance: cache.tolerance,
            selection_policy: "round-robin".to_string(),
            offload: "full-local".to_string(),
            split_layer: 1,
            offload_ratio: 0.5,
            edge_device: 0,
            server_device: 1,
            seed: DEFAULT_SEED,
            memory_budget: "256M".to_string(),
            enable_profiling: true,
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::ConfigError(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string. Missing keys take defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        toml::from_str(toml_str)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string_pretty(self)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML serialise error: {e}")))
    }

    /// Parses the memory budget string into a [`MemoryBudget`].
    pub fn parse_budget(&self) -> Result<MemoryBudget, RuntimeError> {
        MemoryBudget::parse(&self.memory_budget)
            .map_err(|e| RuntimeError::ConfigError(format!("invalid budget: {e}")))
    }

    /// Resolves the number of worker threads.
    pub fn resolve_workers(&self) -> usize {
        self.num_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    /// Tiling parameters, validated.
    pub fn tiling(&self) -> Result<TilingConfig, RuntimeError> {
        let t = TilingConfig {
            flop_per_instruction: self.flop_per_instruction,
            min_tile_rows: self.min_tile_rows,
            min_tile_cols: self.min_tile_cols,
            min_tiles_per_layer: self.min_tiles_per_layer,
            mem_align: self.mem_align,
        };
        t.validate()?;
        Ok(t)
    }

    pub fn cache_thresholds(&self) -> Result<CacheThresholds, RuntimeError> {
        let t = CacheThresholds::new(self.cache_target, self.cache_tolerance);
        t.validate()?;
        Ok(t)
    }

    /// Creates the affinity strategy specified by this config.
    pub fn create_strategy(&self) -> Result<Box<dyn PartitionStrategy>, RuntimeError> {
        let (edge, server) = (self.edge_device, self.server_device);
        match self.offload.to_lowercase().as_str() {
            "full-local" | "local" => Ok(Box::new(FullLocal::new(edge))),
            "allow-all" => Ok(Box::new(AllowAll)),
            "full-offload" => Ok(Box::new(FullOffload { edge, server })),
            "partial-offload" | "partial" => Ok(Box::new(PartialOffload {
                split_layer: self.split_layer,
                ratio: self.offload_ratio,
                edge,
                server,
            })),
            "random-offload" | "random" => Ok(Box::new(RandomOffload {
                ratio: self.offload_ratio,
                edge,
                server,
                seed: self.seed,
            })),
            "sequential-offload" | "sequential" => Ok(Box::new(SequentialOffload {
                split_layer: self.split_layer,
                edge,
                server,
            })),
            other => Err(RuntimeError::ConfigError(format!(
                "unknown offload strategy '{other}'; expected one of {}",
                STRATEGIES.join(", ")
            ))),
        }
    }

    /// Creates the queue-group selection policy specified by this config.
    pub fn create_policy(&self) -> Result<Box<dyn SelectionPolicy>, RuntimeError> {
        match self.selection_policy.to_lowercase().as_str() {
            "round-robin" | "rr" => Ok(Box::new(RoundRobin::new())),
            "priority" => Ok(Box::new(Priority)),
            "weighted" | "wrr" => Ok(Box::new(Weighted::new())),
            other => Err(RuntimeError::ConfigError(format!(
                "unknown selection policy '{other}'; expected one of {}",
                POLICIES.join(", ")
            ))),
        }
    }
}

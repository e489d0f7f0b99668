// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

pub mod benchmark;
pub mod inspect;
pub mod run;

use crate::PlanArgs;
use anyhow::Context;
use model_ir::graph::Validated;
use model_ir::{Network, NetworkBuilder, NetworkManifest};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use runtime::RuntimeConfig;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// Reads the TOML config if one was given, defaults otherwise.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("loading config '{}'", path.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

impl PlanArgs {
    /// Overrides `config` with every flag that was given.
    pub fn apply(self, mut config: RuntimeConfig) -> RuntimeConfig {
        if self.model.is_some() {
            config.model_path = self.model;
        }
        if let Some(v) = self.batch {
            config.batch_size = v;
        }
        if let Some(v) = self.flop_per_instruction {
            config.flop_per_instruction = v;
        }
        if let Some(v) = self.offload {
            config.offload = v;
        }
        if let Some(v) = self.split_layer {
            config.split_layer = v;
        }
        if let Some(v) = self.offload_ratio {
            config.offload_ratio = v;
        }
        if let Some(v) = self.memory_budget {
            config.memory_budget = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        config
    }
}

/// The network `config` names: its manifest, or the synthetic network.
pub fn load_network(config: &RuntimeConfig) -> anyhow::Result<Network<Validated>> {
    let network = match &config.model_path {
        Some(path) => NetworkManifest::from_file(path)
            .and_then(|m| m.build())
            .with_context(|| format!("failed to load network '{}'", path.display()))?,
        None => NetworkBuilder::synthetic(config.seed).context("building the synthetic network")?,
    };
    Ok(network)
}

/// Deterministic input values in `[-1, 1)`.
pub fn random_input(len: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random_range(-1.0..1.0)).collect()
}

pub fn print_banner(title: &str) {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║  {title:<52}║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let config = RuntimeConfig {
            offload: "full-offload".into(),
            batch_size: 3,
            ..Default::default()
        };
        let args = PlanArgs {
            batch: Some(2),
            seed: Some(9),
            ..Default::default()
        };
        let merged = args.apply(config);
        assert_eq!(merged.batch_size, 2);
        assert_eq!(merged.seed, 9);
        assert_eq!(merged.offload, "full-offload");
        assert!(merged.model_path.is_none());
    }

    #[test]
    fn test_random_input_is_deterministic() {
        let a = random_input(16, 4);
        assert_eq!(a, random_input(16, 4));
        assert!(a.iter().all(|v| (-1.0..1.0).contains(v)));
    }

    #[test]
    fn test_synthetic_network_without_model() {
        let net = load_network(&RuntimeConfig::default()).unwrap();
        assert_eq!(net.name, "synthetic-resnet");
    }
}

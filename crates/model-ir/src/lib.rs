// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # model-ir
//!
//! The network template that instruction plans are tiled from.
//!
//! - [`LayerType`] — the computation each layer performs.
//! - [`LayerDef`] / [`LayerParams`] — one layer's geometry, parents and parameters.
//! - [`Network`] — the layers as a DAG in topological order, with a
//!   **type-state pattern** (`Loaded` → `Validated`).
//! - [`NetworkBuilder`] — fluent construction with seeded random weights.
//! - [`NetworkManifest`] — the JSON network descriptor.
//!
//! # Example
//! ```no_run
//! use model_ir::NetworkManifest;
//! use std::path::Path;
//!
//! let net = NetworkManifest::from_file(Path::new("./networks/resnet-tiny.json"))
//!     .and_then(|m| m.build())
//!     .unwrap();
//! for layer in net.iter_layers() {
//!     println!("  {}", layer.summary());
//! }
//! ```

mod builder;
mod error;
pub mod graph;
mod layer;
mod manifest;

pub use builder::{NetworkBuilder, DEFAULT_SEED};
pub use error::ModelError;
pub use graph::Network;
pub use layer::{LayerDef, LayerParams, LayerType};
pub use manifest::{ManifestInput, ManifestLayer, NetworkManifest};
pub use tensor_core::Activation;

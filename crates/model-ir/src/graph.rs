// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The network: a DAG of layers in topological order.
//!
//! # Type-State Pattern
//!
//! ```text
//! Network<Loaded>     — layers assembled, not yet checked.
//!       │  .validate()
//!       ▼
//! Network<Validated>  — parents, shapes and weights verified.
//! ```
//!
//! Plans are only ever built from a `Network<Validated>`, so the tiling and
//! dependency code never re-checks layer geometry.

use crate::{LayerDef, LayerParams, LayerType, ModelError};
use std::fmt;

// ── Type-state markers ─────────────────────────────────────────────

/// Marker: layers assembled but not checked.
#[derive(Debug, Clone)]
pub struct Loaded;

/// Marker: network verified and ready to be planned.
#[derive(Debug, Clone)]
pub struct Validated;

/// Sealed trait for network states.
pub trait GraphState: fmt::Debug + Clone {}
impl GraphState for Loaded {}
impl GraphState for Validated {}

// ── Network ────────────────────────────────────────────────────────

/// An immutable network template.
///
/// Layers reference their parents by index; parents always come first.
/// Layer 0 is the only [`LayerType::Input`].
#[derive(Debug, Clone)]
pub struct Network<S: GraphState = Loaded> {
    pub name: String,
    pub layers: Vec<LayerDef>,
    _state: std::marker::PhantomData<S>,
}

// ── Loaded state ───────────────────────────────────────────────────

impl Network<Loaded> {
    pub fn new(name: String, layers: Vec<LayerDef>) -> Self {
        Self {
            name,
            layers,
            _state: std::marker::PhantomData,
        }
    }

    /// Validates the network and transitions to the `Validated` state.
    ///
    /// # Checks
    /// - The network is non-empty, layer 0 is the only input.
    /// - Indices are consecutive; names are unique.
    /// - Every parent precedes its child and parent counts match the type.
    /// - Input dims equal the parent's output dims.
    /// - Output dims follow from the layer type and parameters.
    /// - Weight and bias element counts match.
    pub fn validate(self) -> Result<Network<Validated>, ModelError> {
        let first = self
            .layers
            .first()
            .ok_or_else(|| ModelError::InvalidGraph("network contains no layers".into()))?;
        if first.layer_type != LayerType::Input {
            return Err(ModelError::InvalidGraph(format!(
                "first layer '{}' must be an input layer, found {}",
                first.name, first.layer_type
            )));
        }

        let mut names = std::collections::HashSet::new();
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.index != i {
                return Err(invalid(layer, format!("expected index {i}, got {}", layer.index)));
            }
            if !names.insert(layer.name.as_str()) {
                return Err(invalid(layer, "duplicate layer name".into()));
            }
            if i > 0 && layer.layer_type == LayerType::Input {
                return Err(invalid(layer, "only the first layer may be an input".into()));
            }
            self.check_parents(layer)?;
            check_geometry(layer, &self.layers)?;
            check_parameters(layer)?;
        }

        tracing::debug!("network '{}' validated: {} layers", self.name, self.layers.len());

        Ok(Network {
            name: self.name,
            layers: self.layers,
            _state: std::marker::PhantomData,
        })
    }

    fn check_parents(&self, layer: &LayerDef) -> Result<(), ModelError> {
        let expected = layer.layer_type.num_parents();
        if layer.parents.len() != expected {
            return Err(invalid(
                layer,
                format!(
                    "{} layers take {expected} parent(s), found {}",
                    layer.layer_type,
                    layer.parents.len()
                ),
            ));
        }
        for &p in &layer.parents {
            if p >= layer.index {
                return Err(invalid(
                    layer,
                    format!("parent {p} does not precede layer {}", layer.index),
                ));
            }
        }
        Ok(())
    }
}

fn invalid(layer: &LayerDef, detail: String) -> ModelError {
    ModelError::InvalidLayer {
        layer: layer.name.clone(),
        detail,
    }
}

/// Checks input dims against the parents and output dims against the type.
fn check_geometry(layer: &LayerDef, layers: &[LayerDef]) -> Result<(), ModelError> {
    let p = &layer.params;
    if p.out_channels == 0 || p.out_h == 0 || p.out_w == 0 {
        return Err(invalid(layer, "output has zero elements".into()));
    }

    for &parent_idx in &layer.parents {
        let parent = &layers[parent_idx].params;
        if (p.in_channels, p.in_h, p.in_w) != (parent.out_channels, parent.out_h, parent.out_w) {
            return Err(invalid(
                layer,
                format!(
                    "input {}x{}x{} does not match parent '{}' output {}x{}x{}",
                    p.in_channels,
                    p.in_h,
                    p.in_w,
                    layers[parent_idx].name,
                    parent.out_channels,
                    parent.out_h,
                    parent.out_w
                ),
            ));
        }
    }

    let expected_out = match layer.layer_type {
        LayerType::Input => (p.in_channels, p.in_h, p.in_w),
        LayerType::Conv => {
            let (h, w) = windowed(layer)?;
            (p.out_channels, h, w)
        }
        LayerType::MaxPool | LayerType::AvgPool => {
            let (h, w) = windowed(layer)?;
            (p.in_channels, h, w)
        }
        LayerType::FullyConnected | LayerType::MatMul => (p.out_channels, p.in_h, p.in_w),
        LayerType::Residual | LayerType::Softmax | LayerType::LayerNorm => {
            (p.in_channels, p.in_h, p.in_w)
        }
    };
    if expected_out != (p.out_channels, p.out_h, p.out_w) {
        return Err(invalid(
            layer,
            format!(
                "output {}x{}x{} inconsistent with parameters, expected {}x{}x{}",
                p.out_channels, p.out_h, p.out_w, expected_out.0, expected_out.1, expected_out.2
            ),
        ));
    }
    Ok(())
}

fn windowed(layer: &LayerDef) -> Result<(usize, usize), ModelError> {
    let p = &layer.params;
    let h = LayerParams::windowed_extent(p.in_h, p.kernel_h, p.stride, p.padding);
    let w = LayerParams::windowed_extent(p.in_w, p.kernel_w, p.stride, p.padding);
    match (h, w) {
        (Some(h), Some(w)) => Ok((h, w)),
        _ => Err(invalid(
            layer,
            format!(
                "kernel {}x{} stride {} padding {} does not fit input {}x{}",
                p.kernel_h, p.kernel_w, p.stride, p.padding, p.in_h, p.in_w
            ),
        )),
    }
}

/// Checks weight/bias presence and element counts.
fn check_parameters(layer: &LayerDef) -> Result<(), ModelError> {
    let p = &layer.params;
    let (weight_len, bias_len) = match layer.layer_type {
        LayerType::Conv => (
            Some(p.out_channels * p.kernel_h * p.kernel_w * p.in_channels),
            Some(p.out_channels),
        ),
        LayerType::FullyConnected => (Some(p.out_channels * p.in_channels), Some(p.out_channels)),
        LayerType::MatMul => (Some(p.out_channels * p.in_channels), None),
        LayerType::LayerNorm => (Some(p.out_channels), None),
        _ => (None, None),
    };

    match (weight_len, &layer.weight) {
        (Some(n), Some(w)) if w.len() != n => {
            return Err(invalid(layer, format!("weight has {} elements, expected {n}", w.len())))
        }
        (Some(_), None) => return Err(invalid(layer, "missing weight tensor".into())),
        (None, Some(_)) => {
            return Err(invalid(layer, format!("{} layers take no weights", layer.layer_type)))
        }
        _ => {}
    }

    // Biases are optional wherever they are accepted; layer-norm accepts a shift.
    let bias_len = bias_len.or((layer.layer_type == LayerType::LayerNorm).then_some(p.out_channels));
    match (bias_len, &layer.bias) {
        (Some(n), Some(b)) if b.len() != n => {
            Err(invalid(layer, format!("bias has {} elements, expected {n}", b.len())))
        }
        (None, Some(_)) => Err(invalid(layer, format!("{} layers take no bias", layer.layer_type))),
        _ => Ok(()),
    }
}

// ── Validated state ────────────────────────────────────────────────

impl Network<Validated> {
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, index: usize) -> Option<&LayerDef> {
        self.layers.get(index)
    }

    pub fn iter_layers(&self) -> impl Iterator<Item = &LayerDef> {
        self.layers.iter()
    }

    /// The input layer.
    pub fn input(&self) -> &LayerDef {
        &self.layers[0]
    }

    /// The last layer, whose completion marks the end of a run.
    pub fn output(&self) -> &LayerDef {
        &self.layers[self.layers.len() - 1]
    }

    /// Number of `f32` values one input batch holds.
    pub fn input_len(&self, batch: usize) -> usize {
        let input = self.input();
        input.rows() * input.cols(batch)
    }

    /// Total parameter bytes.
    pub fn total_weight_bytes(&self) -> usize {
        self.layers.iter().map(LayerDef::weight_bytes).sum()
    }

    /// Total floating-point operations for one run at `batch`.
    pub fn total_flops(&self, batch: usize) -> u64 {
        self.layers
            .iter()
            .filter(|l| l.layer_type != LayerType::Input)
            .map(|l| (l.rows() * l.cols(batch) * l.flop_per_output()) as u64)
            .sum()
    }

    /// Distinct layer types, in first-appearance order.
    pub fn layer_types(&self) -> Vec<LayerType> {
        let mut seen = Vec::new();
        for l in &self.layers {
            if !seen.contains(&l.layer_type) {
                seen.push(l.layer_type);
            }
        }
        seen
    }

    pub fn summary(&self) -> String {
        format!(
            "Network '{}': {} layers, {:.1} KB parameters, {:.2} MFLOP per sample",
            self.name,
            self.num_layers(),
            self.total_weight_bytes() as f64 / 1024.0,
            self.total_flops(1) as f64 / 1e6,
        )
    }
}

impl fmt::Display for Network<Validated> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary())?;
        for layer in &self.layers {
            writeln!(f, "  {}", layer.summary())?;
        }
        Ok(())
    }
}

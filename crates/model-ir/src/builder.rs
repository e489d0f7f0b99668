// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fluent network construction with seeded random parameters.
//!
//! ```
//! use model_ir::NetworkBuilder;
//! use tensor_core::Activation;
//!
//! let mut b = NetworkBuilder::new("resblock", 4, 8, 8).seed(7);
//! let input = b.current();
//! b.conv("conv", 4, 3, 1, 1, Activation::Relu);
//! b.residual("add", input, Activation::None);
//! let net = b.build().unwrap();
//! assert_eq!(net.num_layers(), 3);
//! ```

use crate::graph::Validated;
use crate::{LayerDef, LayerParams, LayerType, ModelError, Network};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tensor_core::{Activation, Shape, Tensor};

/// Default seed for parameter initialization.
pub const DEFAULT_SEED: u64 = 0x5EED;

/// Builds a [`Network`] layer by layer.
///
/// Each method appends one layer whose parent is the *current* layer
/// (the most recently added one unless moved with [`at`](Self::at)) and
/// returns the new layer's index.
pub struct NetworkBuilder {
    name: String,
    layers: Vec<LayerDef>,
    current: usize,
    rng: StdRng,
}

impl NetworkBuilder {
    /// Starts a network whose input is `channels × height × width`.
    pub fn new(name: impl Into<String>, channels: usize, height: usize, width: usize) -> Self {
        let input = LayerDef {
            name: "input".into(),
            layer_type: LayerType::Input,
            index: 0,
            params: LayerParams {
                in_channels: channels,
                in_h: height,
                in_w: width,
                out_channels: channels,
                out_h: height,
                out_w: width,
                kernel_h: 1,
                kernel_w: 1,
                stride: 1,
                padding: 0,
            },
            parents: Vec::new(),
            activation: Activation::None,
            weight: None,
            bias: None,
        };
        Self {
            name: name.into(),
            layers: vec![input],
            current: 0,
            rng: StdRng::seed_from_u64(DEFAULT_SEED),
        }
    }

    /// Reseeds parameter initialization.
    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Index of the current layer.
    pub fn current(&self) -> usize {
        self.current
    }

    /// Makes layer `index` the parent of the next appended layer.
    pub fn at(&mut self, index: usize) -> &mut Self {
        self.current = index.min(self.layers.len() - 1);
        self
    }

    /// Appends a convolution with square `kernel`.
    pub fn conv(
        &mut self,
        name: &str,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        activation: Activation,
    ) -> usize {
        let params = self.windowed_params(out_channels, kernel, stride, padding);
        let fan_in = kernel * kernel * params.in_channels;
        let weight = self.random_tensor(Shape::new(vec![out_channels, kernel, kernel, params.in_channels]), fan_in);
        let bias = self.random_tensor(Shape::vector(out_channels), fan_in);
        self.push(name, LayerType::Conv, params, activation, Some(weight), Some(bias))
    }

    pub fn max_pool(&mut self, name: &str, kernel: usize, stride: usize, padding: usize) -> usize {
        let channels = self.parent_params().out_channels;
        let params = self.windowed_params(channels, kernel, stride, padding);
        self.push(name, LayerType::MaxPool, params, Activation::None, None, None)
    }

    pub fn avg_pool(&mut self, name: &str, kernel: usize, stride: usize, padding: usize) -> usize {
        let channels = self.parent_params().out_channels;
        let params = self.windowed_params(channels, kernel, stride, padding);
        self.push(name, LayerType::AvgPool, params, Activation::None, None, None)
    }

    /// Appends a per-column dense layer with bias.
    pub fn fully_connected(&mut self, name: &str, out_channels: usize, activation: Activation) -> usize {
        let params = self.dense_params(out_channels);
        let fan_in = params.in_channels;
        let weight = self.random_tensor(Shape::matrix(out_channels, fan_in), fan_in);
        let bias = self.random_tensor(Shape::vector(out_channels), fan_in);
        self.push(name, LayerType::FullyConnected, params, activation, Some(weight), Some(bias))
    }

    /// Appends a per-column matrix product without bias.
    pub fn matmul(&mut self, name: &str, out_channels: usize, activation: Activation) -> usize {
        let params = self.dense_params(out_channels);
        let fan_in = params.in_channels;
        let weight = self.random_tensor(Shape::matrix(out_channels, fan_in), fan_in);
        self.push(name, LayerType::MatMul, params, activation, Some(weight), None)
    }

    /// Appends `current + other`.
    pub fn residual(&mut self, name: &str, other: usize, activation: Activation) -> usize {
        let params = LayerParams::same_as(&self.parent_params());
        let index = self.push(name, LayerType::Residual, params, activation, None, None);
        self.layers[index].parents.push(other);
        index
    }

    pub fn softmax(&mut self, name: &str) -> usize {
        let params = LayerParams::same_as(&self.parent_params());
        self.push(name, LayerType::Softmax, params, Activation::None, None, None)
    }

    /// Appends layer normalization with unit scale and zero shift.
    pub fn layer_norm(&mut self, name: &str) -> usize {
        let params = LayerParams::same_as(&self.parent_params());
        let c = params.out_channels;
        let gamma = Tensor::from_fn(Shape::vector(c), |_| 1.0);
        let beta = Tensor::zeros(Shape::vector(c));
        self.push(name, LayerType::LayerNorm, params, Activation::None, Some(gamma), Some(beta))
    }

    /// Replaces the weight of layer `index` (for manifests with inline values).
    pub fn set_weight(&mut self, index: usize, weight: Tensor) -> &mut Self {
        if let Some(layer) = self.layers.get_mut(index) {
            layer.weight = Some(weight);
        }
        self
    }

    /// Replaces the bias of layer `index`.
    pub fn set_bias(&mut self, index: usize, bias: Option<Tensor>) -> &mut Self {
        if let Some(layer) = self.layers.get_mut(index) {
            layer.bias = bias;
        }
        self
    }

    /// Validates and returns the network.
    pub fn build(self) -> Result<Network<Validated>, ModelError> {
        Network::new(self.name, self.layers).validate()
    }

    /// A small residual classifier on a `3 × 32 × 32` input.
    ///
    /// ```text
    /// input → conv1 16 → conv2 16 → add(conv1) → maxpool/2 → conv3 32
    ///       → avgpool/2 → ln → fc 10 → softmax
    /// ```
    pub fn synthetic(seed: u64) -> Result<Network<Validated>, ModelError> {
        let mut b = Self::new("synthetic-resnet", 3, 32, 32).seed(seed);
        let c1 = b.conv("conv1", 16, 3, 1, 1, Activation::Relu);
        b.conv("conv2", 16, 3, 1, 1, Activation::None);
        b.residual("add1", c1, Activation::Relu);
        b.max_pool("pool1", 2, 2, 0);
        b.conv("conv3", 32, 3, 1, 1, Activation::Relu);
        b.avg_pool("pool2", 2, 2, 0);
        b.layer_norm("ln");
        b.fully_connected("fc", 10, Activation::None);
        b.softmax("prob");
        b.build()
    }

    // ── Private helpers ────────────────────────────────────────

    fn parent_params(&self) -> LayerParams {
        self.layers[self.current].params
    }

    fn windowed_params(&self, out_channels: usize, kernel: usize, stride: usize, padding: usize) -> LayerParams {
        let p = self.parent_params();
        // Invalid geometry yields zero extents, which validation reports.
        let out_h = LayerParams::windowed_extent(p.out_h, kernel, stride, padding).unwrap_or(0);
        let out_w = LayerParams::windowed_extent(p.out_w, kernel, stride, padding).unwrap_or(0);
        LayerParams {
            in_channels: p.out_channels,
            in_h: p.out_h,
            in_w: p.out_w,
            out_channels,
            out_h,
            out_w,
            kernel_h: kernel,
            kernel_w: kernel,
            stride,
            padding,
        }
    }

    fn dense_params(&self, out_channels: usize) -> LayerParams {
        LayerParams {
            out_channels,
            ..LayerParams::same_as(&self.parent_params())
        }
    }

    fn random_tensor(&mut self, shape: Shape, fan_in: usize) -> Tensor {
        let scale = (1.0 / fan_in.max(1) as f32).sqrt();
        let rng = &mut self.rng;
        Tensor::from_fn(shape, |_| rng.random_range(-scale..scale))
    }

    fn push(
        &mut self,
        name: &str,
        layer_type: LayerType,
        params: LayerParams,
        activation: Activation,
        weight: Option<Tensor>,
        bias: Option<Tensor>,
    ) -> usize {
        let index = self.layers.len();
        self.layers.push(LayerDef {
            name: name.to_string(),
            layer_type,
            index,
            params,
            parents: vec![self.current],
            activation,
            weight,
            bias,
        });
        self.current = index;
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv_residual_block() {
        let mut b = NetworkBuilder::new("block", 4, 8, 8);
        let input = b.current();
        let conv = b.conv("conv", 4, 3, 1, 1, Activation::Relu);
        let add = b.residual("add", input, Activation::None);
        let net = b.build().unwrap();

        assert_eq!(net.layer(conv).unwrap().parents, vec![0]);
        assert_eq!(net.layer(add).unwrap().parents, vec![conv, input]);
        assert_eq!(net.output().layer_type, LayerType::Residual);
    }

    #[test]
    fn test_classifier_head() {
        let mut b = NetworkBuilder::new("cls", 3, 8, 8);
        b.conv("c1", 8, 3, 2, 1, Activation::Relu);
        b.max_pool("p1", 2, 2, 0);
        b.fully_connected("fc", 10, Activation::None);
        b.softmax("prob");
        let net = b.build().unwrap();

        let fc = net.layer(3).unwrap();
        assert_eq!((fc.params.out_h, fc.params.out_w), (2, 2));
        assert_eq!(fc.rows(), 10);
        assert_eq!(net.output().rows(), 10);
    }

    #[test]
    fn test_same_seed_same_weights() {
        let build = |seed| {
            let mut b = NetworkBuilder::new("s", 2, 4, 4).seed(seed);
            b.conv("c", 2, 3, 1, 1, Activation::None);
            b.build().unwrap()
        };
        let a = build(1);
        let b = build(1);
        let c = build(2);
        assert_eq!(a.layer(1).unwrap().weight, b.layer(1).unwrap().weight);
        assert_ne!(a.layer(1).unwrap().weight, c.layer(1).unwrap().weight);
    }

    #[test]
    fn test_oversized_kernel_fails_validation() {
        let mut b = NetworkBuilder::new("bad", 1, 2, 2);
        b.conv("c", 1, 5, 1, 0, Activation::None);
        assert!(b.build().is_err());
    }

    #[test]
    fn test_synthetic_network() {
        let net = NetworkBuilder::synthetic(DEFAULT_SEED).unwrap();
        assert_eq!(net.num_layers(), 10);
        assert_eq!(net.output().layer_type, LayerType::Softmax);
        assert_eq!(net.output().rows(), 10);
        assert_eq!(net.input_len(1), 3 * 32 * 32);
    }

    #[test]
    fn test_at_branches() {
        let mut b = NetworkBuilder::new("branch", 2, 4, 4);
        let a = b.conv("a", 2, 1, 1, 0, Activation::None);
        b.at(0);
        let c = b.conv("c", 2, 1, 1, 0, Activation::None);
        b.residual("sum", a, Activation::None);
        let net = b.build().unwrap();
        assert_eq!(net.layer(c).unwrap().parents, vec![0]);
    }
}

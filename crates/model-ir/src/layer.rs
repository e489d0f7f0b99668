// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer definitions.
//!
//! Every layer produces an output matrix of `out_channels` rows and
//! `batch × out_h × out_w` columns. Column `b·H·W + h·W + w` holds the
//! channel vector of spatial position `(h, w)` in batch item `b`.

use tensor_core::{Activation, Tensor};

/// The computation a layer performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerType {
    /// The network input. Materialized by the caller, never executed.
    Input,
    /// 2-D convolution, weights `[out_c, kh, kw, in_c]`.
    Conv,
    MaxPool,
    /// Average pooling; padding taps count as zeros.
    AvgPool,
    /// Per-column dense layer with bias, weights `[out_c, in_c]`.
    FullyConnected,
    /// Element-wise sum of two parents.
    Residual,
    /// Softmax over the channels of each column.
    Softmax,
    /// Layer normalization over the channels of each column.
    LayerNorm,
    /// Per-column matrix product without bias, weights `[out_c, in_c]`.
    MatMul,
}

impl LayerType {
    /// All layer types, in declaration order.
    pub const ALL: [LayerType; 9] = [
        LayerType::Input,
        LayerType::Conv,
        LayerType::MaxPool,
        LayerType::AvgPool,
        LayerType::FullyConnected,
        LayerType::Residual,
        LayerType::Softmax,
        LayerType::LayerNorm,
        LayerType::MatMul,
    ];

    /// Parses a layer type, accepting common aliases
    /// (`"convolution"`, `"fc"`, `"dense"`, `"add"`, `"ln"`, ...).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "input" => Some(Self::Input),
            "conv" | "conv2d" | "convolution" => Some(Self::Conv),
            "max_pool" | "maxpool" => Some(Self::MaxPool),
            "avg_pool" | "avgpool" | "average_pool" => Some(Self::AvgPool),
            "fully_connected" | "fc" | "dense" | "linear" => Some(Self::FullyConnected),
            "residual" | "add" | "shortcut" => Some(Self::Residual),
            "softmax" => Some(Self::Softmax),
            "layer_norm" | "layernorm" | "ln" => Some(Self::LayerNorm),
            "matmul" | "mat_mul" => Some(Self::MatMul),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Conv => "conv",
            Self::MaxPool => "max_pool",
            Self::AvgPool => "avg_pool",
            Self::FullyConnected => "fully_connected",
            Self::Residual => "residual",
            Self::Softmax => "softmax",
            Self::LayerNorm => "layer_norm",
            Self::MatMul => "matmul",
        }
    }

    /// Number of parent layers this type consumes.
    pub fn num_parents(&self) -> usize {
        match self {
            Self::Input => 0,
            Self::Residual => 2,
            _ => 1,
        }
    }

    /// Whether one output element depends on every channel of its column,
    /// forcing tiles to span all rows.
    pub fn spans_all_rows(&self) -> bool {
        matches!(self, Self::Softmax | Self::LayerNorm)
    }

    /// Whether the layer slides a spatial window over its parent.
    pub fn is_windowed(&self) -> bool {
        matches!(self, Self::Conv | Self::MaxPool | Self::AvgPool)
    }
}

impl std::fmt::Display for LayerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spatial and channel parameters of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct LayerParams {
    pub in_channels: usize,
    pub in_h: usize,
    pub in_w: usize,
    pub out_channels: usize,
    pub out_h: usize,
    pub out_w: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride: usize,
    pub padding: usize,
}

impl LayerParams {
    /// Output extent of a window of size `kernel` sliding over `input`.
    ///
    /// Returns `None` if the window never fits or `stride` is zero.
    pub fn windowed_extent(input: usize, kernel: usize, stride: usize, padding: usize) -> Option<usize> {
        let padded = input + 2 * padding;
        if stride == 0 || kernel == 0 || padded < kernel {
            return None;
        }
        Some((padded - kernel) / stride + 1)
    }

    /// Parameters of a layer that keeps its parent's shape.
    pub fn same_as(parent: &LayerParams) -> Self {
        Self {
            in_channels: parent.out_channels,
            in_h: parent.out_h,
            in_w: parent.out_w,
            out_channels: parent.out_channels,
            out_h: parent.out_h,
            out_w: parent.out_w,
            kernel_h: 1,
            kernel_w: 1,
            stride: 1,
            padding: 0,
        }
    }
}

/// One layer of a [`Network`](crate::Network).
#[derive(Debug, Clone)]
pub struct LayerDef {
    /// Unique name within the network.
    pub name: String,
    pub layer_type: LayerType,
    /// Position in the network (0-based, parents always precede children).
    pub index: usize,
    pub params: LayerParams,
    /// Indices of parent layers, in operand order.
    pub parents: Vec<usize>,
    pub activation: Activation,
    /// Weights, or the normalization scale for [`LayerType::LayerNorm`].
    pub weight: Option<Tensor>,
    /// Bias, or the normalization shift for [`LayerType::LayerNorm`].
    pub bias: Option<Tensor>,
}

impl LayerDef {
    /// Parent `i`, if present.
    pub fn parent(&self, i: usize) -> Option<usize> {
        self.parents.get(i).copied()
    }

    /// Rows of the output matrix.
    pub fn rows(&self) -> usize {
        self.params.out_channels
    }

    /// Columns of the output matrix for a given batch size.
    pub fn cols(&self, batch: usize) -> usize {
        batch * self.params.out_h * self.params.out_w
    }

    /// Floating-point operations needed for one output element.
    pub fn flop_per_output(&self) -> usize {
        let p = &self.params;
        match self.layer_type {
            LayerType::Conv => 2 * p.kernel_h * p.kernel_w * p.in_channels,
            LayerType::FullyConnected | LayerType::MatMul => 2 * p.in_channels,
            LayerType::MaxPool | LayerType::AvgPool => p.kernel_h * p.kernel_w,
            _ => 1,
        }
    }

    /// Input columns read per output column.
    pub fn taps_per_column(&self) -> usize {
        match self.layer_type {
            LayerType::Input => 0,
            t if t.is_windowed() => self.params.kernel_h * self.params.kernel_w,
            LayerType::Residual => 2,
            _ => 1,
        }
    }

    /// Bytes held by weight and bias tensors.
    pub fn weight_bytes(&self) -> usize {
        self.weight.as_ref().map_or(0, Tensor::size_bytes)
            + self.bias.as_ref().map_or(0, Tensor::size_bytes)
    }

    /// One-line description for display.
    pub fn summary(&self) -> String {
        let p = &self.params;
        format!(
            "[{}] {} ({}) {}x{}x{} -> {}x{}x{}, k{}x{} s{} p{}, act {}, {:.1} KB params",
            self.index,
            self.name,
            self.layer_type,
            p.in_channels,
            p.in_h,
            p.in_w,
            p.out_channels,
            p.out_h,
            p.out_w,
            p.kernel_h,
            p.kernel_w,
            p.stride,
            p.padding,
            self.activation,
            self.weight_bytes() as f64 / 1024.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv_layer() -> LayerDef {
        LayerDef {
            name: "conv1".into(),
            layer_type: LayerType::Conv,
            index: 1,
            params: LayerParams {
                in_channels: 3,
                in_h: 8,
                in_w: 8,
                out_channels: 16,
                out_h: 8,
                out_w: 8,
                kernel_h: 3,
                kernel_w: 3,
                stride: 1,
                padding: 1,
            },
            parents: vec![0],
            activation: Activation::Relu,
            weight: None,
            bias: None,
        }
    }

    #[test]
    fn test_from_str_loose() {
        assert_eq!(LayerType::from_str_loose("Conv2D"), Some(LayerType::Conv));
        assert_eq!(LayerType::from_str_loose("fc"), Some(LayerType::FullyConnected));
        assert_eq!(LayerType::from_str_loose("max-pool"), Some(LayerType::MaxPool));
        assert_eq!(LayerType::from_str_loose("add"), Some(LayerType::Residual));
        assert_eq!(LayerType::from_str_loose("attention"), None);
    }

    #[test]
    fn test_as_str_roundtrip() {
        for t in LayerType::ALL {
            assert_eq!(LayerType::from_str_loose(t.as_str()), Some(t));
        }
    }

    #[test]
    fn test_matrix_dims() {
        let l = conv_layer();
        assert_eq!(l.rows(), 16);
        assert_eq!(l.cols(2), 128);
    }

    #[test]
    fn test_flop_per_output() {
        let l = conv_layer();
        assert_eq!(l.flop_per_output(), 2 * 9 * 3);
        assert_eq!(l.taps_per_column(), 9);
    }

    #[test]
    fn test_windowed_extent() {
        assert_eq!(LayerParams::windowed_extent(8, 3, 1, 1), Some(8));
        assert_eq!(LayerParams::windowed_extent(8, 2, 2, 0), Some(4));
        assert_eq!(LayerParams::windowed_extent(2, 5, 1, 0), None);
        assert_eq!(LayerParams::windowed_extent(8, 3, 0, 1), None);
    }

    #[test]
    fn test_parent_counts() {
        assert_eq!(LayerType::Input.num_parents(), 0);
        assert_eq!(LayerType::Residual.num_parents(), 2);
        assert_eq!(LayerType::Softmax.num_parents(), 1);
        assert!(LayerType::LayerNorm.spans_all_rows());
        assert!(!LayerType::Conv.spans_all_rows());
    }

    #[test]
    fn test_summary() {
        let s = conv_layer().summary();
        assert!(s.contains("conv1"));
        assert!(s.contains("relu"));
    }
}

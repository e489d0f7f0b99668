// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! JSON network manifests.
//!
//! # Format
//! ```json
//! {
//!   "name": "tiny-resnet",
//!   "dtype": "f32",
//!   "seed": 7,
//!   "input": { "channels": 4, "height": 8, "width": 8 },
//!   "layers": [
//!     { "name": "conv1", "type": "conv", "out_channels": 4,
//!       "kernel": 3, "stride": 1, "padding": 1, "activation": "relu" },
//!     { "name": "add", "type": "residual", "parents": ["conv1", "input"] },
//!     { "name": "fc", "type": "fc", "out_channels": 10,
//!       "weights": [ ... ], "bias": [ ... ] },
//!     { "name": "prob", "type": "softmax" }
//!   ]
//! }
//! ```
//!
//! A layer's parents default to the previous layer. Parameters not given
//! inline are drawn from a generator seeded with `seed`.

use crate::graph::Validated;
use crate::{LayerType, ModelError, Network, NetworkBuilder};
use std::collections::HashMap;
use std::path::Path;
use tensor_core::{Activation, DType, Tensor};

/// Top-level manifest.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NetworkManifest {
    pub name: String,
    #[serde(default = "default_dtype")]
    pub dtype: String,
    #[serde(default)]
    pub seed: Option<u64>,
    pub input: ManifestInput,
    pub layers: Vec<ManifestLayer>,
}

fn default_dtype() -> String {
    "f32".to_string()
}

/// Input dimensions of one batch item.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ManifestInput {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

/// One layer entry.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ManifestLayer {
    pub name: String,
    #[serde(rename = "type")]
    pub layer_type: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub out_channels: Option<usize>,
    #[serde(default)]
    pub kernel: Option<usize>,
    #[serde(default)]
    pub stride: Option<usize>,
    #[serde(default)]
    pub padding: Option<usize>,
    #[serde(default)]
    pub activation: Option<String>,
    #[serde(default)]
    pub weights: Option<Vec<f32>>,
    #[serde(default)]
    pub bias: Option<Vec<f32>>,
}

impl NetworkManifest {
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Checks the manifest before any layer is built.
    ///
    /// - At least one layer, unique names, recognised types.
    /// - The element type is one the kernels compute in.
    /// - Parent references name earlier layers.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.layers.is_empty() {
            return Err(ModelError::InvalidGraph("manifest contains no layers".into()));
        }

        let dtype: DType = self
            .dtype
            .parse()
            .map_err(|_| ModelError::UnsupportedDType(self.dtype.clone()))?;
        if !dtype.is_computable() {
            return Err(ModelError::UnsupportedDType(self.dtype.clone()));
        }

        let mut seen = std::collections::HashSet::from(["input"]);
        for layer in &self.layers {
            let bad = |detail: String| ModelError::InvalidLayer {
                layer: layer.name.clone(),
                detail,
            };
            match LayerType::from_str_loose(&layer.layer_type) {
                None => return Err(bad(format!("unrecognised layer type '{}'", layer.layer_type))),
                Some(LayerType::Input) => return Err(bad("input is declared in the 'input' section".into())),
                Some(_) => {}
            }
            for parent in &layer.parents {
                if !seen.contains(parent.as_str()) {
                    return Err(bad(format!("unknown or later parent '{parent}'")));
                }
            }
            if !seen.insert(layer.name.as_str()) {
                return Err(bad("duplicate layer name".into()));
            }
        }
        Ok(())
    }

    /// Validates the manifest and builds the network it describes.
    pub fn build(&self) -> Result<Network<Validated>, ModelError> {
        self.validate()?;

        let mut builder = NetworkBuilder::new(
            self.name.clone(),
            self.input.channels,
            self.input.height,
            self.input.width,
        );
        if let Some(seed) = self.seed {
            builder = builder.seed(seed);
        }

        let mut index_of: HashMap<&str, usize> = HashMap::from([("input", 0)]);
        for layer in &self.layers {
            let parents: Vec<usize> = layer.parents.iter().map(|p| index_of[p.as_str()]).collect();
            if let Some(&first) = parents.first() {
                builder.at(first);
            }

            let activation: Activation = match &layer.activation {
                Some(a) => a.parse().map_err(|detail| ModelError::InvalidLayer {
                    layer: layer.name.clone(),
                    detail,
                })?,
                None => Activation::None,
            };
            let kernel = layer.kernel.unwrap_or(1);
            let stride = layer.stride.unwrap_or(1);
            let padding = layer.padding.unwrap_or(0);
            let out_channels = || {
                layer.out_channels.ok_or_else(|| ModelError::InvalidLayer {
                    layer: layer.name.clone(),
                    detail: "missing 'out_channels'".into(),
                })
            };

            // Parsed in `validate`.
            let layer_type = LayerType::from_str_loose(&layer.layer_type).unwrap_or(LayerType::Input);
            let index = match layer_type {
                LayerType::Conv => {
                    builder.conv(&layer.name, out_channels()?, kernel, stride, padding, activation)
                }
                LayerType::MaxPool => builder.max_pool(&layer.name, kernel, stride, padding),
                LayerType::AvgPool => builder.avg_pool(&layer.name, kernel, stride, padding),
                LayerType::FullyConnected => {
                    builder.fully_connected(&layer.name, out_channels()?, activation)
                }
                LayerType::MatMul => builder.matmul(&layer.name, out_channels()?, activation),
                LayerType::Residual => {
                    let other = parents.get(1).copied().ok_or_else(|| ModelError::InvalidLayer {
                        layer: layer.name.clone(),
                        detail: "residual layers need two parents".into(),
                    })?;
                    builder.residual(&layer.name, other, activation)
                }
                LayerType::Softmax => builder.softmax(&layer.name),
                LayerType::LayerNorm => builder.layer_norm(&layer.name),
                LayerType::Input => {
                    return Err(ModelError::InvalidLayer {
                        layer: layer.name.clone(),
                        detail: "unexpected input layer".into(),
                    })
                }
            };

            if let Some(values) = &layer.weights {
                let shape = builder_weight_shape(values.len());
                builder.set_weight(index, Tensor::from_vec(shape, values.clone())?);
            }
            if let Some(values) = &layer.bias {
                let shape = builder_weight_shape(values.len());
                builder.set_bias(index, Some(Tensor::from_vec(shape, values.clone())?));
            }
            index_of.insert(layer.name.as_str(), index);
        }

        let network = builder.build()?;
        tracing::info!("{}", network.summary());
        Ok(network)
    }
}

/// Inline values are flat; element counts are checked during validation.
fn builder_weight_shape(len: usize) -> tensor_core::Shape {
    tensor_core::Shape::vector(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "name": "tiny",
            "seed": 3,
            "input": { "channels": 2, "height": 4, "width": 4 },
            "layers": [
                { "name": "conv1", "type": "conv", "out_channels": 2,
                  "kernel": 3, "stride": 1, "padding": 1, "activation": "relu" },
                { "name": "add", "type": "residual", "parents": ["conv1", "input"] },
                { "name": "fc", "type": "fc", "out_channels": 3,
                  "weights": [1, 0, 0, 1, 1, 1], "bias": [0, 0, 0.5] },
                { "name": "prob", "type": "softmax" }
            ]
        }"#
    }

    #[test]
    fn test_parse_and_build() {
        let m = NetworkManifest::from_json(sample_json()).unwrap();
        assert_eq!(m.dtype, "f32");
        let net = m.build().unwrap();
        assert_eq!(net.num_layers(), 5);
        assert_eq!(net.layer(2).unwrap().parents, vec![1, 0]);

        let fc = net.layer(3).unwrap();
        assert_eq!(fc.weight.as_ref().unwrap().as_slice(), &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        assert_eq!(fc.bias.as_ref().unwrap().as_slice()[2], 0.5);
    }

    #[test]
    fn test_unknown_type() {
        let mut m = NetworkManifest::from_json(sample_json()).unwrap();
        m.layers[0].layer_type = "attention".into();
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_unsupported_dtype() {
        let mut m = NetworkManifest::from_json(sample_json()).unwrap();
        m.dtype = "f16".into();
        assert!(matches!(m.validate(), Err(ModelError::UnsupportedDType(_))));
    }

    #[test]
    fn test_forward_parent_reference() {
        let mut m = NetworkManifest::from_json(sample_json()).unwrap();
        m.layers[1].parents = vec!["fc".into(), "input".into()];
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_wrong_inline_weight_count() {
        let mut m = NetworkManifest::from_json(sample_json()).unwrap();
        m.layers[2].weights = Some(vec![1.0; 5]);
        assert!(m.build().is_err());
    }

    #[test]
    fn test_missing_out_channels() {
        let mut m = NetworkManifest::from_json(sample_json()).unwrap();
        m.layers[0].out_channels = None;
        assert!(m.build().is_err());
    }
}

// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Element-wise activations applied after a layer's main computation.

use std::fmt;
use std::str::FromStr;

/// Coefficient `sqrt(2/π)`.
const SQRT_2_OVER_PI: f32 = 0.7978845608;

/// Cubic coefficient in the tanh approximation.
const GELU_COEFF: f32 = 0.044715;

/// Negative slope of [`Activation::LeakyRelu`].
const LEAKY_SLOPE: f32 = 0.1;

/// Activation function fused at the end of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    None,
    Relu,
    LeakyRelu,
    Gelu,
    Sigmoid,
    Tanh,
}

impl Activation {
    pub fn as_str(self) -> &'static str {
        match self {
            Activation::None => "none",
            Activation::Relu => "relu",
            Activation::LeakyRelu => "leaky_relu",
            Activation::Gelu => "gelu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
        }
    }

    /// Applies the activation to one value.
    #[inline(always)]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::None => x,
            Activation::Relu => x.max(0.0),
            Activation::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    x * LEAKY_SLOPE
                }
            }
            Activation::Gelu => gelu_scalar(x),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "none" | "linear" | "" => Ok(Activation::None),
            "relu" => Ok(Activation::Relu),
            "leaky_relu" | "leaky" => Ok(Activation::LeakyRelu),
            "gelu" => Ok(Activation::Gelu),
            "sigmoid" => Ok(Activation::Sigmoid),
            "tanh" => Ok(Activation::Tanh),
            other => Err(format!("unknown activation '{other}'")),
        }
    }
}

/// Applies `activation` in place over `values`.
pub fn apply_activation(activation: Activation, values: &mut [f32]) {
    if activation == Activation::None {
        return;
    }
    for v in values.iter_mut() {
        *v = activation.apply(*v);
    }
}

/// GELU, fast tanh approximation:
///
/// `GELU(x) ≈ 0.5 * x * (1 + tanh(sqrt(2/π) * (x + 0.044715 * x³)))`
#[inline(always)]
fn gelu_scalar(x: f32) -> f32 {
    let inner = SQRT_2_OVER_PI * (x + GELU_COEFF * x * x * x);
    0.5 * x * (1.0 + inner.tanh())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relu_and_leaky() {
        let mut v = [-2.0, 0.0, 3.0];
        apply_activation(Activation::Relu, &mut v);
        assert_eq!(v, [0.0, 0.0, 3.0]);

        assert!((Activation::LeakyRelu.apply(-2.0) + 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_gelu_limits() {
        assert!(gelu_scalar(0.0).abs() < 1e-6);
        assert!((gelu_scalar(3.0) - 3.0).abs() < 0.01);
        assert!(gelu_scalar(-3.0).abs() < 0.01);
    }

    #[test]
    fn test_sigmoid_midpoint() {
        assert!((Activation::Sigmoid.apply(0.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_none_is_identity() {
        let mut v = [-1.5, 2.5];
        apply_activation(Activation::None, &mut v);
        assert_eq!(v, [-1.5, 2.5]);
    }

    #[test]
    fn test_parse() {
        assert_eq!("ReLU".parse::<Activation>().unwrap(), Activation::Relu);
        assert_eq!("leaky-relu".parse::<Activation>().unwrap(), Activation::LeakyRelu);
        assert!("swish".parse::<Activation>().is_err());
    }
}

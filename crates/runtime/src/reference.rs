// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Direct single-threaded evaluation of a network.
//!
//! Untiled nested loops over the same layer math the kernels implement.
//! Used to check scheduled runs and by the CLI's `--verify` flag.
//!
//! Buffers use the plan's dense layout: element `(channel c, column j)`
//! lives at `j × channels + c`, with column `j = b·H·W + h·W + w`.

use crate::kernels::LAYER_NORM_EPS;
use crate::RuntimeError;
use model_ir::graph::Validated;
use model_ir::{LayerDef, LayerType, Network};
use partition_planner::PlannerError;
use tensor_core::apply_activation;

/// Evaluates every layer and returns all layer outputs, input included.
pub fn evaluate(
    network: &Network<Validated>,
    batch: usize,
    input: &[f32],
) -> Result<Vec<Vec<f32>>, RuntimeError> {
    if batch == 0 {
        return Err(PlannerError::ZeroBatch.into());
    }
    let expected = network.input_len(batch);
    if input.len() != expected {
        return Err(PlannerError::InputSizeMismatch {
            expected,
            actual: input.len(),
        }
        .into());
    }

    let mut outputs: Vec<Vec<f32>> = Vec::with_capacity(network.num_layers());
    outputs.push(input.to_vec());
    for layer in network.iter_layers().skip(1) {
        let parent = |i: usize| outputs[layer.parents[i]].as_slice();
        let mut out = match layer.layer_type {
            LayerType::Conv => conv(layer, batch, parent(0)),
            LayerType::MaxPool | LayerType::AvgPool => pool(layer, batch, parent(0)),
            LayerType::FullyConnected | LayerType::MatMul => dense(layer, batch, parent(0)),
            LayerType::Residual => parent(0).iter().zip(parent(1)).map(|(a, b)| a + b).collect(),
            LayerType::Softmax => softmax(layer, parent(0)),
            LayerType::LayerNorm => layer_norm(layer, parent(0)),
            LayerType::Input => parent(0).to_vec(),
        };
        if !matches!(layer.layer_type, LayerType::Softmax | LayerType::LayerNorm) {
            apply_activation(layer.activation, &mut out);
        }
        outputs.push(out);
    }
    Ok(outputs)
}

/// Output of the last layer only.
pub fn evaluate_output(
    network: &Network<Validated>,
    batch: usize,
    input: &[f32],
) -> Result<Vec<f32>, RuntimeError> {
    Ok(evaluate(network, batch, input)?.pop().unwrap_or_default())
}

fn weight(layer: &LayerDef) -> &[f32] {
    layer.weight.as_ref().map(|w| w.as_slice()).unwrap_or(&[])
}

fn bias(layer: &LayerDef, oc: usize) -> f32 {
    layer.bias.as_ref().map_or(0.0, |b| b.as_slice()[oc])
}

/// Visits every output position with the flat index of each in-bounds
/// kernel tap: `f(out_col, tap, in_col)`.
fn for_each_tap(layer: &LayerDef, batch: usize, mut f: impl FnMut(usize, usize, usize)) {
    let p = &layer.params;
    for b in 0..batch {
        for oh in 0..p.out_h {
            for ow in 0..p.out_w {
                let out_col = (b * p.out_h + oh) * p.out_w + ow;
                for kh in 0..p.kernel_h {
                    for kw in 0..p.kernel_w {
                        let ih = (oh * p.stride + kh) as isize - p.padding as isize;
                        let iw = (ow * p.stride + kw) as isize - p.padding as isize;
                        if ih < 0 || iw < 0 || ih >= p.in_h as isize || iw >= p.in_w as isize {
                            continue;
                        }
                        let in_col = (b * p.in_h + ih as usize) * p.in_w + iw as usize;
                        f(out_col, kh * p.kernel_w + kw, in_col);
                    }
                }
            }
        }
    }
}

fn conv(layer: &LayerDef, batch: usize, input: &[f32]) -> Vec<f32> {
    let p = &layer.params;
    let (ic, oc) = (p.in_channels, p.out_channels);
    let k = p.kernel_h * p.kernel_w * ic;
    let w = weight(layer);
    let cols = batch * p.out_h * p.out_w;
    let mut out = vec![0.0f32; cols * oc];
    for_each_tap(layer, batch, |out_col, tap, in_col| {
        let x = &input[in_col * ic..(in_col + 1) * ic];
        for o in 0..oc {
            let w_tap = &w[o * k + tap * ic..o * k + (tap + 1) * ic];
            out[out_col * oc + o] += w_tap.iter().zip(x).map(|(a, b)| a * b).sum::<f32>();
        }
    });
    for col in 0..cols {
        for o in 0..oc {
            out[col * oc + o] += bias(layer, o);
        }
    }
    out
}

fn pool(layer: &LayerDef, batch: usize, input: &[f32]) -> Vec<f32> {
    let p = &layer.params;
    let c = p.out_channels;
    let cols = batch * p.out_h * p.out_w;
    let max = layer.layer_type == LayerType::MaxPool;
    let init = if max { f32::NEG_INFINITY } else { 0.0 };
    let mut out = vec![init; cols * c];
    for_each_tap(layer, batch, |out_col, _, in_col| {
        for ch in 0..c {
            let x = input[in_col * c + ch];
            let o = &mut out[out_col * c + ch];
            if max {
                *o = o.max(x);
            } else {
                *o += x;
            }
        }
    });
    if !max {
        let window = (p.kernel_h * p.kernel_w) as f32;
        out.iter_mut().for_each(|v| *v /= window);
    }
    out
}

fn dense(layer: &LayerDef, batch: usize, input: &[f32]) -> Vec<f32> {
    let p = &layer.params;
    let (ic, oc) = (p.in_channels, p.out_channels);
    let cols = batch * p.out_h * p.out_w;
    let w = weight(layer);
    let mut out = vec![0.0f32; cols * oc];
    for col in 0..cols {
        let x = &input[col * ic..(col + 1) * ic];
        for o in 0..oc {
            let dot: f32 = w[o * ic..(o + 1) * ic].iter().zip(x).map(|(a, b)| a * b).sum();
            out[col * oc + o] = dot + bias(layer, o);
        }
    }
    out
}

fn softmax(layer: &LayerDef, input: &[f32]) -> Vec<f32> {
    let c = layer.params.out_channels;
    let mut out = input.to_vec();
    for column in out.chunks_mut(c) {
        let max = column.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0;
        for v in column.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        column.iter_mut().for_each(|v| *v /= sum);
    }
    out
}

fn layer_norm(layer: &LayerDef, input: &[f32]) -> Vec<f32> {
    let c = layer.params.out_channels;
    let gamma = weight(layer);
    let mut out = input.to_vec();
    for column in out.chunks_mut(c) {
        let n = c as f32;
        let mean = column.iter().sum::<f32>() / n;
        let var = column.iter().map(|v| v * v).sum::<f32>() / n - mean * mean;
        let inv = 1.0 / (var.max(0.0) + LAYER_NORM_EPS).sqrt();
        for (i, v) in column.iter_mut().enumerate() {
            let beta = layer.bias.as_ref().map_or(0.0, |b| b.as_slice()[i]);
            *v = (*v - mean) * inv * gamma[i] + beta;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::{Activation, NetworkBuilder};
    use tensor_core::{Shape, Tensor};

    #[test]
    fn test_identity_conv() {
        // 1x1 conv with identity weights and zero bias copies the input.
        let mut b = NetworkBuilder::new("id", 2, 2, 2);
        let c = b.conv("c", 2, 1, 1, 0, Activation::None);
        b.set_weight(c, Tensor::from_vec(Shape::vector(4), vec![1.0, 0.0, 0.0, 1.0]).unwrap());
        b.set_bias(c, Some(Tensor::zeros(Shape::vector(2))));
        let net = b.build().unwrap();

        let input: Vec<f32> = (0..8).map(|i| i as f32).collect();
        assert_eq!(evaluate_output(&net, 1, &input).unwrap(), input);
    }

    #[test]
    fn test_max_pool_and_residual() {
        let mut b = NetworkBuilder::new("p", 1, 2, 2);
        b.max_pool("p", 2, 2, 0);
        let net = b.build().unwrap();
        let out = evaluate_output(&net, 1, &[1.0, 5.0, -2.0, 3.0]).unwrap();
        assert_eq!(out, vec![5.0]);

        let mut b = NetworkBuilder::new("r", 1, 1, 2);
        b.residual("r", 0, Activation::Relu);
        let net = b.build().unwrap();
        let out = evaluate_output(&net, 1, &[1.0, -3.0]).unwrap();
        assert_eq!(out, vec![2.0, 0.0]);
    }

    #[test]
    fn test_softmax_columns_sum_to_one() {
        let mut b = NetworkBuilder::new("s", 3, 1, 2);
        b.softmax("s");
        let net = b.build().unwrap();
        let out = evaluate_output(&net, 1, &[1.0, 2.0, 3.0, 0.0, 0.0, 0.0]).unwrap();
        for column in out.chunks(3) {
            assert!((column.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        }
        assert!((out[3] - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_input_size_checked() {
        let mut b = NetworkBuilder::new("s", 3, 1, 2);
        b.softmax("s");
        let net = b.build().unwrap();
        assert!(evaluate(&net, 1, &[0.0; 5]).is_err());
        assert!(evaluate(&net, 0, &[]).is_err());
    }
}

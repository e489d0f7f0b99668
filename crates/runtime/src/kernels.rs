// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Kernel registry: layer type → tile kernel.
//!
//! Workers look up the kernel of an instruction's layer type and hand it a
//! [`TileContext`]. Adding a layer type means registering one more
//! [`Kernel`]; nothing in the scheduler changes.
//!
//! | Layer type | Built-in kernel |
//! |---|---|
//! | `Conv` | im2col into scratch, GEMM, bias, activation |
//! | `MaxPool` / `AvgPool` | window gather per channel |
//! | `FullyConnected` / `MatMul` | GEMM over parent columns, optional bias, activation |
//! | `Residual` | element-wise add, activation |
//! | `Softmax` | per-column softmax |
//! | `LayerNorm` | per-column normalization, ε = 1e-6 |

use crate::{DeviceKind, RuntimeError};
use model_ir::graph::Validated;
use model_ir::{LayerDef, LayerType, Network};
use partition_planner::{ExecutionPlan, Instruction};
use std::collections::HashMap;
use std::sync::Arc;
use tensor_core::{
    add_columns, apply_activation, avg_pool_column, gemm, im2col_column, layer_norm_columns,
    max_pool_column, softmax_columns, MatrixView, MatrixViewMut,
};

/// Epsilon of the layer-norm kernel.
pub const LAYER_NORM_EPS: f32 = 1e-6;

// ── Tile context ───────────────────────────────────────────────────

/// Everything a kernel may touch while executing one instruction.
pub struct TileContext<'a> {
    pub plan: &'a ExecutionPlan,
    pub inst: &'a Instruction,
    pub layer: &'a LayerDef,
    /// The instruction's own tile of the layer output.
    pub output: MatrixViewMut<'a>,
    /// Worker-owned scratch space, reused across instructions.
    pub scratch: &'a mut Vec<f32>,
}

impl<'a> TileContext<'a> {
    /// Builds the context for an instruction the caller holds in `Ready`.
    pub(crate) fn new(plan: &'a ExecutionPlan, inst: &'a Instruction, scratch: &'a mut Vec<f32>) -> Self {
        // SAFETY: the calling worker is the only executor of `inst`; tiles
        // of one layer never overlap.
        let output = unsafe { plan.tile_view_mut(inst) };
        Self {
            plan,
            inst,
            layer: plan.layer_def(inst.layer()),
            output,
            scratch,
        }
    }

    /// Output of parent operand `i`.
    ///
    /// Kernels read only the columns and rows the instruction depends on,
    /// all of which were written by completed parents.
    pub fn parent(&self, i: usize) -> MatrixView<'a> {
        let index = self.layer.parents[i];
        // SAFETY: see above; reads stay within completed parent tiles.
        unsafe { self.plan.layer_view(index) }
    }

    fn exec_error(&self, source: tensor_core::TensorError) -> RuntimeError {
        RuntimeError::ExecutionError {
            layer: self.layer.name.clone(),
            source,
        }
    }
}

// ── Kernel trait ───────────────────────────────────────────────────

/// A tile kernel for one layer type.
pub trait Kernel: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the kernel can run on `device`. Unsupported instructions are
    /// skipped, not failed.
    fn supports(&self, device: DeviceKind) -> bool {
        device == DeviceKind::Cpu
    }

    /// Computes `ctx.output` from the parents.
    fn execute(&self, ctx: &mut TileContext<'_>) -> Result<(), RuntimeError>;
}

// ── Registry ───────────────────────────────────────────────────────

/// Maps layer types to kernels.
#[derive(Clone, Default)]
pub struct KernelRegistry {
    kernels: HashMap<LayerType, Arc<dyn Kernel>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a CPU kernel for every non-input layer type.
    pub fn with_builtin_kernels() -> Self {
        let mut r = Self::new();
        r.register(LayerType::Conv, Arc::new(ConvKernel));
        r.register(LayerType::MaxPool, Arc::new(PoolKernel { max: true }));
        r.register(LayerType::AvgPool, Arc::new(PoolKernel { max: false }));
        r.register(LayerType::FullyConnected, Arc::new(DenseKernel { name: "fully_connected" }));
        r.register(LayerType::MatMul, Arc::new(DenseKernel { name: "matmul" }));
        r.register(LayerType::Residual, Arc::new(ResidualKernel));
        r.register(LayerType::Softmax, Arc::new(SoftmaxKernel));
        r.register(LayerType::LayerNorm, Arc::new(LayerNormKernel));
        r
    }

    /// Registers `kernel` for `layer_type`, returning the one it replaces.
    pub fn register(&mut self, layer_type: LayerType, kernel: Arc<dyn Kernel>) -> Option<Arc<dyn Kernel>> {
        self.kernels.insert(layer_type, kernel)
    }

    pub fn get(&self, layer_type: LayerType) -> Option<&Arc<dyn Kernel>> {
        self.kernels.get(&layer_type)
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    /// Checks that every non-input layer of `network` has a kernel.
    pub fn covers(&self, network: &Network<Validated>) -> Result<(), RuntimeError> {
        for layer in network.iter_layers().filter(|l| l.layer_type != LayerType::Input) {
            if !self.kernels.contains_key(&layer.layer_type) {
                return Err(RuntimeError::MissingKernel {
                    layer: layer.name.clone(),
                    layer_type: layer.layer_type,
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.kernels.values().map(|k| k.name()).collect();
        names.sort_unstable();
        f.debug_struct("KernelRegistry").field("kernels", &names).finish()
    }
}

// ── Built-in kernels ───────────────────────────────────────────────

/// Adds the bias of each output row and applies the activation.
fn finish_tile(ctx: &mut TileContext<'_>) {
    let layer = ctx.layer;
    let row0 = ctx.inst.row_range().start;
    let bias = layer.bias.as_ref().map(|b| &b.as_slice()[row0..row0 + ctx.output.rows()]);
    for col in 0..ctx.output.cols() {
        let column = ctx.output.column_mut(col);
        if let Some(bias) = bias {
            for (v, b) in column.iter_mut().zip(bias) {
                *v += b;
            }
        }
        apply_activation(layer.activation, column);
    }
}

fn weights<'a>(ctx: &TileContext<'a>) -> &'a [f32] {
    let layer = ctx.layer;
    layer.weight.as_ref().map(|w| w.as_slice()).unwrap_or(&[])
}

struct ConvKernel;

impl Kernel for ConvKernel {
    fn name(&self) -> &str {
        "conv"
    }

    fn execute(&self, ctx: &mut TileContext<'_>) -> Result<(), RuntimeError> {
        let parent = ctx.parent(0);
        let inst = ctx.inst;
        let channels = ctx.layer.params.in_channels;
        let k = inst.taps() * channels;
        let cols = inst.col_range().len();

        ctx.scratch.clear();
        ctx.scratch.resize(k * cols, 0.0);
        for local in 0..cols {
            let taps = inst
                .input_taps(local)
                .iter()
                .copied()
                .map(|t| t.map(|c| parent.column(c as usize)));
            im2col_column(taps, channels, &mut ctx.scratch[local * k..(local + 1) * k]);
        }

        let row0 = inst.row_range().start;
        let w = weights(ctx);
        let b = MatrixView::new(ctx.scratch.as_slice(), k, cols, k).map_err(|e| ctx.exec_error(e))?;
        gemm(&w[row0 * k..], k, &b, &mut ctx.output).map_err(|e| ctx.exec_error(e))?;
        finish_tile(ctx);
        Ok(())
    }
}

struct PoolKernel {
    max: bool,
}

impl Kernel for PoolKernel {
    fn name(&self) -> &str {
        if self.max {
            "max_pool"
        } else {
            "avg_pool"
        }
    }

    fn execute(&self, ctx: &mut TileContext<'_>) -> Result<(), RuntimeError> {
        let parent = ctx.parent(0);
        let inst = ctx.inst;
        let rows = inst.row_range();
        let window = inst.taps();
        for local in 0..ctx.output.cols() {
            let taps = inst
                .input_taps(local)
                .iter()
                .copied()
                .map(|t| t.map(|c| parent.column_rows(c as usize, rows.clone())));
            let out = ctx.output.column_mut(local);
            if self.max {
                max_pool_column(taps, out);
            } else {
                avg_pool_column(taps, window, out);
            }
        }
        Ok(())
    }
}

/// Fully-connected and matmul: `W[rows, :] · parent[:, cols]`.
struct DenseKernel {
    name: &'static str,
}

impl Kernel for DenseKernel {
    fn name(&self) -> &str {
        self.name
    }

    fn execute(&self, ctx: &mut TileContext<'_>) -> Result<(), RuntimeError> {
        let parent = ctx.parent(0);
        let k = parent.rows();
        let b = parent.sub_view(0..k, ctx.inst.col_range());
        let row0 = ctx.inst.row_range().start;
        let w = weights(ctx);
        gemm(&w[row0 * k..], k, &b, &mut ctx.output).map_err(|e| ctx.exec_error(e))?;
        finish_tile(ctx);
        Ok(())
    }
}

struct ResidualKernel;

impl Kernel for ResidualKernel {
    fn name(&self) -> &str {
        "residual"
    }

    fn execute(&self, ctx: &mut TileContext<'_>) -> Result<(), RuntimeError> {
        let (lhs, rhs) = (ctx.parent(0), ctx.parent(1));
        let inst = ctx.inst;
        let rows = inst.row_range();
        for local in 0..ctx.output.cols() {
            let (a, b) = match (inst.input_column(local, 0), inst.input_column(local, 1)) {
                (Some(a), Some(b)) => (a, b),
                _ => continue,
            };
            add_columns(
                lhs.column_rows(a, rows.clone()),
                rhs.column_rows(b, rows.clone()),
                ctx.output.column_mut(local),
            );
        }
        finish_tile(ctx);
        Ok(())
    }
}

/// Copies the parent columns of a row-spanning tile into the output.
fn copy_parent_columns(ctx: &mut TileContext<'_>) {
    let parent = ctx.parent(0);
    let inst = ctx.inst;
    for (local, col) in inst.col_range().enumerate() {
        ctx.output.column_mut(local).copy_from_slice(parent.column(col));
    }
}

struct SoftmaxKernel;

impl Kernel for SoftmaxKernel {
    fn name(&self) -> &str {
        "softmax"
    }

    fn execute(&self, ctx: &mut TileContext<'_>) -> Result<(), RuntimeError> {
        copy_parent_columns(ctx);
        softmax_columns(&mut ctx.output);
        Ok(())
    }
}

struct LayerNormKernel;

impl Kernel for LayerNormKernel {
    fn name(&self) -> &str {
        "layer_norm"
    }

    fn execute(&self, ctx: &mut TileContext<'_>) -> Result<(), RuntimeError> {
        copy_parent_columns(ctx);
        let gamma = weights(ctx);
        let layer = ctx.layer;
        let beta = layer.bias.as_ref().map(|b| b.as_slice());
        layer_norm_columns(&mut ctx.output, gamma, beta, LAYER_NORM_EPS).map_err(|e| ctx.exec_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::NetworkBuilder;

    #[test]
    fn test_builtin_registry_covers_all_types() {
        let r = KernelRegistry::with_builtin_kernels();
        for t in LayerType::ALL.iter().filter(|&&t| t != LayerType::Input) {
            assert!(r.get(*t).is_some(), "missing {t}");
        }
        assert_eq!(r.len(), 8);
    }

    #[test]
    fn test_covers_reports_missing() {
        let mut b = NetworkBuilder::new("n", 2, 4, 4);
        b.softmax("prob");
        let net = b.build().unwrap();
        assert!(KernelRegistry::with_builtin_kernels().covers(&net).is_ok());
        let err = KernelRegistry::new().covers(&net).unwrap_err();
        assert!(matches!(err, RuntimeError::MissingKernel { layer_type: LayerType::Softmax, .. }));
    }

    #[test]
    fn test_cpu_only_support() {
        let r = KernelRegistry::with_builtin_kernels();
        let conv = r.get(LayerType::Conv).unwrap();
        assert!(conv.supports(DeviceKind::Cpu));
        assert!(!conv.supports(DeviceKind::Gpu(0)));
    }

    #[test]
    fn test_register_replaces() {
        struct Noop;
        impl Kernel for Noop {
            fn name(&self) -> &str {
                "noop"
            }
            fn execute(&self, _: &mut TileContext<'_>) -> Result<(), RuntimeError> {
                Ok(())
            }
        }
        let mut r = KernelRegistry::with_builtin_kernels();
        let old = r.register(LayerType::Conv, Arc::new(Noop));
        assert_eq!(old.unwrap().name(), "conv");
        assert_eq!(r.get(LayerType::Conv).unwrap().name(), "noop");
    }
}

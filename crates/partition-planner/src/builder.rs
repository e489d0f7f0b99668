// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tiling and dependency discovery.
//!
//! # Pipeline
//! ```text
//! Network<Validated> + batch
//!   │  1. tile shape per layer (flop target, minimums, min tile count)
//!   │  2. buffer layout (stride, padded cols, aligned size, arena offset)
//!   │  3. instructions (one per tile, row tiles fastest)
//!   │  4. input columns + parents per instruction
//!   │  5. children from parents
//!   ▼
//! ExecutionPlan
//! ```

use crate::plan::next_plan_id;
use crate::{ExecutionPlan, Instruction, LayerExecState, PlanArena, PlannerError};
use memory_manager::MemoryPool;
use model_ir::graph::Validated;
use model_ir::{LayerDef, LayerType, Network};
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::Arc;

/// Tile granularity parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TilingConfig {
    /// Target floating-point operations per instruction.
    pub flop_per_instruction: usize,
    pub min_tile_rows: usize,
    pub min_tile_cols: usize,
    /// Tiles are split until a layer has at least this many.
    pub min_tiles_per_layer: usize,
    /// Byte alignment of each layer's output buffer.
    pub mem_align: usize,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            flop_per_instruction: 50_000,
            min_tile_rows: 8,
            min_tile_cols: 8,
            min_tiles_per_layer: 4,
            mem_align: 64,
        }
    }
}

impl TilingConfig {
    pub fn validate(&self) -> Result<(), PlannerError> {
        let bad = |s: &str| Err(PlannerError::InvalidTiling(s.to_string()));
        if self.flop_per_instruction == 0 {
            return bad("flop_per_instruction must be positive");
        }
        if self.min_tile_rows == 0 || self.min_tile_cols == 0 {
            return bad("minimum tile dims must be positive");
        }
        if self.mem_align == 0 || self.mem_align % std::mem::size_of::<f32>() != 0 {
            return bad("mem_align must be a positive multiple of 4");
        }
        if self.mem_align > memory_manager::MEM_ALIGN || !self.mem_align.is_power_of_two() {
            return bad("mem_align must be a power of two no larger than 64");
        }
        Ok(())
    }

    /// Tile dims for a `rows × cols` output whose elements each cost
    /// `flop_per_output` operations.
    pub fn tile_shape(&self, rows: usize, cols: usize, flop_per_output: usize, spans_all_rows: bool) -> (usize, usize) {
        let (min_r, min_c) = (self.min_tile_rows, self.min_tile_cols);
        let target = (self.flop_per_instruction / flop_per_output.max(1)).max(1);

        // Grow rows first, then columns, until the tile reaches the target.
        let mut tr = if spans_all_rows { rows } else { min_r.min(rows) };
        let mut tc = min_c.min(cols);
        if tr * tc < target {
            tr = rows.min(tr.max(target.div_ceil(tc)));
        }
        if tr * tc < target {
            tc = cols.min(target.div_ceil(tr));
        }
        let mut tr = tr.next_multiple_of(min_r);
        let mut tc = tc.next_multiple_of(min_c);

        // Split until the layer has enough tiles to spread across workers.
        while rows.div_ceil(tr) * cols.div_ceil(tc) < self.min_tiles_per_layer {
            if tc > min_c {
                tc = (tc / 2).next_multiple_of(min_c);
            } else if !spans_all_rows && tr > min_r {
                tr = (tr / 2).next_multiple_of(min_r);
            } else {
                break;
            }
        }
        (tr, tc)
    }
}

/// Builds an [`ExecutionPlan`] from a validated network.
///
/// # Example
/// ```
/// use memory_manager::{MemoryBudget, MemoryPool};
/// use model_ir::{Activation, NetworkBuilder};
/// use partition_planner::PlanBuilder;
/// use std::sync::Arc;
///
/// let mut b = NetworkBuilder::new("demo", 3, 8, 8);
/// b.conv("conv", 8, 3, 1, 1, Activation::Relu);
/// let net = Arc::new(b.build().unwrap());
///
/// let pool = MemoryPool::new(MemoryBudget::from_mb(16));
/// let plan = PlanBuilder::new(net).batch(2).build(&pool).unwrap();
/// assert!(plan.layer(1).num_instructions >= 4);
/// ```
pub struct PlanBuilder {
    network: Arc<Network<Validated>>,
    batch: usize,
    tiling: TilingConfig,
}

impl PlanBuilder {
    pub fn new(network: Arc<Network<Validated>>) -> Self {
        Self {
            network,
            batch: 1,
            tiling: TilingConfig::default(),
        }
    }

    pub fn batch(mut self, batch: usize) -> Self {
        self.batch = batch;
        self
    }

    pub fn tiling(mut self, tiling: TilingConfig) -> Self {
        self.tiling = tiling;
        self
    }

    /// Tiles the network, discovers dependencies and allocates the arena
    /// from `pool`. The returned plan is already reset.
    pub fn build(self, pool: &MemoryPool) -> Result<ExecutionPlan, PlannerError> {
        if self.batch == 0 {
            return Err(PlannerError::ZeroBatch);
        }
        self.tiling.validate()?;

        let layers = self.layout();
        let total = layers.last().map_or(0, |l| l.first_instruction as usize + l.num_instructions);
        if total > u32::MAX as usize {
            return Err(PlannerError::TooManyInstructions(total));
        }

        let mut instructions = Vec::with_capacity(total);
        for (def, layer) in self.network.layers.iter().zip(&layers) {
            self.tile_layer(def, layer, &layers, &mut instructions);
        }
        resolve_children(&mut instructions);

        let arena_bytes: usize = layers.iter().map(|l| l.mem_size).sum();
        let arena = PlanArena::allocate(pool, arena_bytes)?;

        let plan = ExecutionPlan {
            id: next_plan_id(),
            network: self.network,
            batch: self.batch,
            tiling: self.tiling,
            layers,
            instructions,
            arena,
            submitted: AtomicBool::new(false),
            completed_layers: AtomicUsize::new(0),
        };
        plan.reset();

        tracing::info!("{}", plan.summary());
        for (def, layer) in plan.network.layers.iter().zip(&plan.layers) {
            tracing::debug!("  [{}] {} ({}): {}", layer.index, def.name, def.layer_type, layer.summary());
        }
        Ok(plan)
    }

    /// Steps 1 and 2: tile shapes and buffer layout.
    fn layout(&self) -> Vec<LayerExecState> {
        let mut layers = Vec::with_capacity(self.network.num_layers());
        let (mut offset, mut first) = (0usize, 0u32);
        for def in self.network.iter_layers() {
            let (rows, cols) = (def.rows(), def.cols(self.batch));
            let (tr, tc) = self.tiling.tile_shape(rows, cols, def.flop_per_output(), def.layer_type.spans_all_rows());
            let layer = LayerExecState::new(def.index, rows, cols, tr, tc, self.tiling.mem_align, offset, first);
            offset += layer.mem_size / std::mem::size_of::<f32>();
            first = first.saturating_add(layer.num_instructions as u32);
            layers.push(layer);
        }
        layers
    }

    /// Steps 3 and 4 for one layer.
    fn tile_layer(
        &self,
        def: &LayerDef,
        layer: &LayerExecState,
        layers: &[LayerExecState],
        out: &mut Vec<Instruction>,
    ) {
        for col_tile in 0..layer.col_tiles {
            for row_tile in 0..layer.row_tiles {
                let index = layer.tile_index(row_tile, col_tile);
                let r0 = row_tile * layer.tile_rows;
                let c0 = col_tile * layer.tile_cols;
                let rows = r0..(r0 + layer.tile_rows).min(layer.rows);
                let cols = c0..(c0 + layer.tile_cols).min(layer.cols);

                let mut inst = Instruction::new(index, layer.index, rows, cols);
                if def.layer_type != LayerType::Input {
                    inst.taps = def.taps_per_column();
                    inst.input_columns = self.input_columns(def, &inst);
                    inst.parents = find_parents(def, &inst, layers);
                }
                out.push(inst);
            }
        }
    }

    /// Parent column of every tap of every tile column.
    fn input_columns(&self, def: &LayerDef, inst: &Instruction) -> Vec<Option<u32>> {
        let mut columns = Vec::with_capacity(inst.cols * inst.taps);
        let p = &def.params;
        for col in inst.col_range() {
            if def.layer_type.is_windowed() {
                let plane = p.out_h * p.out_w;
                let (b, oh, ow) = (col / plane, (col % plane) / p.out_w, col % p.out_w);
                for kh in 0..p.kernel_h {
                    for kw in 0..p.kernel_w {
                        let ih = (oh * p.stride + kh).checked_sub(p.padding).filter(|&h| h < p.in_h);
                        let iw = (ow * p.stride + kw).checked_sub(p.padding).filter(|&w| w < p.in_w);
                        columns.push(match (ih, iw) {
                            (Some(ih), Some(iw)) => Some((b * p.in_h * p.in_w + ih * p.in_w + iw) as u32),
                            _ => None,
                        });
                    }
                }
            } else {
                columns.extend(std::iter::repeat(Some(col as u32)).take(inst.taps));
            }
        }
        columns
    }
}

/// Instructions of the parent layers whose tiles the instruction reads.
fn find_parents(def: &LayerDef, inst: &Instruction, layers: &[LayerExecState]) -> Vec<u32> {
    // Pooling and residual read only the tile's own channels; everything
    // else reads every channel of each input column.
    let same_rows = matches!(
        def.layer_type,
        LayerType::MaxPool | LayerType::AvgPool | LayerType::Residual
    );

    let mut parents = Vec::new();
    for (tap, &parent_idx) in def.parents.iter().enumerate() {
        let parent = &layers[parent_idx];
        let row_tiles = if same_rows {
            parent.row_tiles_for(inst.row_range())
        } else {
            0..parent.row_tiles
        };

        // Residual operand `tap` reads tap slot `tap`; single-parent layers read every tap.
        let mut col_tiles: Vec<usize> = (0..inst.cols)
            .flat_map(|c| {
                let taps = inst.input_taps(c);
                let taps = if def.parents.len() > 1 { &taps[tap..=tap] } else { taps };
                taps.iter().flatten().map(|&ic| parent.col_tile_of(ic as usize))
            })
            .collect();
        col_tiles.sort_unstable();
        col_tiles.dedup();

        for ct in col_tiles {
            parents.extend(row_tiles.clone().map(|rt| parent.tile_index(rt, ct)));
        }
    }
    parents.sort_unstable();
    parents.dedup();
    parents
}

/// Step 5: children from parent lists.
fn resolve_children(instructions: &mut [Instruction]) {
    let mut children: Vec<Vec<u32>> = vec![Vec::new(); instructions.len()];
    for inst in instructions.iter() {
        for &p in &inst.parents {
            children[p as usize].push(inst.index);
        }
    }
    for (inst, kids) in instructions.iter_mut().zip(children) {
        inst.children = kids;
    }
}

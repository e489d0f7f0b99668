// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The instruction graph: one batch-sized instantiation of a network.
//!
//! ```text
//!  ExecutionPlan
//!  ├── layers: [LayerExecState]      tile grid, buffer layout, completed count
//!  ├── instructions: [Instruction]   one per tile, numbered across the plan
//!  │     ├── parents  (deduplicated instruction indices)
//!  │     ├── children (resolved after every parent list is known)
//!  │     ├── state    NotReady → Ready → Completed
//!  │     └── affinity device / core masks
//!  └── arena                         every layer's output matrix
//! ```
//!
//! The structure is immutable once built. Only instruction states, the
//! dependency and completion counters, and the arena contents change while
//! the plan runs; [`ExecutionPlan::reset`] returns all of them to the
//! pre-run state.

use crate::{Affinity, PlanArena, PlannerError, TilingConfig};
use model_ir::graph::Validated;
use model_ir::{LayerDef, Network};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tensor_core::{MatrixView, MatrixViewMut};

// ── Instruction state ──────────────────────────────────────────────

/// Lifecycle of an instruction within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InstructionState {
    NotReady = 0,
    Ready = 1,
    Completed = 2,
}

impl InstructionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::NotReady,
            1 => Self::Ready,
            _ => Self::Completed,
        }
    }
}

impl std::fmt::Display for InstructionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NotReady => "not-ready",
            Self::Ready => "ready",
            Self::Completed => "completed",
        })
    }
}

// ── Instruction ────────────────────────────────────────────────────

/// One tile of one layer: the scheduling unit.
pub struct Instruction {
    pub(crate) index: u32,
    pub(crate) layer: usize,
    /// Tile origin in the layer's output matrix.
    pub(crate) row: usize,
    pub(crate) col: usize,
    /// Tile extent, clipped at the matrix boundary.
    pub(crate) rows: usize,
    pub(crate) cols: usize,
    state: AtomicU8,
    pub(crate) parents: Vec<u32>,
    parents_completed: AtomicU32,
    pub(crate) children: Vec<u32>,
    /// `cols × taps` entries: for each output column of the tile, the parent
    /// column each tap reads. `None` is a padding tap.
    pub(crate) input_columns: Vec<Option<u32>>,
    pub(crate) taps: usize,
    affinity: Affinity,
}

impl Instruction {
    pub(crate) fn new(index: u32, layer: usize, rows: Range<usize>, cols: Range<usize>) -> Self {
        Self {
            index,
            layer,
            row: rows.start,
            col: cols.start,
            rows: rows.len(),
            cols: cols.len(),
            state: AtomicU8::new(InstructionState::NotReady as u8),
            parents: Vec::new(),
            parents_completed: AtomicU32::new(0),
            children: Vec::new(),
            input_columns: Vec::new(),
            taps: 0,
            affinity: Affinity::new(),
        }
    }

    /// Global index within the plan.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Index of the owning layer.
    pub fn layer(&self) -> usize {
        self.layer
    }

    /// Output rows this tile writes.
    pub fn row_range(&self) -> Range<usize> {
        self.row..self.row + self.rows
    }

    /// Output columns this tile writes.
    pub fn col_range(&self) -> Range<usize> {
        self.col..self.col + self.cols
    }

    pub fn num_elements(&self) -> usize {
        self.rows * self.cols
    }

    pub fn parents(&self) -> &[u32] {
        &self.parents
    }

    pub fn children(&self) -> &[u32] {
        &self.children
    }

    pub fn num_parents(&self) -> usize {
        self.parents.len()
    }

    pub fn parents_completed(&self) -> usize {
        self.parents_completed.load(Ordering::Acquire) as usize
    }

    /// Taps per output column.
    pub fn taps(&self) -> usize {
        self.taps
    }

    /// Parent column read by `tap` for tile-local column `local_col`.
    pub fn input_column(&self, local_col: usize, tap: usize) -> Option<usize> {
        self.input_columns[local_col * self.taps + tap].map(|c| c as usize)
    }

    /// All taps of tile-local column `local_col`.
    pub fn input_taps(&self, local_col: usize) -> &[Option<u32>] {
        &self.input_columns[local_col * self.taps..(local_col + 1) * self.taps]
    }

    pub fn affinity(&self) -> &Affinity {
        &self.affinity
    }

    pub fn state(&self) -> InstructionState {
        InstructionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Records one completed parent.
    ///
    /// Returns `true` for exactly one caller: the one whose increment makes
    /// the count reach `num_parents`.
    pub fn complete_parent(&self) -> bool {
        let prev = self.parents_completed.fetch_add(1, Ordering::AcqRel) as usize;
        debug_assert!(
            prev < self.parents.len(),
            "instruction {} received more parent completions than parents",
            self.index
        );
        prev + 1 == self.parents.len()
    }

    /// NotReady → Ready. Fails with the observed state otherwise.
    pub fn mark_ready(&self) -> Result<(), InstructionState> {
        self.transition(InstructionState::NotReady, InstructionState::Ready)
    }

    /// Ready → Completed. Fails with the observed state otherwise.
    pub fn mark_completed(&self) -> Result<(), InstructionState> {
        self.transition(InstructionState::Ready, InstructionState::Completed)
    }

    fn transition(&self, from: InstructionState, to: InstructionState) -> Result<(), InstructionState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(InstructionState::from_u8)
    }

    fn reset(&self, completed: bool) {
        let state = if completed {
            InstructionState::Completed
        } else {
            InstructionState::NotReady
        };
        self.state.store(state as u8, Ordering::Release);
        self.parents_completed.store(0, Ordering::Release);
    }
}

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instruction")
            .field("index", &self.index)
            .field("layer", &self.layer)
            .field("rows", &self.row_range())
            .field("cols", &self.col_range())
            .field("state", &self.state())
            .field("parents", &self.parents.len())
            .field("children", &self.children.len())
            .finish()
    }
}

// ── Layer execution state ──────────────────────────────────────────

/// Tile grid, buffer layout and completion count of one layer.
#[derive(Debug)]
pub struct LayerExecState {
    pub index: usize,
    /// Output matrix dims.
    pub rows: usize,
    pub cols: usize,
    /// Nominal tile dims (edge tiles may be smaller).
    pub tile_rows: usize,
    pub tile_cols: usize,
    pub row_tiles: usize,
    pub col_tiles: usize,
    /// Distance between column starts, `round_up(rows, tile_rows)`.
    pub col_stride: usize,
    pub padded_cols: usize,
    /// Output buffer bytes, aligned to the plan's `mem_align`.
    pub mem_size: usize,
    /// Offset of the buffer within the arena, in `f32` elements.
    pub arena_offset: usize,
    pub first_instruction: u32,
    pub num_instructions: usize,
    completed: AtomicUsize,
}

impl LayerExecState {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        index: usize,
        rows: usize,
        cols: usize,
        tile_rows: usize,
        tile_cols: usize,
        mem_align: usize,
        arena_offset: usize,
        first_instruction: u32,
    ) -> Self {
        let row_tiles = rows.div_ceil(tile_rows);
        let col_tiles = cols.div_ceil(tile_cols);
        let col_stride = row_tiles * tile_rows;
        let padded_cols = col_tiles * tile_cols;
        let mem_size = (col_stride * padded_cols * std::mem::size_of::<f32>()).next_multiple_of(mem_align);
        Self {
            index,
            rows,
            cols,
            tile_rows,
            tile_cols,
            row_tiles,
            col_tiles,
            col_stride,
            padded_cols,
            mem_size,
            arena_offset,
            first_instruction,
            num_instructions: row_tiles * col_tiles,
            completed: AtomicUsize::new(0),
        }
    }

    /// Global instruction indices of this layer.
    pub fn instruction_range(&self) -> Range<u32> {
        self.first_instruction..self.first_instruction + self.num_instructions as u32
    }

    /// Global index of tile `(row_tile, col_tile)`. Row tiles vary fastest.
    pub fn tile_index(&self, row_tile: usize, col_tile: usize) -> u32 {
        self.first_instruction + (col_tile * self.row_tiles + row_tile) as u32
    }

    /// Row tiles intersecting `rows`.
    pub fn row_tiles_for(&self, rows: Range<usize>) -> Range<usize> {
        rows.start / self.tile_rows..rows.end.div_ceil(self.tile_rows)
    }

    /// Column tile holding column `col`.
    pub fn col_tile_of(&self, col: usize) -> usize {
        col / self.tile_cols
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.completed() == self.num_instructions
    }

    /// Records one completed instruction.
    ///
    /// Returns `true` for exactly one caller: the one that completes the layer.
    pub fn complete_instruction(&self) -> bool {
        let prev = self.completed.fetch_add(1, Ordering::AcqRel);
        debug_assert!(prev < self.num_instructions, "layer {} over-completed", self.index);
        prev + 1 == self.num_instructions
    }

    fn reset(&self, completed: bool) {
        let value = if completed { self.num_instructions } else { 0 };
        self.completed.store(value, Ordering::Release);
    }

    pub fn summary(&self) -> String {
        format!(
            "{}x{} in {}x{} tiles ({} instr), stride {}, {:.1} KB",
            self.rows,
            self.cols,
            self.tile_rows,
            self.tile_cols,
            self.num_instructions,
            self.col_stride,
            self.mem_size as f64 / 1024.0
        )
    }
}

// ── Execution plan ─────────────────────────────────────────────────

static NEXT_PLAN_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

pub(crate) fn next_plan_id() -> u64 {
    NEXT_PLAN_ID.fetch_add(1, Ordering::Relaxed)
}

/// A tiled instruction graph for one network at one batch size.
pub struct ExecutionPlan {
    pub(crate) id: u64,
    pub(crate) network: Arc<Network<Validated>>,
    pub(crate) batch: usize,
    pub(crate) tiling: TilingConfig,
    pub(crate) layers: Vec<LayerExecState>,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) arena: PlanArena,
    pub(crate) submitted: AtomicBool,
    pub(crate) completed_layers: AtomicUsize,
}

impl ExecutionPlan {
    /// Process-unique plan id, used to key ready-pool queue groups.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn network(&self) -> &Arc<Network<Validated>> {
        &self.network
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn tiling(&self) -> &TilingConfig {
        &self.tiling
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// # Panics
    /// Panics if `index` is out of range.
    pub fn layer(&self, index: usize) -> &LayerExecState {
        &self.layers[index]
    }

    pub fn layer_def(&self, index: usize) -> &LayerDef {
        &self.network.layers[index]
    }

    pub fn layers(&self) -> &[LayerExecState] {
        &self.layers
    }

    pub fn output_layer(&self) -> &LayerExecState {
        &self.layers[self.layers.len() - 1]
    }

    /// # Panics
    /// Panics if `index` is out of range.
    pub fn instruction(&self, index: u32) -> &Instruction {
        &self.instructions[index as usize]
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn num_instructions(&self) -> usize {
        self.instructions.len()
    }

    /// Instructions of layer `index`.
    pub fn layer_instructions(&self, index: usize) -> &[Instruction] {
        let r = self.layers[index].instruction_range();
        &self.instructions[r.start as usize..r.end as usize]
    }

    /// Arena bytes backing all layer outputs.
    pub fn arena_bytes(&self) -> usize {
        self.arena.size_bytes()
    }

    /// Floating-point operations of one run.
    pub fn total_flops(&self) -> u64 {
        self.network.total_flops(self.batch)
    }

    // ── Run lifecycle ──────────────────────────────────────────────

    /// Returns every instruction and counter to the pre-run state.
    ///
    /// Input-layer instructions are marked completed, their layer counter
    /// is full, and the plan may be loaded and submitted again. Must not
    /// be called while workers are executing this plan.
    pub fn reset(&self) {
        for layer in &self.layers {
            let is_input = layer.index == 0;
            layer.reset(is_input);
            let r = layer.instruction_range();
            for inst in &self.instructions[r.start as usize..r.end as usize] {
                inst.reset(is_input);
            }
        }
        self.completed_layers.store(1, Ordering::Release);
        self.submitted.store(false, Ordering::Release);
        tracing::debug!("plan {} reset ({} instructions)", self.id, self.instructions.len());
    }

    /// Propagates the completed input layer and calls `f` on every
    /// instruction that becomes ready.
    ///
    /// Call once per run, right after [`reset`](Self::reset).
    pub fn for_each_ready_after_reset(&self, mut f: impl FnMut(&Instruction)) {
        for input in self.layer_instructions(0) {
            for &child in input.children() {
                let child = self.instruction(child);
                if child.complete_parent() && child.mark_ready().is_ok() {
                    f(child);
                }
            }
        }
    }

    /// Records that layer `index` completed. Returns `true` when it is the
    /// output layer, which finishes the plan even if a side branch that
    /// never reaches the output is still running.
    pub fn complete_layer(&self, index: usize) -> bool {
        self.completed_layers.fetch_add(1, Ordering::AcqRel);
        index + 1 == self.layers.len()
    }

    pub fn completed_layers(&self) -> usize {
        self.completed_layers.load(Ordering::Acquire)
    }

    /// Whether the output layer has completed every instruction.
    pub fn is_complete(&self) -> bool {
        self.output_layer().is_complete()
    }

    /// Claims the plan for one run. Fails if it is already in flight.
    pub fn mark_submitted(&self) -> Result<(), PlannerError> {
        self.submitted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| PlannerError::AlreadySubmitted(self.id))
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted.load(Ordering::Acquire)
    }

    // ── Buffers ────────────────────────────────────────────────────

    /// Copies an input batch into the input layer's output matrix.
    ///
    /// `input` is channel-innermost (`NHWC`): value `c` of column `j`
    /// lives at `j * channels + c`.
    pub fn load_input(&self, input: &[f32]) -> Result<(), PlannerError> {
        if self.is_submitted() {
            return Err(PlannerError::AlreadySubmitted(self.id));
        }
        let layer = &self.layers[0];
        let expected = layer.rows * layer.cols;
        if input.len() != expected {
            return Err(PlannerError::InputSizeMismatch {
                expected,
                actual: input.len(),
            });
        }
        // SAFETY: the plan is not submitted, so no worker touches the arena.
        let mut out = unsafe { self.arena.layer_view_mut(layer) };
        for (col, values) in input.chunks_exact(layer.rows).enumerate() {
            out.column_mut(col).copy_from_slice(values);
        }
        Ok(())
    }

    /// Copies a completed layer's output into a dense channel-innermost vector.
    pub fn read_layer_output(&self, index: usize) -> Result<Vec<f32>, PlannerError> {
        let layer = self.layers.get(index).ok_or(PlannerError::UnknownLayer(index))?;
        if !layer.is_complete() {
            return Err(PlannerError::LayerIncomplete {
                layer: index,
                completed: layer.completed(),
                total: layer.num_instructions,
            });
        }
        // SAFETY: every tile of the layer is complete; nothing writes it until reset.
        let view = unsafe { self.arena.layer_view(layer) };
        let mut out = Vec::with_capacity(layer.rows * layer.cols);
        for col in 0..layer.cols {
            out.extend_from_slice(view.column(col));
        }
        Ok(out)
    }

    /// The output layer's values.
    pub fn read_output(&self) -> Result<Vec<f32>, PlannerError> {
        self.read_layer_output(self.layers.len() - 1)
    }

    /// Mutable view of the tile owned by `inst`.
    ///
    /// # Safety
    /// The caller must be the only executor of `inst` (it holds the
    /// instruction in the `Ready` state) and the view must not outlive the
    /// execution of that instruction.
    pub unsafe fn tile_view_mut(&self, inst: &Instruction) -> MatrixViewMut<'_> {
        let layer = &self.layers[inst.layer];
        self.arena.tile_view_mut(layer, inst.row_range(), inst.col_range())
    }

    /// Read-only view of layer `index`'s full output matrix.
    ///
    /// # Safety
    /// Only elements written by completed instructions may be read through
    /// the view, and no column slice may overlap a tile still being written.
    pub unsafe fn layer_view(&self, index: usize) -> MatrixView<'_> {
        self.arena.layer_view(&self.layers[index])
    }

    pub fn summary(&self) -> String {
        format!(
            "Plan {} for '{}': batch {}, {} layers, {} instructions, {:.1} KB arena",
            self.id,
            self.network.name,
            self.batch,
            self.layers.len(),
            self.instructions.len(),
            self.arena_bytes() as f64 / 1024.0
        )
    }
}

impl std::fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("id", &self.id)
            .field("network", &self.network.name)
            .field("batch", &self.batch)
            .field("layers", &self.layers.len())
            .field("instructions", &self.instructions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PlanBuilder;
    use memory_manager::{MemoryBudget, MemoryPool};
    use model_ir::{Activation, NetworkBuilder};

    fn small_plan() -> ExecutionPlan {
        let mut b = NetworkBuilder::new("p", 4, 4, 4);
        let input = b.current();
        b.conv("conv", 4, 3, 1, 1, Activation::Relu);
        b.residual("add", input, Activation::None);
        PlanBuilder::new(Arc::new(b.build().unwrap()))
            .tiling(TilingConfig {
                flop_per_instruction: 16,
                ..TilingConfig::default()
            })
            .build(&MemoryPool::new(MemoryBudget::from_mb(16)))
            .unwrap()
    }

    #[test]
    fn test_reset_marks_input_completed() {
        let plan = small_plan();
        plan.reset();
        assert!(plan.layer(0).is_complete());
        for inst in plan.layer_instructions(0) {
            assert_eq!(inst.state(), InstructionState::Completed);
        }
        for inst in plan.layer_instructions(1) {
            assert_eq!(inst.state(), InstructionState::NotReady);
        }
        assert_eq!(plan.completed_layers(), 1);
    }

    #[test]
    fn test_state_transitions_once() {
        let plan = small_plan();
        plan.reset();
        let inst = &plan.layer_instructions(1)[0];
        assert_eq!(inst.mark_completed(), Err(InstructionState::NotReady));
        assert!(inst.mark_ready().is_ok());
        assert_eq!(inst.mark_ready(), Err(InstructionState::Ready));
        assert!(inst.mark_completed().is_ok());
        assert_eq!(inst.mark_completed(), Err(InstructionState::Completed));
    }

    #[test]
    fn test_initial_ready_set() {
        let plan = small_plan();
        plan.reset();
        let mut ready = Vec::new();
        plan.for_each_ready_after_reset(|i| ready.push(i.index()));
        // Every conv tile depends only on the input layer.
        assert_eq!(ready.len(), plan.layer(1).num_instructions);
        for inst in plan.layer_instructions(2) {
            assert_eq!(inst.state(), InstructionState::NotReady);
            assert!(inst.parents_completed() < inst.num_parents());
        }
    }

    #[test]
    fn test_load_input_size_checked() {
        let plan = small_plan();
        plan.reset();
        assert!(matches!(
            plan.load_input(&[0.0; 3]),
            Err(PlannerError::InputSizeMismatch { expected: 64, .. })
        ));
        assert!(plan.load_input(&[1.0; 64]).is_ok());
        plan.mark_submitted().unwrap();
        assert!(plan.mark_submitted().is_err());
        assert!(matches!(plan.load_input(&[1.0; 64]), Err(PlannerError::AlreadySubmitted(_))));
    }

    #[test]
    fn test_read_incomplete_layer_fails() {
        let plan = small_plan();
        plan.reset();
        assert!(plan.read_layer_output(1).is_err());
        assert!(matches!(plan.read_layer_output(9), Err(PlannerError::UnknownLayer(9))));
    }

    #[test]
    fn test_input_roundtrip() {
        let plan = small_plan();
        plan.reset();
        let input: Vec<f32> = (0..64).map(|x| x as f32).collect();
        plan.load_input(&input).unwrap();
        assert_eq!(plan.read_layer_output(0).unwrap(), input);
    }

    #[test]
    fn test_complete_parent_single_winner() {
        let plan = small_plan();
        plan.reset();
        let inst = &plan.layer_instructions(2)[0];
        let n = inst.num_parents();
        let winners = (0..n).filter(|_| inst.complete_parent()).count();
        assert_eq!(winners, 1);
        assert_eq!(inst.parents_completed(), n);
    }
}

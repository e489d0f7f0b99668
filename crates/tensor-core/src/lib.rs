// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Dense `f32` storage, strided matrix views, and the column kernels that
//! tiled instructions are built from.
//!
//! This crate provides:
//! - [`Tensor`] — an owned, shaped `f32` buffer used for weights and biases.
//! - [`Shape`] and [`DType`] — shape and element-type descriptors.
//! - [`MatrixView`] / [`MatrixViewMut`] — column-major strided views over
//!   a layer's output matrix. All row/column offset math lives here.
//! - Column kernels: GEMM, im2col gathering, pooling, softmax, layer
//!   normalization, residual add, and activations.
//!
//! # Matrix Layout
//! Every layer output is a matrix whose rows are channels and whose columns
//! are flattened `batch × height × width` positions. Columns are contiguous
//! and separated by a column stride that may exceed the row count:
//!
//! ```text
//!            col 0     col 1     col 2
//!          ┌───────┬─────────┬─────────┐
//!  row 0   │  [0]  │ [s + 0] │ [2s + 0]│
//!  row 1   │  [1]  │ [s + 1] │ [2s + 1]│
//!   ...    │       │         │         │
//!  (pad)   │       │         │         │   s = col_stride ≥ rows
//!          └───────┴─────────┴─────────┘
//! ```

mod dtype;
mod error;
mod ops;
mod shape;
mod tensor;
mod view;

pub use dtype::DType;
pub use error::TensorError;
pub use ops::{
    add_columns, apply_activation, avg_pool_column, gemm, im2col_column, layer_norm_columns,
    max_pool_column, softmax_columns, Activation,
};
pub use shape::Shape;
pub use tensor::Tensor;
pub use view::{MatrixView, MatrixViewMut};

// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensor operations.

use crate::Shape;

/// Errors that can occur during tensor operations.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// The provided buffer does not hold the number of elements the shape requires.
    #[error("buffer size mismatch: expected {expected} elements, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// Two operands have incompatible shapes for the requested operation.
    #[error("incompatible shapes for {op}: {lhs} vs {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// The requested data type is not supported.
    #[error("unsupported dtype {dtype} for {op}")]
    UnsupportedDType {
        op: &'static str,
        dtype: crate::DType,
    },

    /// A strided view does not fit inside its backing buffer.
    #[error("invalid view: {rows}x{cols} with column stride {col_stride} over {len} elements")]
    InvalidView {
        rows: usize,
        cols: usize,
        col_stride: usize,
        len: usize,
    },
}

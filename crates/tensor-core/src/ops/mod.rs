// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Column kernels.
//!
//! Every operation works on a tile: a strided window of a layer's output
//! matrix. Inputs arrive as columns of parent matrices, outputs are
//! written in place. No operation allocates.

mod activation;
mod gather;
mod gemm;
mod layer_norm;
mod softmax;

pub use activation::{apply_activation, Activation};
pub use gather::{add_columns, avg_pool_column, im2col_column, max_pool_column};
pub use gemm::gemm;
pub use layer_norm::layer_norm_columns;
pub use softmax::softmax_columns;

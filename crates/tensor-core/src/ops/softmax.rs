// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Numerically stable softmax over each column of a tile.

use crate::MatrixViewMut;

/// Replaces every column `x` of `tile` with `softmax(x)`.
///
/// Uses the max-subtraction trick so large logits do not overflow:
/// `softmax(x)_i = exp(x_i - max(x)) / Σ_j exp(x_j - max(x))`.
pub fn softmax_columns(tile: &mut MatrixViewMut<'_>) {
    for col in 0..tile.cols() {
        let column = tile.column_mut(col);
        if column.is_empty() {
            continue;
        }
        let max = column.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0f32;
        for v in column.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        let inv = 1.0 / sum;
        for v in column.iter_mut() {
            *v *= inv;
        }
    }
}

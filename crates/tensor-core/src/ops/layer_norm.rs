// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer normalization over each column of a tile.

use crate::{MatrixViewMut, Shape, TensorError};

/// Normalizes every column of `tile` in place:
///
/// `y_m = (x_m - mean) / sqrt(var + eps) * gamma[m] + beta[m]`
///
/// The variance is computed as `E[x²] - mean²`.
///
/// # Errors
/// Returns [`TensorError::ShapeMismatch`] if `gamma` (or `beta`) is shorter
/// than the tile's row count.
pub fn layer_norm_columns(
    tile: &mut MatrixViewMut<'_>,
    gamma: &[f32],
    beta: Option<&[f32]>,
    eps: f32,
) -> Result<(), TensorError> {
    let rows = tile.rows();
    let beta_ok = beta.map_or(true, |b| b.len() >= rows);
    if gamma.len() < rows || !beta_ok {
        return Err(TensorError::ShapeMismatch {
            op: "layer_norm_columns",
            lhs: Shape::vector(rows),
            rhs: Shape::vector(gamma.len()),
        });
    }
    if rows == 0 {
        return Ok(());
    }

    for col in 0..tile.cols() {
        let column = tile.column_mut(col);
        let n = rows as f32;
        let mean = column.iter().sum::<f32>() / n;
        let mean_sq = column.iter().map(|x| x * x).sum::<f32>() / n;
        let inv_std = 1.0 / (mean_sq - mean * mean + eps).sqrt();
        for (m, v) in column.iter_mut().enumerate() {
            let shift = beta.map_or(0.0, |b| b[m]);
            *v = (*v - mean) * inv_std * gamma[m] + shift;
        }
    }
    Ok(())
}

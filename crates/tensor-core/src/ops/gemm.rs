// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tile matrix multiply.

use crate::{MatrixView, MatrixViewMut, Shape, TensorError};

/// Computes `C = A · B` for one tile.
///
/// * `a` — row-major `M × K` weights, row `m` starting at `a[m * lda]`.
/// * `b` — column-major `K × N` operand (im2col columns or parent columns).
/// * `c` — column-major `M × N` output tile.
///
/// `M` and `N` come from `c`, `K` from `b`.
///
/// # Errors
/// Returns [`TensorError::ShapeMismatch`] if `b` and `c` disagree on `N`,
/// `lda < K`, or `a` is too short for `M` rows.
pub fn gemm(
    a: &[f32],
    lda: usize,
    b: &MatrixView<'_>,
    c: &mut MatrixViewMut<'_>,
) -> Result<(), TensorError> {
    let (m, n, k) = (c.rows(), c.cols(), b.rows());
    let a_needed = if m == 0 { 0 } else { (m - 1) * lda + k };
    if b.cols() != n || lda < k || a.len() < a_needed {
        return Err(TensorError::ShapeMismatch {
            op: "gemm",
            lhs: Shape::matrix(m, k),
            rhs: Shape::matrix(b.rows(), b.cols()),
        });
    }

    for col in 0..n {
        let b_col = b.column(col);
        let c_col = c.column_mut(col);
        for (row, out) in c_col.iter_mut().enumerate() {
            let a_row = &a[row * lda..row * lda + k];
            *out = a_row.iter().zip(b_col).map(|(x, y)| x * y).sum();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemm_2x3_times_3x2() {
        // A = [[1, 2, 3], [4, 5, 6]]
        // B = [[7, 8], [9, 10], [11, 12]] stored column-major
        // C = [[58, 64], [139, 154]]
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b_data = [7.0, 9.0, 11.0, 8.0, 10.0, 12.0];
        let b = MatrixView::new(&b_data, 3, 2, 3).unwrap();
        let mut c_data = [0.0f32; 4];
        let mut c = MatrixViewMut::new(&mut c_data, 2, 2, 2).unwrap();

        gemm(&a, 3, &b, &mut c).unwrap();
        assert_eq!(c_data, [58.0, 139.0, 64.0, 154.0]);
    }

    #[test]
    fn test_gemm_row_offset_into_weights() {
        // Tile covering output row 1 only: A starts one row in.
        let a = [1.0, 0.0, 0.0, 1.0];
        let b_data = [3.0, 4.0];
        let b = MatrixView::new(&b_data, 2, 1, 2).unwrap();
        let mut c_data = [0.0f32; 1];
        let mut c = MatrixViewMut::new(&mut c_data, 1, 1, 1).unwrap();

        gemm(&a[2..], 2, &b, &mut c).unwrap();
        assert_eq!(c_data, [4.0]);
    }

    #[test]
    fn test_gemm_shape_mismatch() {
        let a = [0.0f32; 4];
        let b_data = [0.0f32; 6];
        let b = MatrixView::new(&b_data, 3, 2, 3).unwrap();
        let mut c_data = [0.0f32; 4];
        let mut c = MatrixViewMut::new(&mut c_data, 2, 2, 2).unwrap();
        assert!(gemm(&a, 3, &b, &mut c).is_err());
    }
}

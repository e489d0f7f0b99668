// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Owned `f32` tensors for layer parameters.

use crate::{Shape, TensorError};

/// An owned, shaped `f32` buffer in row-major order.
///
/// Tensors hold parameters (weights, biases, normalization scales).
/// Activations never live in a `Tensor`; they are written into a plan's
/// arena through [`crate::MatrixViewMut`].
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a tensor filled with zeros.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape};
    /// let t = Tensor::zeros(Shape::matrix(2, 3));
    /// assert_eq!(t.len(), 6);
    /// ```
    pub fn zeros(shape: Shape) -> Self {
        let n = shape.num_elements();
        Self {
            shape,
            data: vec![0.0; n],
        }
    }

    /// Creates a tensor by taking ownership of `data`.
    ///
    /// Returns an error if `data.len()` differs from the shape's element count.
    pub fn from_vec(shape: Shape, data: Vec<f32>) -> Result<Self, TensorError> {
        let expected = shape.num_elements();
        if data.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Creates a tensor by copying `values`.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape};
    /// let t = Tensor::from_f32(Shape::vector(3), &[1.0, 2.0, 3.0]).unwrap();
    /// assert_eq!(t.as_slice(), &[1.0, 2.0, 3.0]);
    /// ```
    pub fn from_f32(shape: Shape, values: &[f32]) -> Result<Self, TensorError> {
        Self::from_vec(shape, values.to_vec())
    }

    /// Creates a tensor whose elements come from `f(index)`.
    pub fn from_fn(shape: Shape, f: impl FnMut(usize) -> f32) -> Self {
        let data = (0..shape.num_elements()).map(f).collect();
        Self { shape, data }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Memory footprint in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Fills every element with `value`.
    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let t = Tensor::zeros(Shape::matrix(2, 3));
        assert_eq!(t.size_bytes(), 24);
        assert!(t.as_slice().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_from_vec_size_mismatch() {
        let result = Tensor::from_vec(Shape::matrix(2, 3), vec![0.0; 5]);
        assert!(matches!(
            result,
            Err(TensorError::BufferSizeMismatch { expected: 6, actual: 5 })
        ));
    }

    #[test]
    fn test_from_fn() {
        let t = Tensor::from_fn(Shape::vector(4), |i| i as f32 * 2.0);
        assert_eq!(t.as_slice(), &[0.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_fill() {
        let mut t = Tensor::zeros(Shape::vector(5));
        t.fill(1.5);
        assert!(t.as_slice().iter().all(|&x| x == 1.5));
    }
}

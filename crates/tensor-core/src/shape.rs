// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Shape descriptors for weight and bias tensors.

use std::fmt;

/// Dimensions of a [`crate::Tensor`], outermost first.
///
/// Convolution weights use `[out_c, kernel_h, kernel_w, in_c]`, dense
/// weights `[out_c, in_c]`, and biases `[out_c]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Creates a shape from its dimensions.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::Shape;
    /// let s = Shape::new(vec![4, 3, 3, 2]);
    /// assert_eq!(s.rank(), 4);
    /// assert_eq!(s.num_elements(), 72);
    /// ```
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    /// A 1-D shape.
    pub fn vector(len: usize) -> Self {
        Self { dims: vec![len] }
    }

    /// A 2-D shape.
    pub fn matrix(rows: usize, cols: usize) -> Self {
        Self {
            dims: vec![rows, cols],
        }
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Total element count. A rank-0 shape holds one element.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Size of dimension `index`, or `None` if out of range.
    pub fn dim(&self, index: usize) -> Option<usize> {
        self.dims.get(index).copied()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self::new(dims.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv_weight_shape() {
        let s = Shape::new(vec![8, 3, 3, 4]);
        assert_eq!(s.rank(), 4);
        assert_eq!(s.num_elements(), 288);
        assert_eq!(s.dim(3), Some(4));
        assert_eq!(s.dim(4), None);
    }

    #[test]
    fn test_scalar_has_one_element() {
        assert_eq!(Shape::new(vec![]).num_elements(), 1);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Shape::matrix(2, 3)), "[2, 3]");
    }

    #[test]
    fn test_from_conversions() {
        let a: Shape = vec![2, 3].into();
        let b: Shape = (&[2, 3][..]).into();
        assert_eq!(a, b);
    }
}

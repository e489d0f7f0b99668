// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Column-major strided matrix views.
//!
//! A view is `(base, rows, cols, col_stride)`. Element `(r, c)` lives at
//! `base + c * col_stride + r`. Views created from slices are bounds
//! checked once at construction; every accessor after that works in view
//! coordinates only, so no caller ever computes a flat offset by hand.
//!
//! Two mutable views over the same buffer are allowed to coexist as long
//! as their `(row range × column range)` rectangles do not overlap. That
//! is how disjoint instruction tiles write into one layer matrix
//! concurrently; [`MatrixViewMut::from_raw_parts`] carries that obligation.

use crate::TensorError;
use std::marker::PhantomData;
use std::ops::Range;

/// A read-only column-major view.
#[derive(Clone, Copy)]
pub struct MatrixView<'a> {
    ptr: *const f32,
    rows: usize,
    cols: usize,
    col_stride: usize,
    _marker: PhantomData<&'a [f32]>,
}

// A view behaves like `&[f32]`.
unsafe impl Send for MatrixView<'_> {}
unsafe impl Sync for MatrixView<'_> {}

impl<'a> MatrixView<'a> {
    /// Creates a view over `data`.
    ///
    /// # Errors
    /// Returns [`TensorError::InvalidView`] if `rows > col_stride` or the
    /// last column would run past the end of `data`.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::MatrixView;
    /// // 2 rows, 3 columns, stride 4 (two padding rows per column).
    /// let data = [1.0, 2.0, 0.0, 0.0, 3.0, 4.0, 0.0, 0.0, 5.0, 6.0, 0.0, 0.0];
    /// let v = MatrixView::new(&data, 2, 3, 4).unwrap();
    /// assert_eq!(v.column(1), &[3.0, 4.0]);
    /// assert_eq!(v.get(1, 2), 6.0);
    /// ```
    pub fn new(
        data: &'a [f32],
        rows: usize,
        cols: usize,
        col_stride: usize,
    ) -> Result<Self, TensorError> {
        check_extent(data.len(), rows, cols, col_stride)?;
        Ok(Self {
            ptr: data.as_ptr(),
            rows,
            cols,
            col_stride,
            _marker: PhantomData,
        })
    }

    /// Creates a view from a raw base pointer.
    ///
    /// # Safety
    /// For every column `c < cols`, the `rows` elements starting at
    /// `ptr + c * col_stride` must be initialised, valid for reads for `'a`,
    /// and not written by anyone while the view (or a slice derived from
    /// it) is alive.
    pub unsafe fn from_raw_parts(
        ptr: *const f32,
        rows: usize,
        cols: usize,
        col_stride: usize,
    ) -> Self {
        debug_assert!(rows <= col_stride || cols <= 1);
        Self {
            ptr,
            rows,
            cols,
            col_stride,
            _marker: PhantomData,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn col_stride(&self) -> usize {
        self.col_stride
    }

    /// Flat offset of `(row, col)` relative to the view's base.
    #[inline]
    pub fn offset(&self, row: usize, col: usize) -> usize {
        col * self.col_stride + row
    }

    /// The `rows` contiguous elements of column `col`.
    ///
    /// # Panics
    /// Panics if `col >= cols`.
    #[inline]
    pub fn column(&self, col: usize) -> &'a [f32] {
        self.column_rows(col, 0..self.rows)
    }

    /// A row sub-range of column `col`.
    ///
    /// # Panics
    /// Panics if `col >= cols` or `rows` reaches past the view's row count.
    #[inline]
    pub fn column_rows(&self, col: usize, rows: Range<usize>) -> &'a [f32] {
        assert!(col < self.cols, "column {col} out of range ({})", self.cols);
        assert!(
            rows.start <= rows.end && rows.end <= self.rows,
            "rows {rows:?} out of range ({})",
            self.rows
        );
        // SAFETY: in-bounds per the constructor contract and the checks above.
        unsafe {
            std::slice::from_raw_parts(
                self.ptr.add(self.offset(rows.start, col)),
                rows.end - rows.start,
            )
        }
    }

    /// Reads a single element.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.column_rows(col, row..row + 1)[0]
    }

    /// A rectangular window of this view.
    ///
    /// # Panics
    /// Panics if the window does not fit.
    pub fn sub_view(&self, rows: Range<usize>, cols: Range<usize>) -> MatrixView<'a> {
        assert!(rows.end <= self.rows && cols.end <= self.cols);
        MatrixView {
            // SAFETY: the window lies inside this view.
            ptr: unsafe { self.ptr.add(self.offset(rows.start, cols.start)) },
            rows: rows.end - rows.start,
            cols: cols.end - cols.start,
            col_stride: self.col_stride,
            _marker: PhantomData,
        }
    }
}

/// A mutable column-major view.
pub struct MatrixViewMut<'a> {
    ptr: *mut f32,
    rows: usize,
    cols: usize,
    col_stride: usize,
    _marker: PhantomData<&'a mut [f32]>,
}

unsafe impl Send for MatrixViewMut<'_> {}

impl<'a> MatrixViewMut<'a> {
    /// Creates a mutable view over `data`.
    ///
    /// # Errors
    /// Same conditions as [`MatrixView::new`].
    pub fn new(
        data: &'a mut [f32],
        rows: usize,
        cols: usize,
        col_stride: usize,
    ) -> Result<Self, TensorError> {
        check_extent(data.len(), rows, cols, col_stride)?;
        Ok(Self {
            ptr: data.as_mut_ptr(),
            rows,
            cols,
            col_stride,
            _marker: PhantomData,
        })
    }

    /// Creates a mutable view from a raw base pointer.
    ///
    /// # Safety
    /// For every column `c < cols`, the `rows` elements starting at
    /// `ptr + c * col_stride` must be valid for reads and writes for `'a`
    /// and must not be accessed through any other pointer or view while
    /// this view is alive.
    pub unsafe fn from_raw_parts(ptr: *mut f32, rows: usize, cols: usize, col_stride: usize) -> Self {
        debug_assert!(rows <= col_stride || cols <= 1);
        Self {
            ptr,
            rows,
            cols,
            col_stride,
            _marker: PhantomData,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn col_stride(&self) -> usize {
        self.col_stride
    }

    /// Read-only column `col`.
    pub fn column(&self, col: usize) -> &[f32] {
        assert!(col < self.cols, "column {col} out of range ({})", self.cols);
        // SAFETY: in-bounds per the constructor contract.
        unsafe { std::slice::from_raw_parts(self.ptr.add(col * self.col_stride), self.rows) }
    }

    /// Mutable column `col`.
    ///
    /// # Panics
    /// Panics if `col >= cols`.
    pub fn column_mut(&mut self, col: usize) -> &mut [f32] {
        assert!(col < self.cols, "column {col} out of range ({})", self.cols);
        // SAFETY: in-bounds and exclusively owned per the constructor contract.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.add(col * self.col_stride), self.rows) }
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.column(col)[row]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.column_mut(col)[row] = value;
    }

    /// Fills every element of the view (padding rows untouched).
    pub fn fill(&mut self, value: f32) {
        for c in 0..self.cols {
            self.column_mut(c).fill(value);
        }
    }

    /// Reborrows as a read-only view.
    pub fn as_view(&self) -> MatrixView<'_> {
        MatrixView {
            ptr: self.ptr,
            rows: self.rows,
            cols: self.cols,
            col_stride: self.col_stride,
            _marker: PhantomData,
        }
    }
}

fn check_extent(len: usize, rows: usize, cols: usize, col_stride: usize) -> Result<(), TensorError> {
    let fits = if rows == 0 || cols == 0 {
        true
    } else {
        rows <= col_stride && (cols - 1) * col_stride + rows <= len
    };
    if fits {
        Ok(())
    } else {
        Err(TensorError::InvalidView {
            rows,
            cols,
            col_stride,
            len,
        })
    }
}

impl std::fmt::Debug for MatrixView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixView")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("col_stride", &self.col_stride)
            .finish()
    }
}

impl std::fmt::Debug for MatrixViewMut<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixViewMut")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("col_stride", &self.col_stride)
            .finish()
    }
}

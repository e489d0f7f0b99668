// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-column gathers: im2col, pooling, and residual add.
//!
//! Each output column is assembled from a list of input columns, one per
//! kernel tap. A `None` tap is a padding position outside the input.

/// Writes one im2col column: tap `t` occupies `out[t*channels..(t+1)*channels]`.
///
/// Padding taps are written as zeros.
///
/// # Panics
/// Panics if `out` is shorter than `taps × channels` or a tap column is
/// shorter than `channels`.
pub fn im2col_column<'a>(
    taps: impl IntoIterator<Item = Option<&'a [f32]>>,
    channels: usize,
    out: &mut [f32],
) {
    for (t, tap) in taps.into_iter().enumerate() {
        let dst = &mut out[t * channels..(t + 1) * channels];
        match tap {
            Some(src) => dst.copy_from_slice(&src[..channels]),
            None => dst.fill(0.0),
        }
    }
}

/// Max pooling: element-wise maximum over all taps.
///
/// Padding taps contribute `-inf`, so an all-padding window yields `-inf`.
pub fn max_pool_column<'a>(taps: impl IntoIterator<Item = Option<&'a [f32]>>, out: &mut [f32]) {
    out.fill(f32::NEG_INFINITY);
    for src in taps.into_iter().flatten() {
        for (o, &x) in out.iter_mut().zip(src) {
            if x > *o {
                *o = x;
            }
        }
    }
}

/// Average pooling: element-wise sum over the real taps divided by the full
/// window size, so padding counts as zero.
pub fn avg_pool_column<'a>(
    taps: impl IntoIterator<Item = Option<&'a [f32]>>,
    window: usize,
    out: &mut [f32],
) {
    out.fill(0.0);
    for src in taps.into_iter().flatten() {
        for (o, &x) in out.iter_mut().zip(src) {
            *o += x;
        }
    }
    if window > 0 {
        let inv = 1.0 / window as f32;
        for o in out.iter_mut() {
            *o *= inv;
        }
    }
}

/// `out = lhs + rhs` element-wise.
pub fn add_columns(lhs: &[f32], rhs: &[f32], out: &mut [f32]) {
    for ((o, &a), &b) in out.iter_mut().zip(lhs).zip(rhs) {
        *o = a + b;
    }
}

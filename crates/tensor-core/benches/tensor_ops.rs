// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for tile kernels.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tensor_core::{gemm, softmax_columns, MatrixView, MatrixViewMut};

fn bench_gemm(c: &mut Criterion) {
    let mut group = c.benchmark_group("gemm");
    for &(m, n, k) in &[(8usize, 8usize, 72usize), (32, 16, 288), (64, 64, 576)] {
        let a: Vec<f32> = (0..m * k).map(|i| (i % 13) as f32 * 0.1).collect();
        let b_data: Vec<f32> = (0..k * n).map(|i| (i % 7) as f32 * 0.2).collect();
        let mut c_data = vec![0.0f32; m * n];
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{m}x{n}x{k}")),
            &(m, n, k),
            |bench, _| {
                bench.iter(|| {
                    let b = MatrixView::new(&b_data, k, n, k).unwrap();
                    let mut out = MatrixViewMut::new(&mut c_data, m, n, m).unwrap();
                    gemm(black_box(&a), k, &b, &mut out).unwrap();
                })
            },
        );
    }
    group.finish();
}

fn bench_softmax(c: &mut Criterion) {
    let rows = 1000;
    let cols = 8;
    let mut data: Vec<f32> = (0..rows * cols).map(|i| (i % 17) as f32).collect();
    c.bench_function("softmax_columns_1000x8", |bench| {
        bench.iter(|| {
            let mut tile = MatrixViewMut::new(&mut data, rows, cols, rows).unwrap();
            softmax_columns(black_box(&mut tile));
        })
    });
}

criterion_group!(benches, bench_gemm, bench_softmax);
criterion_main!(benches);

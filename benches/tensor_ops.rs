//! Core tensor operation benchmarks
//!
//! Covers the hot paths of the engine:
//! - Elementwise binary ops at several sizes
//! - Matrix multiplication (square and batched)
//! - Reductions along an axis
//! - Broadcasting a vector against a matrix
//! - Full forward + backward passes through small graphs

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use farad::{Tensor, TensorOps, tensor};

/// Deterministic pseudo-random matrix so runs are comparable.
fn matrix(rows: usize, cols: usize, requires_grad: bool) -> Tensor {
    let data: Vec<Vec<f64>> = (0..rows)
        .map(|r| (0..cols).map(|c| ((r * cols + c) as f64 * 0.01).sin()).collect())
        .collect();
    tensor(data, requires_grad).unwrap()
}

fn vector(len: usize) -> Tensor {
    let data: Vec<f64> = (0..len).map(|i| (i as f64 * 0.01).cos()).collect();
    tensor(data, false).unwrap()
}

// ===== ELEMENTWISE =====

fn bench_elementwise(c: &mut Criterion) {
    let mut group = c.benchmark_group("elementwise");

    for size in [16, 64, 128] {
        let size_ref = &size;
        group.bench_with_input(BenchmarkId::new("add", size), size_ref, |b, s| {
            let a = matrix(*s, *s, false);
            let b_in = matrix(*s, *s, false);
            b.iter(|| black_box(&a).add(black_box(&b_in)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("mul", size), size_ref, |b, s| {
            let a = matrix(*s, *s, false);
            let b_in = matrix(*s, *s, false);
            b.iter(|| black_box(&a).mul(black_box(&b_in)).unwrap())
        });
    }

    let m = matrix(128, 128, false);
    group.bench_function("exp_128x128", |b| {
        b.iter(|| black_box(&m).exp());
    });

    group.finish();
}

// ===== MATMUL =====

fn bench_matmul(c: &mut Criterion) {
    let mut group = c.benchmark_group("matmul");

    for size in [8, 32, 64] {
        let size_ref = &size;
        group.bench_with_input(BenchmarkId::new("square", size), size_ref, |b, s| {
            let a = matrix(*s, *s, false);
            let b_in = matrix(*s, *s, false);
            b.iter(|| black_box(&a).matmul(black_box(&b_in)).unwrap())
        });
    }

    group.bench_function("batched_8x16x16", |b| {
        let batch: Vec<Vec<Vec<f64>>> = (0..8)
            .map(|k| {
                (0..16)
                    .map(|r| {
                        (0..16)
                            .map(|c| ((k * 256 + r * 16 + c) as f64 * 0.01).sin())
                            .collect()
                    })
                    .collect()
            })
            .collect();
        let lhs = tensor(batch, false).unwrap();
        let rhs = matrix(16, 16, false);
        b.iter(|| black_box(&lhs).matmul(black_box(&rhs)).unwrap());
    });

    group.finish();
}

// ===== REDUCTIONS =====

fn bench_reductions(c: &mut Criterion) {
    let mut group = c.benchmark_group("reductions");
    let m = matrix(64, 64, false);

    group.bench_function("sum_axis0_64x64", |b| {
        b.iter(|| black_box(&m).sum(0, false).unwrap());
    });
    group.bench_function("mean_axis1_64x64", |b| {
        b.iter(|| black_box(&m).mean(1, false).unwrap());
    });
    group.bench_function("variance_axis1_64x64", |b| {
        b.iter(|| black_box(&m).variance(1, false).unwrap());
    });

    group.finish();
}

// ===== BROADCAST =====

fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");

    let m = matrix(128, 128, false);
    let row = vector(128);
    group.bench_function("row_plus_matrix_128", |b| {
        b.iter(|| black_box(&row).add(black_box(&m)).unwrap());
    });

    group.finish();
}

// ===== FORWARD + BACKWARD =====

fn bench_forward_backward(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward_backward");

    group.bench_function("two_layer_32x32", |b| {
        let x = matrix(32, 32, false);
        let w1 = matrix(32, 32, true);
        let w2 = matrix(32, 32, true);
        b.iter(|| {
            let h = x.matmul(&w1).unwrap();
            let out = h.matmul(&w2).unwrap();
            let loss = out.mean(0, false).unwrap().sum(0, false).unwrap();
            loss.backward().unwrap();
            loss.zero_grad_graph();
        });
    });

    group.bench_function("elementwise_chain_64x64", |b| {
        let x = matrix(64, 64, true);
        b.iter(|| {
            let y = x.pow(2).exp().sum(0, false).unwrap();
            let loss = y.sum(0, false).unwrap();
            loss.backward().unwrap();
            loss.zero_grad_graph();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_elementwise,
    bench_matmul,
    bench_reductions,
    bench_broadcast,
    bench_forward_backward
);
criterion_main!(benches);

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use faer::Mat;
use ldr_krylov::{
    ToeplitzLike, multiply_forward,
    reference::toeplitz_mult_slow,
    subdiagonal_multiply,
    validation::{Family, RandomCase},
};
use rand::{SeedableRng, rngs::StdRng};

const RANK: usize = 4;
const BATCH: usize = 16;

fn case(family: Family, n: usize) -> RandomCase {
    let mut rng = StdRng::seed_from_u64(n as u64);
    RandomCase::generate(family, n, RANK, BATCH, &mut rng).unwrap()
}

fn bench_toeplitz_like(c: &mut Criterion) {
    let mut group = c.benchmark_group("toeplitz_like");
    for n in [64, 256, 1024, 4096] {
        for cycle in [true, false] {
            let case = case(Family::ToeplitzCycle, n);
            let handle = ToeplitzLike::new(n, BATCH, RANK, cycle).unwrap();
            let label = if cycle { "cycle" } else { "acyclic" };
            group.bench_with_input(BenchmarkId::new(label, n), &n, |b, _| {
                b.iter(|| {
                    multiply_forward(
                        black_box(&handle),
                        case.g.as_ref(),
                        case.h.as_ref(),
                        black_box(case.x.as_ref()),
                    )
                    .unwrap()
                })
            });
        }
    }
    group.finish();
}

fn bench_subdiagonal(c: &mut Criterion) {
    let mut group = c.benchmark_group("subdiagonal");
    for n in [64, 256, 1024] {
        let case = case(Family::Subdiagonal, n);
        let subd_a: Vec<f32> = vec![1.0; n - 1];
        let subd_b: Vec<f32> = vec![1.0; n - 1];
        group.bench_with_input(BenchmarkId::new("corner", n), &n, |b, _| {
            b.iter(|| {
                subdiagonal_multiply(
                    &subd_a,
                    &subd_b,
                    case.g.as_ref(),
                    case.h.as_ref(),
                    black_box(case.x.as_ref()),
                    Some(1.0),
                    Some(-1.0),
                )
                .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_dense_reference(c: &mut Criterion) {
    let mut group = c.benchmark_group("dense_reference");
    group.sample_size(10);
    for n in [64, 256] {
        let case = case(Family::ToeplitzCycle, n);
        group.bench_with_input(BenchmarkId::new("toeplitz_mult_slow", n), &n, |b, _| {
            b.iter(|| -> Mat<f32> {
                toeplitz_mult_slow(case.g.as_ref(), case.h.as_ref(), black_box(case.x.as_ref()), true)
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_toeplitz_like, bench_subdiagonal, bench_dense_reference);
criterion_main!(benches);

//! Performance Benchmarks for the MPF Hierarchy
//!
//! Run with: cargo bench
//!
//! Benchmarks cover:
//! - SOM operations (BMU search, learning step, generation)
//! - Full hierarchy evaluations
//! - Config serialization

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mpf_hierarchy::{
    CovarianceMode, Hierarchy, HierarchyConfig, KernelKind, LevelShape, MpfUnit, Som, SomConfig,
    UnitConfig,
};
use ndarray::Array1;

// ═══════════════════════════════════════════════════════════════════════════
// SOM BENCHMARKS
// ═══════════════════════════════════════════════════════════════════════════

fn bench_find_bmu(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_bmu");
    for side in [5, 10, 20].iter() {
        let config = SomConfig::new(*side, *side, 16, KernelKind::Online).with_seed(1);
        let mut som = Som::new(config).unwrap();
        let input = Array1::from_elem(16, 0.5);

        group.throughput(Throughput::Elements((*side * *side) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(side), side, |b, _| {
            b.iter(|| som.find_bmu(black_box(input.view()), true))
        });
    }
    group.finish();
}

fn bench_find_bmu_parallel(c: &mut Criterion) {
    let mut som = Som::new(
        SomConfig::new(20, 20, 400, KernelKind::Online)
            .with_seed(1)
            .with_parallel(true),
    )
    .unwrap();
    let input = Array1::from_elem(400, 0.1);

    c.bench_function("find_bmu_parallel_20x20x400", |b| {
        b.iter(|| som.find_bmu(black_box(input.view()), true))
    });
}

fn bench_feed(c: &mut Criterion) {
    let mut group = c.benchmark_group("feed");
    for kernel in [KernelKind::Online, KernelKind::Parameterless] {
        let mut som = Som::new(SomConfig::new(10, 10, 9, kernel).with_seed(2)).unwrap();
        let input = Array1::from_elem(9, 0.3);

        group.bench_function(format!("{:?}", kernel), |b| {
            b.iter(|| som.feed(black_box(input.view())))
        });
    }
    group.finish();
}

fn bench_generate(c: &mut Criterion) {
    let weights = Array1::from_elem(25, 1.0 / 25.0);

    let config = SomConfig::new(5, 5, 9, KernelKind::Online).with_seed(3);
    let mut categorical = Som::new(config).unwrap();
    c.bench_function("generate_categorical", |b| {
        b.iter(|| categorical.generate(black_box(weights.view()), 1))
    });

    let mut mixture = Som::new(SomConfig::new(5, 5, 9, KernelKind::Online).with_seed(3)).unwrap();
    mixture.init_generative_mixture(CovarianceMode::Full);
    c.bench_function("generate_mixture", |b| {
        b.iter(|| mixture.generate(black_box(weights.view()), 1))
    });
}

// ═══════════════════════════════════════════════════════════════════════════
// HIERARCHY BENCHMARKS
// ═══════════════════════════════════════════════════════════════════════════

fn hierarchy(leaves: usize, levels: usize, top: LevelShape) -> Hierarchy {
    let units = (0..leaves)
        .map(|i| {
            MpfUnit::new(
                UnitConfig::sensor(3, (5, 5), KernelKind::Online).with_seed(i as u64),
            )
            .unwrap()
        })
        .collect();
    let config = HierarchyConfig::new(levels)
        .with_shapes(LevelShape::new((3, 3), (4, 4)), top)
        .with_seed(7);
    Hierarchy::with_config(units, config).unwrap()
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");
    for leaves in [2, 4, 8].iter() {
        let mut h = hierarchy(*leaves, 3, LevelShape::new((6, 6), (4, 4)));
        let input = vec![0.5; leaves * 3];

        group.bench_with_input(BenchmarkId::from_parameter(leaves), leaves, |b, _| {
            b.iter(|| h.evaluate(black_box(&input), 0.1))
        });
    }
    group.finish();
}

fn bench_evaluate_default_top(c: &mut Criterion) {
    let mut h = hierarchy(3, 3, HierarchyConfig::default().top_shape);
    let input = vec![0.5; 9];

    c.bench_function("evaluate_board_sized", |b| {
        b.iter(|| h.evaluate(black_box(&input), 0.0))
    });
}

// ═══════════════════════════════════════════════════════════════════════════
// CONFIG BENCHMARKS
// ═══════════════════════════════════════════════════════════════════════════

fn bench_config_serialization(c: &mut Criterion) {
    let config = HierarchyConfig::new(4).with_seed(1);

    c.bench_function("config_serialize", |b| {
        b.iter(|| serde_json::to_string(black_box(&config)))
    });
}

criterion_group!(
    som_benches,
    bench_find_bmu,
    bench_find_bmu_parallel,
    bench_feed,
    bench_generate,
);

criterion_group!(hierarchy_benches, bench_evaluate, bench_evaluate_default_top,);

criterion_group!(config_benches, bench_config_serialization,);

criterion_main!(som_benches, hierarchy_benches, config_benches);

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::f64::consts::PI;
use tsdict::config::CompressorConfig;
use tsdict::parallel::compress_batch;
use tsdict::similarity::SimilarityEngine;
use tsdict::types::{Sample, Window};
use tsdict::{reconstruct, Compressor};

fn create_periodic_values(count: usize) -> Vec<f64> {
    (0..count)
        .map(|i| 100.0 + 10.0 * (2.0 * PI * i as f64 / 48.0).sin() + (i % 7) as f64 * 0.05)
        .collect()
}

fn create_samples(count: usize) -> Vec<Sample> {
    create_periodic_values(count)
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            Sample::new(1000 + i as i64 * 10)
                .with_value("power", p)
                .with_value("voltage", 220.0 + p / 50.0)
                .with_value("current", p / 220.0)
        })
        .collect()
}

fn bench_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression");
    let compressor = Compressor::default();

    for size in [1_000, 10_000, 50_000].iter() {
        let values = create_periodic_values(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(compressor.compress_values(&values)));
        });
    }

    group.finish();
}

fn bench_multi_dimensional(c: &mut Criterion) {
    let mut group = c.benchmark_group("multi_dimensional");
    let mut config = CompressorConfig::default();
    config.dimensions.multi_dimensional = true;
    let compressor = Compressor::new(config).expect("valid config");

    for size in [1_000, 10_000].iter() {
        let samples = create_samples(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(compressor.compress(&samples)));
        });
    }

    group.finish();
}

fn bench_similarity(c: &mut Criterion) {
    let mut group = c.benchmark_group("similarity");
    let engine = SimilarityEngine::from_config(&CompressorConfig::default());

    for len in [10, 60, 120].iter() {
        let values = create_periodic_values(*len * 2);
        let a = Window::Flat(values[..*len].to_vec());
        let b = Window::Flat(values[*len..].to_vec());
        group.bench_with_input(BenchmarkId::from_parameter(len), len, |bench, _| {
            bench.iter(|| black_box(engine.is_similar(&a, &b)));
        });
    }

    group.finish();
}

fn bench_reconstruction(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconstruction");
    let compressor = Compressor::default();

    for size in [1_000, 10_000].iter() {
        let result = compressor.compress_values(&create_periodic_values(*size));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(reconstruct(&result).expect("complete result")));
        });
    }

    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let compressor = Compressor::default();
    let series: Vec<(String, Vec<Sample>)> = (0..8)
        .map(|d| (format!("device-{}", d), create_samples(5_000)))
        .collect();

    c.bench_function("batch_8x5000", |b| {
        b.iter(|| black_box(compress_batch(&compressor, series.clone())));
    });
}

criterion_group!(
    benches,
    bench_compression,
    bench_multi_dimensional,
    bench_similarity,
    bench_reconstruction,
    bench_batch
);
criterion_main!(benches);

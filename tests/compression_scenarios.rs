//! End-to-end compression scenarios
//!
//! Exercises the public API the way a caller would: build a compressor from
//! a configuration, compress a series, inspect and reconstruct the result.

use std::f64::consts::PI;
use tsdict::config::CompressorConfig;
use tsdict::store::{ArchiveReason, TemplateStore};
use tsdict::trend::{TrendDetector, TrendDirection};
use tsdict::types::{Sample, SeriesColumns, Window};
use tsdict::{reconstruct, CompressionResult, Compressor};

// =============================================================================
// Helpers
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn sine(n: usize, period: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 100.0 + 10.0 * (2.0 * PI * i as f64 / period as f64).sin())
        .collect()
}

/// Deterministic pseudo-random values in `[lo, lo + span)`
fn noise(n: usize, seed: u64, lo: f64, span: f64) -> Vec<f64> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            lo + span * ((state >> 11) as f64 / (1u64 << 53) as f64)
        })
        .collect()
}

fn fixed_block(size: usize) -> Compressor {
    let mut config = CompressorConfig::default();
    config.blocks.block_size = size;
    config.blocks.adaptive_block_size = false;
    Compressor::new(config).expect("valid config")
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_repeated_sine_wave() {
    init_tracing();
    let compressor = fixed_block(50);
    assert_eq!(compressor.config().similarity.max_acceptable_cer, 0.15);

    // 100 identical blocks of one period each
    let result = compressor.compress_values(&sine(5000, 50));

    assert_eq!(result.blocks_processed, 100);
    assert!(result.hit_ratio > 0.8, "hit ratio {}", result.hit_ratio);
    assert!(result.templates_total <= 5);
    assert!(result.is_partition());
    assert!(result.cost < 0.0);

    // Same series with the default adaptive block size
    let compressor = Compressor::default();
    assert!(compressor.config().blocks.adaptive_block_size);
    let adaptive = compressor.compress_values(&sine(5000, 50));
    assert!(adaptive.hit_ratio > 0.8, "adaptive hit ratio {}", adaptive.hit_ratio);
    assert!(adaptive.is_partition());
}

#[test]
fn test_monotonic_series_has_trend() {
    init_tracing();
    let values: Vec<f64> = (1..=200).map(|i| i as f64).collect();

    let mut detector = TrendDetector::new(&CompressorConfig::default().trend);
    for chunk in values.chunks(10) {
        detector.observe_window(&Window::Flat(chunk.to_vec()), "power");
    }
    let signal = detector.detect();
    assert!(signal.has_trend);
    assert_eq!(signal.direction, TrendDirection::Up);

    let monotonic = Compressor::default().compress_values(&values);
    let periodic = fixed_block(50).compress_values(&sine(200, 50));
    assert!(monotonic.templates_total > periodic.templates_total);
    assert!(monotonic.hit_ratio < periodic.hit_ratio);
    assert!(monotonic.is_partition());
}

#[test]
fn test_empty_input() {
    let result = Compressor::default().compress(&[]);
    assert!(result.templates.is_empty());
    assert!(result.encoded_stream.is_empty());
    assert_eq!(result.compression_ratio, 1.0);
    assert_eq!(result.hit_ratio, 0.0);
}

#[test]
fn test_merge_absorbs_rarely_used_duplicate() {
    let mut config = CompressorConfig::default();
    config.templates.template_merge_threshold = 0.9;
    let mut store = TemplateStore::new(&config);

    let popular = store.create(Window::Flat(sine(50, 50)));
    let rare = store.create(Window::Flat(sine(50, 50)));
    for (seed, lo) in [(1, 0.0), (2, 500.0), (3, 5000.0)] {
        store.create(Window::Flat(noise(50, seed, lo, 100.0)));
    }
    for _ in 0..19 {
        store.record_use(popular);
    }
    store.record_use(rare);
    store.record_use(rare);

    let before = store.len();
    assert_eq!(store.merge_similar(), 1);
    assert_eq!(store.len(), before - 1);

    let archived = store.archive().get(rare).expect("merged template archived");
    assert_eq!(archived.merged_into, Some(popular));
    assert_eq!(archived.reason, ArchiveReason::Merged);
    assert_eq!(store.get(popular).map(|t| t.usage_count), Some(23));
}

#[test]
fn test_small_capacity_stays_bounded() {
    init_tracing();
    let mut config = CompressorConfig::default();
    config.templates.max_templates = 5;
    let compressor = Compressor::new(config).unwrap();

    let result = compressor.compress_values(&noise(3000, 42, 10.0, 1000.0));
    assert!(result.templates_total <= 5);
    assert!(result.store_stats.evicted > 0);
    assert!(result.is_partition());
    for block in &result.encoded_stream {
        assert!(result.templates.contains_key(&block.template_id));
    }
}

#[test]
fn test_adaptive_block_sizes_stay_in_bounds() {
    let values: Vec<f64> = sine(4000, 60)
        .iter()
        .zip(noise(4000, 7, -1.0, 2.0))
        .map(|(s, n)| s + n)
        .collect();
    let result = Compressor::default().compress_values(&values);

    assert!(result.is_partition());
    // Only the final block may be cut short by the end of the input
    let (last, full) = result.block_size_history.split_last().unwrap();
    assert!(full
        .iter()
        .all(|s| (result.min_block_size..=result.max_block_size).contains(s)));
    assert!(*last >= 1 && *last <= result.max_block_size);
    for adjustment in &result.block_size_adjustments {
        assert!((10..=120).contains(&adjustment.new_size));
    }
    assert!(!result.block_size_adjustments.is_empty());
}

#[test]
fn test_reconstruction_of_periodic_signal() {
    let values = sine(1000, 50);
    let result = fixed_block(50).compress_values(&values);

    let rebuilt = reconstruct(&result).unwrap();
    assert_eq!(rebuilt.len(), values.len());
    let original = SeriesColumns::from_values("power", &values);
    assert!(rebuilt.reconstruction_error(&original) < 1e-9);
}

#[test]
fn test_multi_dimensional_samples() {
    init_tracing();
    let mut config = CompressorConfig::default();
    config.dimensions.multi_dimensional = true;
    config.dimensions.dimension_weights.insert("power".into(), 2.0);
    config.blocks.block_size = 40;
    config.blocks.adaptive_block_size = false;
    let compressor = Compressor::new(config).unwrap();

    let power = sine(800, 40);
    let samples: Vec<Sample> = power
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let mut sample = Sample::new(1_700_000_000_000 + i as i64 * 1000)
                .with_value("power", *p)
                .with_value("voltage", 220.0 + p / 100.0);
            // Every 10th sample lacks a current reading
            if i % 10 != 0 {
                sample.insert("current", p / 220.0);
            }
            sample
        })
        .collect();

    let result = compressor.compress(&samples);
    assert!(result.multi_dimensional);
    assert_eq!(result.dimensions, vec!["current", "power", "voltage"]);
    assert_eq!(result.dimension_stats["power"].weight, 2.0);
    assert_eq!(result.dimension_stats["current"].values, 720);
    assert!(result.hit_ratio > 0.8);
    assert!(result.time_range.is_some());

    let rebuilt = reconstruct(&result).unwrap();
    assert_eq!(rebuilt.dimension("voltage").map(<[f64]>::len), Some(800));
}

#[test]
fn test_json_samples_with_bad_fields() {
    let raw = serde_json::json!([
        {"timestamp": 0, "power": 1.5, "status": "ok"},
        {"timestamp": 1000, "power": "2.5"},
        {"timestamp": 2000, "power": null}
    ]);
    let samples: Vec<Sample> = raw
        .as_array()
        .unwrap()
        .iter()
        .map(|v| Sample::from_json(v).unwrap())
        .collect();

    assert_eq!(samples[0].get("power"), Some(1.5));
    assert_eq!(samples[0].get("status"), None);
    assert_eq!(samples[1].get("power"), Some(2.5));
    assert_eq!(samples[2].get("power"), None);
}

#[test]
fn test_result_json_round_trip() {
    let result = Compressor::default().compress_values(&sine(600, 30));
    let json = result.to_json().unwrap();
    let parsed = CompressionResult::from_json(&json).unwrap();

    assert_eq!(parsed.encoded_stream, result.encoded_stream);
    assert_eq!(parsed.block_size_history, result.block_size_history);
    assert_eq!(parsed.block_size_adjustments.len(), result.block_size_adjustments.len());
    assert_eq!(
        parsed.templates.keys().collect::<Vec<_>>(),
        result.templates.keys().collect::<Vec<_>>()
    );

    let a = reconstruct(&parsed).unwrap();
    let b = reconstruct(&result).unwrap();
    let (a, b) = (a.flat().unwrap(), b.flat().unwrap());
    assert_eq!(a.len(), b.len());
    assert!(a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9));
}

#[test]
fn test_config_file_drives_compressor() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tsdict.toml");
    std::fs::write(
        &path,
        r#"
        [blocks]
        block_size = 25
        adaptive_block_size = false

        [templates]
        max_templates = 20
        "#,
    )
    .unwrap();

    let config = CompressorConfig::from_file(&path).unwrap();
    let compressor = Compressor::new(config).unwrap();
    let result = compressor.compress_values(&sine(500, 25));
    assert_eq!(result.blocks_processed, 20);
    assert!(result.block_size_history.iter().all(|&s| s == 25));
}

#[test]
fn test_runs_are_independent() {
    let compressor = Compressor::default();
    let values = sine(900, 45);
    let first = compressor.compress_values(&values);
    compressor.compress_values(&noise(900, 3, 0.0, 50.0));
    let again = compressor.compress_values(&values);
    assert_eq!(first, again);
}

//! Property Tests for the Template Compressor
//!
//! Uses proptest to check the invariants every run must hold regardless of
//! input: stream partitioning, template id ordering, store capacity,
//! block-size bounds and the symmetric parts of the similarity score.

use proptest::prelude::*;
use tsdict::block_size::BlockSizeController;
use tsdict::config::{CompressorConfig, SimilarityWeights};
use tsdict::similarity::{self, SimilarityEngine};
use tsdict::store::TemplateStore;
use tsdict::trend::TrendSignal;
use tsdict::types::Window;
use tsdict::Compressor;

// =============================================================================
// Test Data Strategies
// =============================================================================

/// Typical sensor readings, never NaN or Inf
fn sensor_value() -> impl Strategy<Value = f64> {
    prop_oneof![
        (0.0..500.0f64),
        (-50.0..50.0f64),
        (-1000i32..1000).prop_map(|i| i as f64),
        Just(0.0),
    ]
}

/// Series mixing a repeating pattern with arbitrary readings
fn series(max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop_oneof![
        prop::collection::vec(sensor_value(), 0..max_len),
        (5usize..60, 0..max_len).prop_map(|(period, len)| {
            (0..len).map(|i| 100.0 + (i % period) as f64 * 3.0).collect()
        }),
    ]
}

fn small_capacity_config(max_templates: usize) -> CompressorConfig {
    let mut config = CompressorConfig::default();
    config.templates.max_templates = max_templates;
    config
}

// =============================================================================
// Compression Invariants
// =============================================================================

mod compression {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        /// Encoded blocks tile [0, n) in order with no gaps or overlaps
        #[test]
        fn stream_partitions_input(values in series(1500)) {
            let result = Compressor::default().compress_values(&values);

            prop_assert_eq!(result.total_values, values.len());
            prop_assert!(result.is_partition());
            if values.len() >= 10 {
                let covered: usize = result.encoded_stream.iter().map(|b| b.length).sum();
                prop_assert_eq!(covered, values.len());
            }
        }

        /// The hit ratio is exactly hits over blocks and within [0, 1]
        #[test]
        fn hit_ratio_is_bounded(values in series(1500)) {
            let result = Compressor::default().compress_values(&values);

            prop_assert!((0.0..=1.0).contains(&result.hit_ratio));
            if result.blocks_processed > 0 {
                let expected = result.hits as f64 / result.blocks_processed as f64;
                prop_assert!((result.hit_ratio - expected).abs() < 1e-12);
            }
        }

        /// Every referenced template is carried by the result
        #[test]
        fn referenced_templates_are_present(values in series(1500), capacity in 2usize..12) {
            let compressor = Compressor::new(small_capacity_config(capacity)).unwrap();
            let result = compressor.compress_values(&values);

            prop_assert!(result.templates_total <= capacity);
            for block in &result.encoded_stream {
                prop_assert!(result.templates.contains_key(&block.template_id));
            }
            prop_assert_eq!(result.templates_used, result.templates.len());
        }

        /// Block lengths never leave the configured bounds, except a short
        /// final block
        #[test]
        fn block_sizes_within_bounds(values in series(3000)) {
            let result = Compressor::default().compress_values(&values);
            let lengths: Vec<usize> = result.encoded_stream.iter().map(|b| b.length).collect();
            prop_assert_eq!(&result.block_size_history, &lengths);
            if let Some((last, full)) = result.block_size_history.split_last() {
                for size in full {
                    prop_assert!((10..=120).contains(size));
                }
                prop_assert!((1..=120).contains(last));
            }
        }
    }
}

// =============================================================================
// Template Store Invariants
// =============================================================================

mod store {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Ids strictly increase and the store never exceeds capacity
        #[test]
        fn ids_increase_and_capacity_holds(
            windows in prop::collection::vec(prop::collection::vec(sensor_value(), 10..40), 1..60),
            capacity in 1usize..8,
        ) {
            let mut store = TemplateStore::new(&small_capacity_config(capacity));
            let mut last = 0;
            for (block, values) in windows.into_iter().enumerate() {
                store.advance_to(block as u64);
                let id = store.create(Window::Flat(values));
                prop_assert!(id > last);
                last = id;
                prop_assert!(store.len() <= capacity);
                prop_assert!(store.get(id).is_some());
            }
        }

        /// A lookup never returns a template outside the store
        #[test]
        fn matches_reference_active_templates(
            windows in prop::collection::vec(prop::collection::vec(sensor_value(), 10..30), 1..30),
        ) {
            let mut store = TemplateStore::new(&small_capacity_config(6));
            for values in windows {
                let window = Window::Flat(values);
                match store.find_match(&window, &TrendSignal::default()) {
                    Some(found) => {
                        prop_assert!(store.get(found.template_id).is_some());
                    }
                    None => {
                        store.create(window);
                    }
                }
            }
        }
    }
}

// =============================================================================
// Controller Invariants
// =============================================================================

mod controller {
    use super::*;

    proptest! {
        /// current_size stays in bounds for any outcome sequence
        #[test]
        fn size_within_bounds(
            outcomes in prop::collection::vec((any::<bool>(), 0.0..1.0f64, 0.0..0.2f64), 0..400),
            strength in 0.0..1.0f64,
        ) {
            let config = CompressorConfig::default().blocks;
            let mut controller = BlockSizeController::new(&config);
            let trend = TrendSignal {
                has_trend: strength > 0.7,
                strength,
                ..TrendSignal::default()
            };
            for (hit, similarity, cer) in outcomes {
                controller.record_outcome(hit);
                if hit {
                    controller.record_match(similarity, cer);
                }
                let size = controller.maybe_adjust(&trend);
                prop_assert!(size >= config.min_block_size && size <= config.max_block_size);
                prop_assert_eq!(size, controller.current_size());
            }
        }
    }
}

// =============================================================================
// Similarity Properties
// =============================================================================

mod similarity_props {
    use super::*;

    /// Weights without the directional CER term
    fn symmetric_weights() -> SimilarityWeights {
        SimilarityWeights {
            ks_test: 0.15,
            correlation: 0.3,
            cer: 0.0,
            shape: 0.3,
            trend: 0.25,
        }
    }

    proptest! {
        /// CER of a sequence against itself is zero
        #[test]
        fn cer_zero_on_self(values in prop::collection::vec(sensor_value(), 1..200)) {
            match similarity::cer(&values, &values) {
                Some(cer) => prop_assert_eq!(cer, 0.0),
                None => prop_assert!(values.iter().all(|v| *v == 0.0)),
            }
        }

        /// CER is never negative
        #[test]
        fn cer_non_negative(
            a in prop::collection::vec(sensor_value(), 1..100),
            b in prop::collection::vec(sensor_value(), 1..100),
        ) {
            if let Some(cer) = similarity::cer(&a, &b) {
                prop_assert!(cer >= 0.0);
            }
        }

        /// Score is symmetric once the directional CER term is weighted out
        #[test]
        fn score_symmetric(
            pair in (10usize..80).prop_flat_map(|n| (
                prop::collection::vec(sensor_value(), n),
                prop::collection::vec(sensor_value(), n),
            )),
        ) {
            let (a, b) = pair;
            let engine = SimilarityEngine::from_config(&CompressorConfig::default())
                .with_weights(symmetric_weights());
            let ab = engine.similarity(&Window::Flat(a.clone()), &Window::Flat(b.clone()));
            let ba = engine.similarity(&Window::Flat(b), &Window::Flat(a));
            prop_assert!((ab.score - ba.score).abs() < 1e-9);
        }
    }
}

//! Compression driver
//!
//! Slices the input into consecutive blocks, matches each block against the
//! template store and records the outcome. Every call builds a fresh store,
//! controller and trend detector, so runs never share state.
//!
//! # Block Loop
//!
//! ```text
//!   ┌─────────────┐
//!   │   slice     │ next min(block_size, remaining) samples
//!   └──────┬──────┘
//!          ▼
//!   ┌─────────────┐   hit   ┌──────────────────────────┐
//!   │ find_match  ├────────▶│ record CER / similarity  │
//!   └──────┬──────┘         └────────────┬─────────────┘
//!     miss │                             │
//!          ▼                             │
//!   ┌─────────────┐                      │
//!   │   create    │                      │
//!   └──────┬──────┘                      │
//!          ▼                             ▼
//!   ┌───────────────────────────────────────────┐
//!   │ encode block, feed controller, maybe_adjust│
//!   └───────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use tsdict::compressor::Compressor;
//!
//! let compressor = Compressor::default();
//! let values: Vec<f64> = (0..500).map(|i| (i % 50) as f64 + 1.0).collect();
//! let result = compressor.compress_values(&values);
//!
//! assert_eq!(result.total_values, 500);
//! assert!(result.is_partition());
//! ```

use crate::block_size::BlockSizeController;
use crate::config::CompressorConfig;
use crate::error::Result;
use crate::metrics;
use crate::result::{self, CompressionResult, DimensionStats, EncodedBlock};
use crate::store::TemplateStore;
use crate::trend::TrendDetector;
use crate::types::{Sample, SeriesColumns, TemplateId, Window};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, info, warn};

/// How windows are cut from the columns
#[derive(Debug, Clone, Copy)]
enum Mode<'a> {
    /// One named column compressed as a flat series
    Flat(&'a str),
    /// Every column, per-dimension windows
    Multi,
}

impl Mode<'_> {
    fn label(&self) -> &'static str {
        match self {
            Mode::Flat(_) => "flat",
            Mode::Multi => "multi",
        }
    }
}

/// Template-dictionary compressor
///
/// Holds only a validated configuration; every `compress*` call is an
/// independent run.
#[derive(Debug, Clone, Default)]
pub struct Compressor {
    config: CompressorConfig,
}

impl Compressor {
    /// Create a compressor, validating the configuration
    pub fn new(config: CompressorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Active configuration
    pub fn config(&self) -> &CompressorConfig {
        &self.config
    }

    /// Compress a sequence of samples
    pub fn compress(&self, samples: &[Sample]) -> CompressionResult {
        self.compress_columns(&SeriesColumns::from_samples(samples))
    }

    /// Compress a raw flat series as the primary dimension
    pub fn compress_values(&self, values: &[f64]) -> CompressionResult {
        let columns = SeriesColumns::from_values(&self.config.dimensions.primary_dimension, values);
        self.compress_columns(&columns)
    }

    /// Compress an already columnar input
    pub fn compress_columns(&self, columns: &SeriesColumns) -> CompressionResult {
        let started = Instant::now();
        let config = &self.config;
        let primary = config.dimensions.primary_dimension.as_str();

        let mode = if config.dimensions.multi_dimensional {
            Mode::Multi
        } else {
            match columns.flat_dimension(primary) {
                Some(dimension) => {
                    if dimension != primary {
                        warn!(
                            primary_dimension = primary,
                            using = dimension,
                            "Primary dimension not found, compressing another dimension"
                        );
                    }
                    Mode::Flat(dimension)
                },
                None => {
                    if !columns.is_empty() {
                        warn!(samples = columns.len(), "Input carries no usable dimension");
                    }
                    return self.undersized(columns, Vec::new(), false);
                },
            }
        };

        let dimensions = match mode {
            Mode::Flat(dimension) => vec![dimension.to_string()],
            Mode::Multi => columns.dimensions(),
        };

        let n = columns.len();
        if n == 0 || n < config.blocks.min_block_size {
            if n > 0 {
                warn!(
                    samples = n,
                    min_block_size = config.blocks.min_block_size,
                    "Input too small to compress"
                );
            }
            return self.undersized(columns, dimensions, matches!(mode, Mode::Multi));
        }

        let mut store = TemplateStore::new(config);
        let mut controller = BlockSizeController::new(&config.blocks);
        let mut trend = TrendDetector::new(&config.trend);

        let mut templates: BTreeMap<TemplateId, Window> = BTreeMap::new();
        let mut encoded_stream = Vec::new();
        let mut block_size_history = Vec::new();
        let mut start = 0;

        while start < n {
            store.advance_to(controller.blocks_processed() as u64);

            let mut size = controller.current_size();
            if size == 0 {
                warn!(
                    start_index = start,
                    min_block_size = controller.min_size(),
                    "Zero block size, substituting minimum"
                );
                size = controller.min_size();
            }
            let length = size.min(n - start);
            block_size_history.push(length);

            let window = match mode {
                Mode::Flat(dimension) => columns.flat_window(dimension, start, length),
                Mode::Multi => columns.multi_window(start, length),
            };

            trend.observe_window(&window, primary);
            let signal = trend.detect();

            let (template_id, hit) = match store.find_match(&window, &signal) {
                Some(found) => {
                    controller.record_match(found.score, found.cer);
                    debug!(
                        start_index = start,
                        length,
                        template_id = found.template_id,
                        score = found.score,
                        cer = found.cer,
                        "Block matched"
                    );
                    (found.template_id, true)
                },
                None => {
                    let id = store.create(window);
                    debug!(start_index = start, length, template_id = id, "Block stored as template");
                    (id, false)
                },
            };

            if !templates.contains_key(&template_id) {
                if let Some(template) = store.get(template_id) {
                    templates.insert(template_id, template.data.clone());
                }
            }

            encoded_stream.push(EncodedBlock {
                template_id,
                start_index: start,
                length,
            });
            metrics::record_block(hit);
            controller.record_outcome(hit);
            controller.maybe_adjust(&signal);

            start += length;
        }

        let blocks = encoded_stream.len();
        let referenced: BTreeSet<TemplateId> = encoded_stream.iter().map(|b| b.template_id).collect();
        let estimated_original_size = n * 8 * dimensions.len();
        let estimated_compressed_size = result::estimate_compressed_size(&templates, blocks);
        let compression_ratio = estimated_original_size as f64 / estimated_compressed_size.max(1) as f64;

        let avg_cer = controller.avg_cer();
        let cost = result::cost(
            avg_cer,
            config.similarity.max_acceptable_cer,
            compression_ratio,
            config.cost.w1,
            config.cost.w2,
        );

        let result = CompressionResult {
            templates,
            encoded_stream,
            compression_ratio,
            hit_ratio: controller.hit_ratio(),
            avg_cer,
            avg_similarity: controller.avg_similarity(),
            cost,
            block_size_history,
            continuous_hit_ratio: controller.continuous_hit_ratio().to_vec(),
            block_size_adjustments: controller.adjustments().to_vec(),
            dimension_stats: self.dimension_stats(columns, &dimensions),
            dimensions,
            multi_dimensional: matches!(mode, Mode::Multi),
            total_values: n,
            blocks_processed: controller.blocks_processed(),
            hits: controller.hits(),
            templates_used: referenced.len(),
            templates_total: store.len(),
            store_stats: store.stats(),
            estimated_original_size,
            estimated_compressed_size,
            min_block_size: config.blocks.min_block_size,
            max_block_size: config.blocks.max_block_size,
            time_range: columns.time_range(),
        };

        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_run(mode.label(), result.compression_ratio, elapsed);
        info!(
            mode = mode.label(),
            samples = n,
            blocks = result.blocks_processed,
            templates_used = result.templates_used,
            templates_total = result.templates_total,
            compression_ratio = result.compression_ratio,
            hit_ratio = result.hit_ratio,
            avg_cer = result.avg_cer,
            cost = result.cost,
            elapsed_ms = elapsed * 1000.0,
            "Compression finished"
        );

        result
    }

    fn undersized(
        &self,
        columns: &SeriesColumns,
        dimensions: Vec<String>,
        multi_dimensional: bool,
    ) -> CompressionResult {
        let blocks = &self.config.blocks;
        let mut result = CompressionResult::empty(
            columns.len(),
            dimensions,
            multi_dimensional,
            blocks.min_block_size,
            blocks.max_block_size,
        )
        .with_time_range(columns.time_range());
        result.dimension_stats = self.dimension_stats(columns, &result.dimensions);
        result
    }

    fn dimension_stats(
        &self,
        columns: &SeriesColumns,
        dimensions: &[String],
    ) -> BTreeMap<String, DimensionStats> {
        dimensions
            .iter()
            .map(|name| {
                let values = columns
                    .column(name)
                    .map(|column| column.iter().flatten().count())
                    .unwrap_or(0);
                let stats = DimensionStats {
                    processed: values > 0,
                    weight: self.config.dimensions.weight(name),
                    values,
                };
                (name.clone(), stats)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 + 10.0 * (2.0 * PI * i as f64 / 50.0).sin())
            .collect()
    }

    fn fixed_block_config(size: usize) -> CompressorConfig {
        let mut config = CompressorConfig::default();
        config.blocks.block_size = size;
        config.blocks.adaptive_block_size = false;
        config
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = CompressorConfig::default();
        config.blocks.min_block_size = 0;
        assert!(Compressor::new(config).is_err());
    }

    #[test]
    fn test_empty_input() {
        let result = Compressor::default().compress_values(&[]);
        assert_eq!(result.compression_ratio, 1.0);
        assert_eq!(result.hit_ratio, 0.0);
        assert!(result.templates.is_empty());
        assert!(result.encoded_stream.is_empty());
        assert_eq!(result.total_values, 0);
    }

    #[test]
    fn test_undersized_input() {
        let result = Compressor::default().compress_values(&[1.0, 2.0, 3.0]);
        assert_eq!(result.total_values, 3);
        assert_eq!(result.compression_ratio, 1.0);
        assert!(result.encoded_stream.is_empty());
        assert!(result.is_partition());
    }

    #[test]
    fn test_repeated_sine_blocks_hit() {
        let compressor = Compressor::new(fixed_block_config(50)).unwrap();
        let result = compressor.compress_values(&sine(1000));

        assert_eq!(result.blocks_processed, 20);
        assert_eq!(result.templates_used, 1);
        assert_eq!(result.hits, 19);
        assert!(result.hit_ratio > 0.9);
        assert!(result.avg_cer < 1e-9);
        assert!(result.compression_ratio > 10.0);
        assert!(result.block_size_history.iter().all(|&s| s == 50));
        assert!(result.is_partition());
    }

    #[test]
    fn test_templates_cover_stream() {
        let values: Vec<f64> = (0..700).map(|i| ((i * 37) % 101) as f64 + 1.0).collect();
        let result = Compressor::default().compress_values(&values);
        assert!(result.is_partition());
        for block in &result.encoded_stream {
            assert!(result.templates.contains_key(&block.template_id));
        }
        assert_eq!(result.block_size_history.len(), result.encoded_stream.len());
    }

    #[test]
    fn test_history_records_block_lengths() {
        let compressor = Compressor::new(fixed_block_config(50)).unwrap();
        let result = compressor.compress_values(&sine(1030));

        assert_eq!(result.blocks_processed, 21);
        assert_eq!(result.block_size_history.last(), Some(&30));
        let lengths: Vec<usize> = result.encoded_stream.iter().map(|b| b.length).collect();
        assert_eq!(result.block_size_history, lengths);
    }

    #[test]
    fn test_falls_back_to_other_dimension() {
        let samples: Vec<Sample> = sine(200)
            .into_iter()
            .enumerate()
            .map(|(i, v)| Sample::new(i as i64 * 1000).with_value("voltage", v))
            .collect();
        let result = Compressor::new(fixed_block_config(50)).unwrap().compress(&samples);
        assert_eq!(result.dimensions, vec!["voltage".to_string()]);
        assert_eq!(result.blocks_processed, 4);
        assert_eq!(result.time_range.unwrap().end, 199_000);
    }

    #[test]
    fn test_multi_dimensional_run() {
        let mut config = fixed_block_config(50);
        config.dimensions.multi_dimensional = true;
        let samples: Vec<Sample> = sine(500)
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                Sample::new(i as i64)
                    .with_value("power", v)
                    .with_value("current", v / 10.0)
            })
            .collect();

        let result = Compressor::new(config).unwrap().compress(&samples);
        assert!(result.multi_dimensional);
        assert_eq!(result.dimensions.len(), 2);
        assert_eq!(result.templates_used, 1);
        assert_eq!(result.estimated_original_size, 500 * 8 * 2);
        assert!(matches!(result.templates.values().next(), Some(Window::Multi(_))));
        assert_eq!(result.dimension_stats["current"].values, 500);
    }
}

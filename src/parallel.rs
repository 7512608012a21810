//! Parallel compression of independent series
//!
//! Runs never share mutable state, so a batch of series (one per device,
//! say) can be compressed on the rayon thread pool with no coordination.
//!
//! ```text
//! ┌──────────┐ ┌──────────┐ ┌──────────┐
//! │ Series A │ │ Series B │ │ Series C │
//! └────┬─────┘ └────┬─────┘ └────┬─────┘
//!      ▼            ▼            ▼
//! ┌──────────┐ ┌──────────┐ ┌──────────┐
//! │ fresh run│ │ fresh run│ │ fresh run│   rayon workers
//! └────┬─────┘ └────┬─────┘ └────┬─────┘
//!      └────────────┼────────────┘
//!                   ▼
//!        results in input order
//! ```
//!
//! # Example
//!
//! ```rust
//! use tsdict::compressor::Compressor;
//! use tsdict::parallel::compress_batch;
//! use tsdict::types::Sample;
//!
//! let series: Vec<(String, Vec<Sample>)> = (0..3)
//!     .map(|d| {
//!         let samples = (0..100)
//!             .map(|i| Sample::new(i).with_value("power", (i % 20) as f64 + d as f64))
//!             .collect();
//!         (format!("device-{}", d), samples)
//!     })
//!     .collect();
//!
//! let results = compress_batch(&Compressor::default(), series);
//! assert_eq!(results.len(), 3);
//! assert_eq!(results[0].series, "device-0");
//! ```

use crate::compressor::Compressor;
use crate::result::CompressionResult;
use crate::types::Sample;
use rayon::prelude::*;
use std::time::Instant;
use tracing::info;

/// Result of compressing one series of a batch
#[derive(Debug, Clone)]
pub struct SeriesCompression {
    /// Caller-supplied series name
    pub series: String,
    /// Result of the run
    pub result: CompressionResult,
    /// Run time in microseconds
    pub compression_time_us: u64,
}

/// Summary of a batch
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchStats {
    /// Series compressed
    pub series: usize,
    /// Samples across all series
    pub total_values: usize,
    /// Blocks across all series
    pub total_blocks: usize,
    /// Sum of estimated original sizes
    pub original_bytes: usize,
    /// Sum of estimated compressed sizes
    pub compressed_bytes: usize,
}

impl BatchStats {
    /// Overall estimated ratio, 1.0 when nothing was compressed
    pub fn compression_ratio(&self) -> f64 {
        if self.compressed_bytes == 0 {
            return 1.0;
        }
        self.original_bytes as f64 / self.compressed_bytes as f64
    }
}

/// Compress each series in its own run, in parallel
///
/// Results are returned in input order.
pub fn compress_batch(
    compressor: &Compressor,
    series: Vec<(String, Vec<Sample>)>,
) -> Vec<SeriesCompression> {
    let started = Instant::now();
    let results: Vec<SeriesCompression> = series
        .into_par_iter()
        .map(|(name, samples)| {
            let run_started = Instant::now();
            let result = compressor.compress(&samples);
            SeriesCompression {
                series: name,
                result,
                compression_time_us: run_started.elapsed().as_micros() as u64,
            }
        })
        .collect();

    let stats = batch_stats(&results);
    info!(
        series = stats.series,
        total_values = stats.total_values,
        compression_ratio = stats.compression_ratio(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Batch compression finished"
    );
    results
}

/// Aggregate sizes over a batch
pub fn batch_stats(results: &[SeriesCompression]) -> BatchStats {
    results.iter().fold(BatchStats::default(), |mut acc, item| {
        acc.series += 1;
        acc.total_values += item.result.total_values;
        acc.total_blocks += item.result.blocks_processed;
        acc.original_bytes += item.result.estimated_original_size;
        acc.compressed_bytes += item.result.estimated_compressed_size;
        acc
    })
}

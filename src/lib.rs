//! tsdict - Adaptive template-dictionary compression for sensor time series
//!
//! This library compresses single- or multi-dimensional sample sequences by:
//! - Slicing the input into consecutive blocks
//! - Matching each block against a bounded dictionary of template waveforms
//! - Storing unmatched blocks as new templates (with merging, eviction and an archive)
//! - Adapting the block size online from hit ratio and match quality
//!
//! The output is a self-contained stream of template references plus the
//! referenced templates, from which the series can be reconstructed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block_size;
pub mod compressor;
pub mod decompress;
pub mod error;
pub mod result;
pub mod similarity;
pub mod store;
pub mod trend;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Parallel compression of independent series
pub mod parallel;

// Re-export main types
pub use compressor::Compressor;
pub use config::CompressorConfig;
pub use decompress::{reconstruct, Reconstruction};
pub use error::{Error, Result};
pub use result::{CompressionResult, EncodedBlock};
pub use types::{Sample, TemplateId, TimeRange, Window};

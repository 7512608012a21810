//! Output of one compression run
//!
//! A [`CompressionResult`] is self-contained: it carries the data of every
//! template the encoded stream references, so it can be reconstructed or
//! persisted without the store that produced it.
//!
//! # Size Accounting
//!
//! | Quantity | Estimate |
//! |----------|----------|
//! | original | `samples * 8 * dimensions` |
//! | compressed | `Σ referenced (values * 8 + 4) + blocks * 12` |
//!
//! The ratio is a diagnostic estimate, not a measured on-disk size.

use crate::block_size::BlockSizeAdjustment;
use crate::error::Result;
use crate::store::StoreStats;
use crate::types::{TemplateId, TimeRange, Window};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bytes charged per encoded block (id, start, length)
pub const BLOCK_ENTRY_BYTES: usize = 12;

/// Bytes charged per stored template id
pub const TEMPLATE_ID_BYTES: usize = 4;

/// Reference from a range of the input to a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedBlock {
    /// Template the block was matched against or created from
    pub template_id: TemplateId,
    /// First sample index of the block
    pub start_index: usize,
    /// Number of samples in the block
    pub length: usize,
}

impl EncodedBlock {
    /// One past the last sample index
    pub fn end_index(&self) -> usize {
        self.start_index + self.length
    }
}

/// Per-dimension summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionStats {
    /// Whether the dimension took part in compression
    pub processed: bool,
    /// Weight used when aggregating similarity
    pub weight: f64,
    /// Number of present values in the input
    pub values: usize,
}

/// Everything produced by one compression run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionResult {
    /// Data of every referenced template, captured at first reference
    pub templates: BTreeMap<TemplateId, Window>,
    /// Blocks in input order, partitioning `[0, total_values)`
    pub encoded_stream: Vec<EncodedBlock>,
    /// Estimated original size over estimated compressed size
    pub compression_ratio: f64,
    /// `hits / blocks_processed`
    pub hit_ratio: f64,
    /// Mean CER of accepted matches
    pub avg_cer: f64,
    /// Mean similarity of accepted matches
    pub avg_similarity: f64,
    /// Weighted error/ratio cost, lower is better
    pub cost: f64,
    /// Length of each encoded block, a short final block included
    pub block_size_history: Vec<usize>,
    /// Windowed hit ratios
    pub continuous_hit_ratio: Vec<f64>,
    /// Every block size decision with its reason
    pub block_size_adjustments: Vec<BlockSizeAdjustment>,
    /// Per-dimension summary
    pub dimension_stats: BTreeMap<String, DimensionStats>,
    /// Dimensions compressed, in order
    pub dimensions: Vec<String>,
    /// Whether windows were per-dimension
    pub multi_dimensional: bool,
    /// Number of input samples
    pub total_values: usize,
    /// Number of encoded blocks
    pub blocks_processed: usize,
    /// Blocks that matched an existing template
    pub hits: usize,
    /// Distinct templates referenced
    pub templates_used: usize,
    /// Active templates when the run finished
    pub templates_total: usize,
    /// Template store lifecycle counters
    pub store_stats: StoreStats,
    /// Estimated uncompressed size in bytes
    pub estimated_original_size: usize,
    /// Estimated compressed size in bytes
    pub estimated_compressed_size: usize,
    /// Configured minimum block size
    pub min_block_size: usize,
    /// Configured maximum block size
    pub max_block_size: usize,
    /// Timestamps spanned by the input, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
}

impl CompressionResult {
    /// Result of a run that processed no blocks
    pub fn empty(
        total_values: usize,
        dimensions: Vec<String>,
        multi_dimensional: bool,
        min_block_size: usize,
        max_block_size: usize,
    ) -> Self {
        Self {
            templates: BTreeMap::new(),
            encoded_stream: Vec::new(),
            compression_ratio: 1.0,
            hit_ratio: 0.0,
            avg_cer: 0.0,
            avg_similarity: 0.0,
            cost: 0.0,
            block_size_history: Vec::new(),
            continuous_hit_ratio: Vec::new(),
            block_size_adjustments: Vec::new(),
            dimension_stats: BTreeMap::new(),
            dimensions,
            multi_dimensional,
            total_values,
            blocks_processed: 0,
            hits: 0,
            templates_used: 0,
            templates_total: 0,
            store_stats: StoreStats::default(),
            estimated_original_size: 0,
            estimated_compressed_size: 0,
            min_block_size,
            max_block_size,
            time_range: None,
        }
    }

    /// Attach the input time span
    pub fn with_time_range(mut self, time_range: Option<TimeRange>) -> Self {
        self.time_range = time_range;
        self
    }

    /// True when the stream covers `[0, total_values)` contiguously in order
    pub fn is_partition(&self) -> bool {
        let mut next = 0;
        for block in &self.encoded_stream {
            if block.start_index != next || block.length == 0 {
                return false;
            }
            next = block.end_index();
        }
        next == self.total_values || (self.encoded_stream.is_empty() && self.blocks_processed == 0)
    }

    /// Serialize to compact JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serialize to indented JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a result previously produced by [`to_json`](Self::to_json)
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Estimated compressed size of `templates` plus `blocks` stream entries
pub fn estimate_compressed_size(templates: &BTreeMap<TemplateId, Window>, blocks: usize) -> usize {
    let template_bytes: usize = templates
        .values()
        .map(|data| data.value_bytes() + TEMPLATE_ID_BYTES)
        .sum();
    template_bytes + blocks * BLOCK_ENTRY_BYTES
}

/// `w1 * min(1, cer / max_cer) - w2 * (1 - min(1, 1 / ratio))`
pub fn cost(avg_cer: f64, max_cer: f64, ratio: f64, w1: f64, w2: f64) -> f64 {
    let error_term = if max_cer > 0.0 {
        (avg_cer / max_cer).min(1.0)
    } else {
        0.0
    };
    let ratio_term = if ratio > 0.0 {
        1.0 - (1.0 / ratio).min(1.0)
    } else {
        0.0
    };
    w1 * error_term - w2 * ratio_term
}

//! Core data types used throughout the compressor
//!
//! # Key Types
//!
//! - **`Sample`**: A timestamped reading of several named dimensions
//! - **`Window`**: A contiguous run of values, flat or per-dimension
//! - **`SeriesColumns`**: Columnar view of an input sequence, sliced into windows
//! - **`TimeRange`**: Inclusive span of sample timestamps
//!
//! # Example
//!
//! ```rust
//! use tsdict::types::{Sample, SeriesColumns, Window};
//!
//! let samples: Vec<Sample> = (0..4)
//!     .map(|i| Sample::new(i * 1000).with_value("power", i as f64))
//!     .collect();
//!
//! let columns = SeriesColumns::from_samples(&samples);
//! let window = columns.flat_window("power", 1, 2);
//! assert_eq!(window, Window::Flat(vec![1.0, 2.0]));
//! ```

use crate::error::{CompressionError, Error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Identifier of a template, unique and increasing within one run
pub type TemplateId = u64;

/// Name reported for the implicit dimension of a flat window
pub const FLAT_DIMENSION: &str = "value";

// ============================================================================
// Sample
// ============================================================================

/// A single timestamped reading
///
/// Dimensions are kept ordered by name so that every derived structure
/// iterates them deterministically. Non-finite values are never stored; a
/// dimension without a usable value is simply absent from the sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Timestamp in milliseconds
    pub timestamp: i64,

    /// Dimension name to value
    pub values: BTreeMap<String, f64>,
}

impl Sample {
    /// Create an empty sample at `timestamp`
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }

    /// Builder variant of [`Sample::insert`]
    pub fn with_value(mut self, dimension: impl Into<String>, value: f64) -> Self {
        self.insert(dimension, value);
        self
    }

    /// Set a dimension value, returning false when the value is not finite
    pub fn insert(&mut self, dimension: impl Into<String>, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.values.insert(dimension.into(), value);
        true
    }

    /// Value of a dimension, if present
    pub fn get(&self, dimension: &str) -> Option<f64> {
        self.values.get(dimension).copied()
    }

    /// Parse a sample from a JSON object
    ///
    /// The optional `timestamp` field must be an integer (or an integer
    /// string). Every other field is a dimension whose value may be a number
    /// or a numeric string; malformed or non-finite fields are skipped and
    /// logged, never fatal.
    ///
    /// # Errors
    ///
    /// Returns `CompressionError::InvalidData` if `value` is not an object.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, Error> {
        let object = value.as_object().ok_or_else(|| {
            CompressionError::InvalidData(format!("sample must be a JSON object, got {}", value))
        })?;

        let timestamp = match object.get("timestamp") {
            None | Some(serde_json::Value::Null) => 0,
            Some(raw) => parse_timestamp(raw).ok_or_else(|| {
                CompressionError::InvalidData(format!("invalid timestamp {}", raw))
            })?,
        };

        let mut sample = Sample::new(timestamp);
        for (name, raw) in object {
            if name == "timestamp" || raw.is_null() {
                continue;
            }
            match parse_number(raw) {
                Some(v) if v.is_finite() => {
                    sample.values.insert(name.clone(), v);
                },
                _ => {
                    warn!(
                        dimension = %name,
                        value = %raw,
                        "Skipping malformed sample field"
                    );
                },
            }
        }
        Ok(sample)
    }
}

fn parse_number(raw: &serde_json::Value) -> Option<f64> {
    match raw {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn parse_timestamp(raw: &serde_json::Value) -> Option<i64> {
    match raw {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

// ============================================================================
// Window
// ============================================================================

/// A contiguous run of values
///
/// `Flat` holds one sequence and behaves as a single dimension of weight 1.0.
/// `Multi` holds one sequence per dimension name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Window {
    /// Single-dimension window
    Flat(Vec<f64>),
    /// Per-dimension window
    Multi(BTreeMap<String, Vec<f64>>),
}

impl Window {
    /// Longest sequence length in the window
    pub fn len(&self) -> usize {
        match self {
            Window::Flat(values) => values.len(),
            Window::Multi(dims) => dims.values().map(Vec::len).max().unwrap_or(0),
        }
    }

    /// True when the window holds no values at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of dimensions (1 for a flat window)
    pub fn dimension_count(&self) -> usize {
        match self {
            Window::Flat(_) => 1,
            Window::Multi(dims) => dims.len(),
        }
    }

    /// Iterate `(name, values)` pairs; a flat window yields [`FLAT_DIMENSION`]
    pub fn dimensions(&self) -> Box<dyn Iterator<Item = (&str, &[f64])> + '_> {
        match self {
            Window::Flat(values) => Box::new(std::iter::once((FLAT_DIMENSION, values.as_slice()))),
            Window::Multi(dims) => {
                Box::new(dims.iter().map(|(name, values)| (name.as_str(), values.as_slice())))
            },
        }
    }

    /// Values of a named dimension
    ///
    /// A flat window answers for any name.
    pub fn dimension(&self, name: &str) -> Option<&[f64]> {
        match self {
            Window::Flat(values) => Some(values),
            Window::Multi(dims) => dims.get(name).map(Vec::as_slice),
        }
    }

    /// Sequence used for trend tracking and cheap prefiltering
    ///
    /// Falls back to the first dimension when `primary` is absent.
    pub fn primary(&self, primary: &str) -> Option<&[f64]> {
        match self {
            Window::Flat(values) => Some(values),
            Window::Multi(dims) => dims
                .get(primary)
                .or_else(|| dims.values().next())
                .map(Vec::as_slice),
        }
    }

    /// Length used for the minimum-size check
    ///
    /// The primary dimension when present, otherwise the longest dimension.
    pub fn check_len(&self, primary: &str) -> usize {
        match self {
            Window::Flat(values) => values.len(),
            Window::Multi(dims) => dims.get(primary).map(Vec::len).unwrap_or_else(|| self.len()),
        }
    }

    /// Estimated storage footprint of the values (8 bytes per value)
    pub fn value_bytes(&self) -> usize {
        self.dimensions().map(|(_, values)| values.len() * 8).sum()
    }
}

// ============================================================================
// Columnar input
// ============================================================================

/// Columnar view of an ordered sample sequence
///
/// Each dimension is a column with one slot per sample; slots are `None`
/// where a sample did not carry that dimension.
#[derive(Debug, Clone, Default)]
pub struct SeriesColumns {
    timestamps: Option<Vec<i64>>,
    len: usize,
    columns: BTreeMap<String, Vec<Option<f64>>>,
}

impl SeriesColumns {
    /// Build columns from samples; the dimension set is the union of keys
    pub fn from_samples(samples: &[Sample]) -> Self {
        let mut columns: BTreeMap<String, Vec<Option<f64>>> = BTreeMap::new();
        for (index, sample) in samples.iter().enumerate() {
            for (name, value) in &sample.values {
                if !value.is_finite() {
                    warn!(dimension = %name, index, "Skipping non-finite sample value");
                    continue;
                }
                let column = columns
                    .entry(name.clone())
                    .or_insert_with(|| vec![None; samples.len()]);
                column[index] = Some(*value);
            }
        }

        Self {
            timestamps: Some(samples.iter().map(|s| s.timestamp).collect()),
            len: samples.len(),
            columns,
        }
    }

    /// Build a single column from raw values
    pub fn from_values(dimension: &str, values: &[f64]) -> Self {
        let column = values
            .iter()
            .map(|v| if v.is_finite() { Some(*v) } else { None })
            .collect();
        let mut columns = BTreeMap::new();
        if !values.is_empty() {
            columns.insert(dimension.to_string(), column);
        }
        Self {
            timestamps: None,
            len: values.len(),
            columns,
        }
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when there are no samples
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Dimension names in order
    pub fn dimensions(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    /// Raw column of a dimension
    pub fn column(&self, dimension: &str) -> Option<&[Option<f64>]> {
        self.columns.get(dimension).map(Vec::as_slice)
    }

    /// Dimension compressed in single-dimension mode
    ///
    /// `primary` if present, else the only dimension, else the first by name.
    pub fn flat_dimension(&self, primary: &str) -> Option<&str> {
        if let Some((name, _)) = self.columns.get_key_value(primary) {
            return Some(name.as_str());
        }
        self.columns.keys().next().map(String::as_str)
    }

    /// Timestamps spanned by the samples, when known
    pub fn time_range(&self) -> Option<TimeRange> {
        let timestamps = self.timestamps.as_ref()?;
        let start = timestamps.iter().min()?;
        let end = timestamps.iter().max()?;
        Some(TimeRange::new_unchecked(*start, *end))
    }

    /// Flat window of the present values of `dimension` in `[start, start + len)`
    pub fn flat_window(&self, dimension: &str, start: usize, len: usize) -> Window {
        let values = self
            .columns
            .get(dimension)
            .map(|column| present(column, start, len))
            .unwrap_or_default();
        Window::Flat(values)
    }

    /// Per-dimension window over `[start, start + len)`
    ///
    /// Dimensions with no present value in the range are left out.
    pub fn multi_window(&self, start: usize, len: usize) -> Window {
        let dims = self
            .columns
            .iter()
            .filter_map(|(name, column)| {
                let values = present(column, start, len);
                (!values.is_empty()).then(|| (name.clone(), values))
            })
            .collect();
        Window::Multi(dims)
    }
}

fn present(column: &[Option<f64>], start: usize, len: usize) -> Vec<f64> {
    let begin = start.min(column.len());
    let end = start.saturating_add(len).min(column.len());
    column[begin..end].iter().flatten().copied().collect()
}

// ============================================================================
// TimeRange
// ============================================================================

/// Inclusive range of timestamps in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: i64,

    /// End timestamp (inclusive)
    pub end: i64,
}

impl TimeRange {
    /// Create a range, rejecting `start > end`
    pub fn new(start: i64, end: i64) -> Result<Self, Error> {
        if start > end {
            return Err(CompressionError::InvalidData(format!(
                "Invalid time range: start {} > end {}",
                start, end
            ))
            .into());
        }
        Ok(Self { start, end })
    }

    /// Create a range without checking the bounds
    pub fn new_unchecked(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Check if a timestamp falls within this range (inclusive)
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    /// Duration in milliseconds, `None` on overflow
    pub fn duration_ms(&self) -> Option<i64> {
        self.end.checked_sub(self.start)
    }
}

//! Similarity scoring between two windows
//!
//! The engine is stateless. Every metric is computed per dimension over the
//! common prefix of the two sequences and then weight-averaged across the
//! dimensions present on both sides:
//!
//! | Metric      | Per dimension                                             |
//! |-------------|-----------------------------------------------------------|
//! | KS p-value  | two-sample Kolmogorov-Smirnov test on raw values          |
//! | Correlation | absolute Pearson coefficient (0 when degenerate)          |
//! | CER         | mean `|a - b| / |a|` over nonzero `a`                     |
//! | Shape       | `max(0, 1 - mean|z(a) - z(b)| / 3)`                       |
//! | Trend       | share of first differences of `z(a)`, `z(b)` with equal sign |
//!
//! The composite score is the weighted sum of
//! `min(1, p / p_threshold)`, correlation, `1 - min(1, cer / max_cer)`,
//! shape and trend.
//!
//! # Example
//!
//! ```rust
//! use tsdict::config::CompressorConfig;
//! use tsdict::similarity::SimilarityEngine;
//! use tsdict::types::Window;
//!
//! let engine = SimilarityEngine::from_config(&CompressorConfig::default());
//! let wave: Vec<f64> = (0..50).map(|i| 10.0 + (i as f64 / 8.0).sin()).collect();
//! let verdict = engine.is_similar(&Window::Flat(wave.clone()), &Window::Flat(wave));
//! assert!(verdict.similar);
//! ```

pub mod stats;

use crate::config::{CompressorConfig, SimilarityWeights};
use crate::types::{Window, FLAT_DIMENSION};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Base acceptance threshold for the composite score
const BASE_THRESHOLD: f64 = 0.35;

/// Threshold used when the windows are strongly correlated
const CORRELATED_THRESHOLD: f64 = 0.45;

/// Correlation above which the stricter threshold applies
const STRONG_CORRELATION: f64 = 0.8;

/// Threshold scale for windows with more than two processed dimensions
const MULTI_DIMENSION_RELIEF: f64 = 0.9;

/// Metrics of one dimension
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DimensionSimilarity {
    /// KS test p-value
    pub ks_pvalue: f64,
    /// Absolute Pearson correlation
    pub correlation: f64,
    /// Mean relative error, `None` when the reference has no nonzero value
    pub cer: Option<f64>,
    /// Z-normalized shape similarity
    pub shape_similarity: f64,
    /// Gradient sign agreement
    pub trend_similarity: f64,
    /// Weight applied to this dimension
    pub weight: f64,
}

/// Aggregated similarity between two windows
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SimilarityReport {
    /// Composite score
    pub score: f64,
    /// Weighted KS p-value
    pub ks_pvalue: f64,
    /// Weighted absolute correlation
    pub correlation: f64,
    /// Weighted compression error rate
    pub cer: f64,
    /// Weighted shape similarity
    pub shape_similarity: f64,
    /// Weighted trend similarity
    pub trend_similarity: f64,
    /// Number of dimensions that contributed
    pub dimensions_processed: usize,
    /// Per-dimension breakdown
    pub per_dimension: BTreeMap<String, DimensionSimilarity>,
}

/// Outcome of [`SimilarityEngine::is_similar`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Verdict {
    /// Whether the windows are interchangeable
    pub similar: bool,
    /// Threshold the score was compared against
    pub threshold: f64,
    /// Metrics behind the decision
    pub report: SimilarityReport,
}

/// Stateless similarity scorer
#[derive(Debug, Clone)]
pub struct SimilarityEngine {
    p_threshold: f64,
    max_acceptable_cer: f64,
    min_values: usize,
    weights: SimilarityWeights,
    dimension_weights: HashMap<String, f64>,
    primary_dimension: String,
}

impl SimilarityEngine {
    /// Build an engine from the similarity and dimension sections
    pub fn from_config(config: &CompressorConfig) -> Self {
        Self {
            p_threshold: config.similarity.p_threshold,
            max_acceptable_cer: config.similarity.max_acceptable_cer,
            min_values: config.similarity.min_values,
            weights: config.similarity.enhanced_similarity_weights,
            dimension_weights: config.dimensions.dimension_weights.clone(),
            primary_dimension: config.dimensions.primary_dimension.clone(),
        }
    }

    /// Override the composite weights
    pub fn with_weights(mut self, weights: SimilarityWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Maximum CER a match may have
    pub fn max_acceptable_cer(&self) -> f64 {
        self.max_acceptable_cer
    }

    /// Full similarity report for `original` against `reference`
    ///
    /// CER is measured relative to `original`; every other metric is
    /// symmetric in its arguments.
    pub fn similarity(&self, original: &Window, reference: &Window) -> SimilarityReport {
        let mut report = SimilarityReport::default();
        let mut total_weight = 0.0;
        let mut cer_weight = 0.0;
        let mut ks = 0.0;
        let mut correlation = 0.0;
        let mut cer = 0.0;
        let mut shape = 0.0;
        let mut trend = 0.0;

        for (name, a, b, weight) in self.paired(original, reference) {
            let metrics = dimension_metrics(a, b, weight);
            ks += metrics.ks_pvalue * weight;
            correlation += metrics.correlation * weight;
            shape += metrics.shape_similarity * weight;
            trend += metrics.trend_similarity * weight;
            if let Some(value) = metrics.cer {
                cer += value * weight;
                cer_weight += weight;
            }
            total_weight += weight;
            report.per_dimension.insert(name.to_string(), metrics);
        }

        report.dimensions_processed = report.per_dimension.len();
        if total_weight <= 0.0 {
            return report;
        }

        report.ks_pvalue = ks / total_weight;
        report.correlation = correlation / total_weight;
        report.shape_similarity = shape / total_weight;
        report.trend_similarity = trend / total_weight;
        report.cer = if cer_weight > 0.0 { cer / cer_weight } else { 0.0 };

        let w = &self.weights;
        report.score = w.ks_test * (report.ks_pvalue / self.p_threshold).min(1.0)
            + w.correlation * report.correlation
            + w.cer * (1.0 - (report.cer / self.max_acceptable_cer).min(1.0))
            + w.shape * report.shape_similarity
            + w.trend * report.trend_similarity;
        report
    }

    /// Decide whether `original` can be represented by `reference`
    ///
    /// Windows shorter than `min_values` are never similar.
    pub fn is_similar(&self, original: &Window, reference: &Window) -> Verdict {
        let primary = self.primary_dimension.as_str();
        if original.check_len(primary) < self.min_values
            || reference.check_len(primary) < self.min_values
        {
            return Verdict::default();
        }

        let report = self.similarity(original, reference);
        if report.dimensions_processed == 0 {
            return Verdict {
                report,
                ..Verdict::default()
            };
        }

        let mut threshold = if report.correlation > STRONG_CORRELATION {
            CORRELATED_THRESHOLD
        } else {
            BASE_THRESHOLD
        };
        if matches!(original, Window::Multi(_)) && report.dimensions_processed > 2 {
            threshold *= MULTI_DIMENSION_RELIEF;
        }

        let pattern_match = report.shape_similarity > 0.8 && report.correlation > 0.9;
        let similar = (report.score > threshold || pattern_match)
            && report.cer < self.max_acceptable_cer;

        Verdict {
            similar,
            threshold,
            report,
        }
    }

    fn weight(&self, dimension: &str) -> f64 {
        self.dimension_weights.get(dimension).copied().unwrap_or(1.0)
    }

    /// Dimensions present on both sides with a positive weight, truncated
    /// to their common length
    fn paired<'a>(
        &self,
        a: &'a Window,
        b: &'a Window,
    ) -> Vec<(&'a str, &'a [f64], &'a [f64], f64)> {
        let truncate = |x: &'a [f64], y: &'a [f64]| {
            let n = x.len().min(y.len());
            (&x[..n], &y[..n])
        };

        match (a, b) {
            (Window::Flat(x), Window::Flat(y)) => {
                let (x, y) = truncate(x.as_slice(), y.as_slice());
                if x.is_empty() {
                    Vec::new()
                } else {
                    vec![(FLAT_DIMENSION, x, y, 1.0)]
                }
            },
            (Window::Multi(left), Window::Multi(right)) => left
                .iter()
                .filter_map(|(name, x)| {
                    let y = right.get(name)?;
                    let weight = self.weight(name);
                    let (x, y) = truncate(x.as_slice(), y.as_slice());
                    (weight > 0.0 && !x.is_empty()).then_some((name.as_str(), x, y, weight))
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Mean relative error over the nonzero entries of `original`
///
/// Returns `None` when `original` has no nonzero entry in the common prefix.
pub fn cer(original: &[f64], reference: &[f64]) -> Option<f64> {
    let mut total = 0.0;
    let mut count = 0usize;
    for (&x, &y) in original.iter().zip(reference) {
        if x != 0.0 {
            total += (x - y).abs() / x.abs();
            count += 1;
        }
    }
    (count > 0).then(|| total / count as f64)
}

fn dimension_metrics(a: &[f64], b: &[f64], weight: f64) -> DimensionSimilarity {
    let ks = stats::ks_2samp(a, b);
    let a_norm = stats::z_normalize(a);
    let b_norm = stats::z_normalize(b);

    let shape_diff = stats::mean(
        &a_norm
            .iter()
            .zip(&b_norm)
            .map(|(x, y)| (x - y).abs())
            .collect::<Vec<_>>(),
    );
    let shape_similarity = (1.0 - (shape_diff / 3.0).min(1.0)).max(0.0);

    let grad_a = stats::first_differences(&a_norm);
    let grad_b = stats::first_differences(&b_norm);
    let trend_similarity = if grad_a.is_empty() {
        0.0
    } else {
        let agreeing = grad_a.iter().zip(&grad_b).filter(|(x, y)| *x * *y > 0.0).count();
        agreeing as f64 / grad_a.len() as f64
    };

    DimensionSimilarity {
        ks_pvalue: ks.pvalue,
        correlation: stats::pearson(a, b).abs(),
        cer: cer(a, b),
        shape_similarity,
        trend_similarity,
        weight,
    }
}

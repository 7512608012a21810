//! Configuration for the template compressor
//!
//! All options carry defaults so a partial TOML document (or none at all)
//! yields a usable configuration. Options are grouped into sections that
//! mirror the engine components:
//!
//! ```toml
//! [similarity]
//! p_threshold = 0.1
//! max_acceptable_cer = 0.15
//!
//! [blocks]
//! block_size = 10
//! max_block_size = 120
//!
//! [templates]
//! max_templates = 200
//!
//! [dimensions]
//! multi_dimensional = true
//! primary_dimension = "power"
//! ```

use crate::error::{Error, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CompressorConfig {
    /// Similarity scoring
    #[serde(default)]
    pub similarity: SimilarityConfig,

    /// Block size control
    #[serde(default)]
    pub blocks: BlockSizeConfig,

    /// Template store lifecycle
    #[serde(default)]
    pub templates: TemplateConfig,

    /// Trend detection
    #[serde(default)]
    pub trend: TrendConfig,

    /// Multi-dimensional handling
    #[serde(default)]
    pub dimensions: DimensionConfig,

    /// Cost function weights
    #[serde(default)]
    pub cost: CostConfig,
}

/// Weights of the five enhanced similarity metrics
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct SimilarityWeights {
    /// Kolmogorov-Smirnov p-value term
    #[serde(default = "default_ks_weight")]
    pub ks_test: f64,
    /// Absolute Pearson correlation term
    #[serde(default = "default_correlation_weight")]
    pub correlation: f64,
    /// Inverted, normalized CER term
    #[serde(default = "default_cer_weight")]
    pub cer: f64,
    /// Z-normalized shape term
    #[serde(default = "default_shape_weight")]
    pub shape: f64,
    /// Gradient sign agreement term
    #[serde(default = "default_trend_weight")]
    pub trend: f64,
}

/// Weights of the basic three-metric similarity
///
/// Recognised for compatibility with existing configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BasicSimilarityWeights {
    /// Kolmogorov-Smirnov p-value term
    #[serde(default = "default_basic_ks_weight")]
    pub ks_test: f64,
    /// Pearson correlation term
    #[serde(default = "default_basic_correlation_weight")]
    pub correlation: f64,
    /// CER term
    #[serde(default = "default_basic_cer_weight")]
    pub cer: f64,
}

/// Similarity engine configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SimilarityConfig {
    /// p-value at which the KS term saturates
    #[serde(default = "default_p_threshold")]
    pub p_threshold: f64,

    /// Minimum window length considered for matching
    #[serde(default = "default_min_values")]
    pub min_values: usize,

    /// Maximum mean relative error a match may have
    #[serde(default = "default_max_acceptable_cer")]
    pub max_acceptable_cer: f64,

    /// Pearson correlation threshold (compatibility option)
    #[serde(default = "default_correlation_threshold")]
    pub correlation_threshold: f64,

    /// Basic metric weights (compatibility option)
    #[serde(default)]
    pub similarity_weights: BasicSimilarityWeights,

    /// Weights used for the composite score
    #[serde(default)]
    pub enhanced_similarity_weights: SimilarityWeights,
}

/// Block size controller configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BlockSizeConfig {
    /// Initial block size
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Smallest block size the controller may choose
    #[serde(default = "default_min_block_size")]
    pub min_block_size: usize,

    /// Largest block size the controller may choose
    #[serde(default = "default_max_block_size")]
    pub max_block_size: usize,

    /// Enable the adaptive controller
    #[serde(default = "default_true")]
    pub adaptive_block_size: bool,

    /// Blocks processed before the first adjustment is considered
    #[serde(default = "default_min_blocks_before_adjustment")]
    pub min_blocks_before_adjustment: usize,

    /// Minimum number of blocks between two adjustments
    #[serde(default = "default_min_adjustment_interval")]
    pub min_adjustment_interval: usize,

    /// Number of blocks per windowed hit-ratio observation
    #[serde(default = "default_hit_ratio_window")]
    pub hit_ratio_window: usize,
}

/// Template importance weights
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ImportanceWeights {
    /// Normalized usage count weight
    #[serde(default = "default_usage_importance")]
    pub usage_count: f64,
    /// Normalized recency weight
    #[serde(default = "default_recency_importance")]
    pub recency: f64,
    /// Normalized age weight
    #[serde(default = "default_age_importance")]
    pub age: f64,
}

/// Template store configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TemplateConfig {
    /// Maximum number of active templates
    #[serde(default = "default_max_templates")]
    pub max_templates: usize,

    /// Blocks a template may stay unused before it becomes an eviction candidate
    #[serde(default = "default_template_expiration")]
    pub template_expiration: u64,

    /// Usage count at or below which an old template may be evicted
    #[serde(default = "default_usage_threshold", alias = "template_usage_threshold")]
    pub usage_threshold: u64,

    /// Age in blocks after which a rarely used template may be evicted
    #[serde(default = "default_max_template_age")]
    pub max_template_age: u64,

    /// Similarity above which two templates are merged
    #[serde(default = "default_template_merge_threshold")]
    pub template_merge_threshold: f64,

    /// Enable the periodic merge pass
    #[serde(default = "default_true")]
    pub enable_template_merging: bool,

    /// Blocks between two merge passes
    #[serde(default = "default_merge_interval", alias = "template_merge_interval")]
    pub merge_interval: u64,

    /// Importance weights used for eviction ranking
    #[serde(default, alias = "template_importance_weight")]
    pub importance_weights: ImportanceWeights,

    /// Fraction of active templates removed per cleanup pass
    #[serde(default = "default_max_templates_to_remove")]
    pub max_templates_to_remove: f64,

    /// Maximum number of archived templates
    #[serde(default = "default_archive_capacity")]
    pub archive_capacity: usize,

    /// Blocks after which an archived template is dropped
    #[serde(default = "default_archive_expiration")]
    pub archive_expiration: u64,
}

/// Trend detector configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TrendConfig {
    /// Number of recent block means kept for regression
    #[serde(default = "default_trend_detection_window")]
    pub trend_detection_window: usize,

    /// |r| above which a trend is reported
    #[serde(default = "default_trend_threshold")]
    pub trend_threshold: f64,
}

/// Dimension handling configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DimensionConfig {
    /// Treat samples as multi-dimensional windows
    #[serde(default)]
    pub multi_dimensional: bool,

    /// Dimension used for trend detection and prefiltering
    #[serde(default = "default_primary_dimension")]
    pub primary_dimension: String,

    /// Per-dimension weights (missing dimensions weigh 1.0)
    #[serde(default)]
    pub dimension_weights: HashMap<String, f64>,
}

/// Cost function configuration
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct CostConfig {
    /// Weight of the normalized error term
    #[serde(default = "default_w1")]
    pub w1: f64,

    /// Weight of the compression ratio term
    #[serde(default = "default_w2")]
    pub w2: f64,
}

// Default value functions
fn default_p_threshold() -> f64 { 0.1 }
fn default_min_values() -> usize { 10 }
fn default_max_acceptable_cer() -> f64 { 0.15 }
fn default_correlation_threshold() -> f64 { 0.6 }
fn default_ks_weight() -> f64 { 0.15 }
fn default_correlation_weight() -> f64 { 0.25 }
fn default_cer_weight() -> f64 { 0.15 }
fn default_shape_weight() -> f64 { 0.25 }
fn default_trend_weight() -> f64 { 0.20 }
fn default_basic_ks_weight() -> f64 { 0.2 }
fn default_basic_correlation_weight() -> f64 { 0.5 }
fn default_basic_cer_weight() -> f64 { 0.3 }
fn default_block_size() -> usize { 10 }
fn default_min_block_size() -> usize { 10 }
fn default_max_block_size() -> usize { 120 }
fn default_min_blocks_before_adjustment() -> usize { 5 }
fn default_min_adjustment_interval() -> usize { 3 }
fn default_hit_ratio_window() -> usize { 10 }
fn default_max_templates() -> usize { 200 }
fn default_template_expiration() -> u64 { 300 }
fn default_usage_threshold() -> u64 { 1 }
fn default_max_template_age() -> u64 { 150 }
fn default_template_merge_threshold() -> f64 { 0.9 }
fn default_merge_interval() -> u64 { 20 }
fn default_usage_importance() -> f64 { 0.5 }
fn default_recency_importance() -> f64 { 0.3 }
fn default_age_importance() -> f64 { 0.2 }
fn default_max_templates_to_remove() -> f64 { 0.05 }
fn default_archive_capacity() -> usize { 200 }
fn default_archive_expiration() -> u64 { 300 }
fn default_trend_detection_window() -> usize { 5 }
fn default_trend_threshold() -> f64 { 0.7 }
fn default_primary_dimension() -> String { "power".to_string() }
fn default_w1() -> f64 { 0.6 }
fn default_w2() -> f64 { 0.4 }
fn default_true() -> bool { true }

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            ks_test: default_ks_weight(),
            correlation: default_correlation_weight(),
            cer: default_cer_weight(),
            shape: default_shape_weight(),
            trend: default_trend_weight(),
        }
    }
}

impl SimilarityWeights {
    /// Sum of all weights
    pub fn total(&self) -> f64 {
        self.ks_test + self.correlation + self.cer + self.shape + self.trend
    }
}

impl Default for BasicSimilarityWeights {
    fn default() -> Self {
        Self {
            ks_test: default_basic_ks_weight(),
            correlation: default_basic_correlation_weight(),
            cer: default_basic_cer_weight(),
        }
    }
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            p_threshold: default_p_threshold(),
            min_values: default_min_values(),
            max_acceptable_cer: default_max_acceptable_cer(),
            correlation_threshold: default_correlation_threshold(),
            similarity_weights: BasicSimilarityWeights::default(),
            enhanced_similarity_weights: SimilarityWeights::default(),
        }
    }
}

impl Default for BlockSizeConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            min_block_size: default_min_block_size(),
            max_block_size: default_max_block_size(),
            adaptive_block_size: true,
            min_blocks_before_adjustment: default_min_blocks_before_adjustment(),
            min_adjustment_interval: default_min_adjustment_interval(),
            hit_ratio_window: default_hit_ratio_window(),
        }
    }
}

impl Default for ImportanceWeights {
    fn default() -> Self {
        Self {
            usage_count: default_usage_importance(),
            recency: default_recency_importance(),
            age: default_age_importance(),
        }
    }
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            max_templates: default_max_templates(),
            template_expiration: default_template_expiration(),
            usage_threshold: default_usage_threshold(),
            max_template_age: default_max_template_age(),
            template_merge_threshold: default_template_merge_threshold(),
            enable_template_merging: true,
            merge_interval: default_merge_interval(),
            importance_weights: ImportanceWeights::default(),
            max_templates_to_remove: default_max_templates_to_remove(),
            archive_capacity: default_archive_capacity(),
            archive_expiration: default_archive_expiration(),
        }
    }
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            trend_detection_window: default_trend_detection_window(),
            trend_threshold: default_trend_threshold(),
        }
    }
}

impl Default for DimensionConfig {
    fn default() -> Self {
        Self {
            multi_dimensional: false,
            primary_dimension: default_primary_dimension(),
            dimension_weights: HashMap::new(),
        }
    }
}

impl DimensionConfig {
    /// Weight of a dimension, 1.0 unless configured
    pub fn weight(&self, dimension: &str) -> f64 {
        self.dimension_weights.get(dimension).copied().unwrap_or(1.0)
    }
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            w1: default_w1(),
            w2: default_w2(),
        }
    }
}

impl CompressorConfig {
    /// Parse configuration from a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            Error::Configuration(msg) => {
                Error::Configuration(format!("{} ({})", msg, path.display()))
            },
            other => other,
        })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        let blocks = &self.blocks;
        if blocks.min_block_size == 0 {
            return Err(ValidationError::out_of_range(
                "blocks.min_block_size",
                0,
                1,
                blocks.max_block_size,
            ));
        }
        if blocks.max_block_size < blocks.min_block_size {
            return Err(ValidationError::out_of_range(
                "blocks.max_block_size",
                blocks.max_block_size,
                blocks.min_block_size,
                usize::MAX,
            ));
        }
        if blocks.block_size < blocks.min_block_size || blocks.block_size > blocks.max_block_size {
            return Err(ValidationError::out_of_range(
                "blocks.block_size",
                blocks.block_size,
                blocks.min_block_size,
                blocks.max_block_size,
            ));
        }
        if blocks.hit_ratio_window == 0 {
            return Err(ValidationError::out_of_range(
                "blocks.hit_ratio_window",
                0,
                1,
                usize::MAX,
            ));
        }

        let similarity = &self.similarity;
        check_unit("similarity.p_threshold", similarity.p_threshold, false)?;
        check_positive("similarity.max_acceptable_cer", similarity.max_acceptable_cer)?;
        check_unit("similarity.correlation_threshold", similarity.correlation_threshold, true)?;
        let w = &similarity.enhanced_similarity_weights;
        check_weights(
            "similarity.enhanced_similarity_weights",
            &[w.ks_test, w.correlation, w.cer, w.shape, w.trend],
        )?;
        let b = &similarity.similarity_weights;
        check_weights(
            "similarity.similarity_weights",
            &[b.ks_test, b.correlation, b.cer],
        )?;

        let templates = &self.templates;
        if templates.max_templates == 0 {
            return Err(ValidationError::out_of_range(
                "templates.max_templates",
                0,
                1,
                usize::MAX,
            ));
        }
        check_unit(
            "templates.template_merge_threshold",
            templates.template_merge_threshold,
            true,
        )?;
        check_unit(
            "templates.max_templates_to_remove",
            templates.max_templates_to_remove,
            false,
        )?;
        let iw = &templates.importance_weights;
        check_weights(
            "templates.importance_weights",
            &[iw.usage_count, iw.recency, iw.age],
        )?;

        if self.trend.trend_detection_window < 3 {
            return Err(ValidationError::out_of_range(
                "trend.trend_detection_window",
                self.trend.trend_detection_window,
                3,
                usize::MAX,
            ));
        }
        check_unit("trend.trend_threshold", self.trend.trend_threshold, true)?;

        if self.dimensions.primary_dimension.is_empty() {
            return Err(ValidationError::MissingField(
                "dimensions.primary_dimension".to_string(),
            ));
        }
        for (dimension, weight) in &self.dimensions.dimension_weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ValidationError::InvalidFormat {
                    field: format!("dimensions.dimension_weights.{}", dimension),
                    message: format!("weight must be a non-negative number, got {}", weight),
                });
            }
        }

        check_weights("cost", &[self.cost.w1, self.cost.w2])?;
        Ok(())
    }
}

/// Check a value lies in `[0, 1]` (or `(0, 1]` when zero is not allowed)
fn check_unit(field: &str, value: f64, allow_zero: bool) -> Result<(), ValidationError> {
    let lower_ok = if allow_zero { value >= 0.0 } else { value > 0.0 };
    if !value.is_finite() || !lower_ok || value > 1.0 {
        let min = if allow_zero { "0" } else { "0 (exclusive)" };
        return Err(ValidationError::out_of_range(field, value, min, 1.0));
    }
    Ok(())
}

fn check_positive(field: &str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ValidationError::out_of_range(field, value, "0 (exclusive)", f64::MAX));
    }
    Ok(())
}

fn check_weights(field: &str, weights: &[f64]) -> Result<(), ValidationError> {
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "weights must be non-negative numbers".to_string(),
        });
    }
    if weights.iter().sum::<f64>() <= 0.0 {
        return Err(ValidationError::Failed(format!("{} must not all be zero", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CompressorConfig::default();
        assert_eq!(config.similarity.p_threshold, 0.1);
        assert_eq!(config.templates.max_templates, 200);
        assert_eq!(config.blocks.block_size, 10);
        assert_eq!(config.blocks.max_block_size, 120);
        assert!(config.blocks.adaptive_block_size);
        assert_eq!(config.dimensions.primary_dimension, "power");
        assert!((config.similarity.enhanced_similarity_weights.total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_config_validation() {
        let config = CompressorConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_block_bounds() {
        let mut config = CompressorConfig::default();
        config.blocks.block_size = 200;
        assert!(config.validate().is_err());

        let mut config = CompressorConfig::default();
        config.blocks.min_block_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_weights() {
        let mut config = CompressorConfig::default();
        config.similarity.enhanced_similarity_weights.shape = -0.1;
        assert!(config.validate().is_err());

        let mut config = CompressorConfig::default();
        config.dimensions.dimension_weights.insert("power".to_string(), f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = CompressorConfig::from_toml_str(
            r#"
            [templates]
            max_templates = 50

            [dimensions]
            multi_dimensional = true
            primary_dimension = "temperature"
            "#,
        )
        .unwrap();

        assert_eq!(config.templates.max_templates, 50);
        assert_eq!(config.templates.merge_interval, 20);
        assert!(config.dimensions.multi_dimensional);
        assert_eq!(config.dimensions.primary_dimension, "temperature");
        assert_eq!(config.similarity.min_values, 10);
    }

    #[test]
    fn test_legacy_option_names() {
        let config = CompressorConfig::from_toml_str(
            r#"
            [templates]
            template_usage_threshold = 2
            template_merge_interval = 40

            [templates.template_importance_weight]
            usage_count = 0.6
            recency = 0.2
            age = 0.2
            "#,
        )
        .unwrap();

        assert_eq!(config.templates.usage_threshold, 2);
        assert_eq!(config.templates.merge_interval, 40);
        assert_eq!(config.templates.importance_weights.usage_count, 0.6);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let result = CompressorConfig::from_toml_str("[blocks]\nblock_size = 5\n");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tsdict.toml");

        let mut config = CompressorConfig::default();
        config.trend.trend_threshold = 0.8;
        config.dimensions.dimension_weights.insert("humidity".to_string(), 0.5);
        config.save_to_file(&path).unwrap();

        let loaded = CompressorConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.dimensions.weight("humidity"), 0.5);
        assert_eq!(loaded.dimensions.weight("pressure"), 1.0);
    }
}

//! Adaptive block size controller
//!
//! The controller observes the outcome of every encoded block and, at a
//! bounded rate, picks the length of the next analysis window.
//!
//! # Decision Pipeline
//!
//! ```text
//! gate:      blocks >= min_blocks_before_adjustment
//!            blocks - last_adjustment >= interval (halved on a similarity drop)
//!    │
//!    ▼
//! propose:   1. parabola through (size, hit ratio) history, vertex capped at ±15%
//!            2. weighted increase/decrease scores (hit ratio 0.4, similarity 0.5,
//!               trend 0.1) with tie-break on trend signs
//!    │
//!    ▼
//! accept:    |proposal - current| > max(1, 3% of current) or special condition
//!    │
//!    ▼
//! override:  at max with declining metrics → cut 20%
//!            at min → grow 30% to 100%
//!            early phase → bias towards growth
//! ```
//!
//! Every considered adjustment is recorded with its reason.

pub mod polynomial;

use crate::config::BlockSizeConfig;
use crate::similarity::stats;
use crate::trend::TrendSignal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Number of recent matches used for similarity and CER averages
const RECENT_MATCHES: usize = 5;

/// Largest single polynomial step as a fraction of the current size
const POLYNOMIAL_MAX_STEP: f64 = 0.15;

/// Weight of the hit-ratio signal in the heuristic scores
const HIT_RATIO_WEIGHT: f64 = 0.4;

/// Weight of the similarity signal in the heuristic scores
const SIMILARITY_WEIGHT: f64 = 0.5;

/// Weight of the trend signal in the heuristic scores
const TREND_WEIGHT: f64 = 0.1;

/// Why the controller chose a size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    /// Vertex of the fitted hit-ratio parabola
    PolynomialOptimization,
    /// Increase score clearly ahead
    FasterIncreaseByWeightedScore,
    /// Decrease score clearly ahead
    FastDecreaseByWeightedScore,
    /// Scores tied, metrics improving
    StrongerIncreaseByTrend,
    /// Scores tied, metrics declining
    ModerateDecreaseByTrend,
    /// Scores tied, metrics stable and good
    ModerateIncreaseForStableGoodMetrics,
    /// Nothing to change
    StablePerformance,
    /// At the maximum size while metrics decline
    ReduceFromMaxDueToDecliningMetrics,
    /// At the minimum size with good metrics
    AggressiveIncreaseFromMin,
    /// At the minimum size with improving metrics
    StrongerIncreaseFromMin,
    /// At the minimum size otherwise
    DefaultIncreaseFromMin,
    /// Early phase with good similarity
    EarlyStageAggressiveIncrease,
    /// Early phase with acceptable hit ratio
    EarlyStageDefaultIncrease,
}

/// Diagnostic record of one considered adjustment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSizeAdjustment {
    /// Blocks processed when the adjustment was considered
    pub block_number: usize,
    /// Size before the decision
    pub old_size: usize,
    /// Size proposed by the strategy, before acceptance and overrides
    pub proposed_size: usize,
    /// Size after the decision
    pub new_size: usize,
    /// Whether the proposal passed the rejection window
    pub applied: bool,
    /// Reason for the final size
    pub reason: AdjustmentReason,
    /// Cumulative hit ratio
    pub hit_ratio: f64,
    /// Most recent windowed hit ratio
    pub window_hit_ratio: f64,
    /// Change of the windowed hit ratio over the last three windows
    pub hit_ratio_trend: f64,
    /// Mean CER of the last matches
    pub recent_cer: f64,
    /// Mean similarity of the last matches
    pub recent_similarity: f64,
    /// Similarity change across the last matches
    pub similarity_trend: f64,
    /// Trend observed when deciding
    pub trend: TrendSignal,
}

/// Signals the decision is based on
#[derive(Debug, Clone, Copy)]
struct Signals {
    hit_ratio: f64,
    recent_hit_ratio: f64,
    hit_ratio_trend: f64,
    recent_cer: f64,
    recent_similarity: f64,
    similarity_trend: f64,
    trend: TrendSignal,
}

/// Online block size controller of one compression run
#[derive(Debug, Clone)]
pub struct BlockSizeController {
    config: BlockSizeConfig,
    current: usize,
    blocks_processed: usize,
    hits: usize,
    window_hits: usize,
    window_blocks: usize,
    continuous_hit_ratio: Vec<f64>,
    similarity_scores: Vec<f64>,
    cer_values: Vec<f64>,
    observations: Vec<(usize, f64)>,
    last_adjustment_block: usize,
    adjustments: Vec<BlockSizeAdjustment>,
}

impl BlockSizeController {
    /// Create a controller starting at the configured initial size
    pub fn new(config: &BlockSizeConfig) -> Self {
        let min = config.min_block_size.max(1);
        let max = config.max_block_size.max(min);
        Self {
            current: config.block_size.clamp(min, max),
            config: config.clone(),
            blocks_processed: 0,
            hits: 0,
            window_hits: 0,
            window_blocks: 0,
            continuous_hit_ratio: Vec::new(),
            similarity_scores: Vec::new(),
            cer_values: Vec::new(),
            observations: Vec::new(),
            last_adjustment_block: 0,
            adjustments: Vec::new(),
        }
    }

    /// Length of the next block
    pub fn current_size(&self) -> usize {
        self.current
    }

    /// Smallest size the controller may choose
    pub fn min_size(&self) -> usize {
        self.config.min_block_size.max(1)
    }

    /// Largest size the controller may choose
    pub fn max_size(&self) -> usize {
        self.config.max_block_size.max(self.min_size())
    }

    /// Count one encoded block
    pub fn record_outcome(&mut self, was_hit: bool) {
        self.blocks_processed += 1;
        self.window_blocks += 1;
        if was_hit {
            self.hits += 1;
            self.window_hits += 1;
        }
        if self.window_blocks >= self.config.hit_ratio_window.max(1) {
            self.continuous_hit_ratio
                .push(self.window_hits as f64 / self.window_blocks as f64);
            self.window_hits = 0;
            self.window_blocks = 0;
        }
    }

    /// Remember the quality of an accepted match
    pub fn record_match(&mut self, similarity: f64, cer: f64) {
        if cer.is_finite() {
            self.cer_values.push(cer);
        }
        if similarity.is_finite() && similarity > 0.0 {
            self.similarity_scores.push(similarity);
        }
    }

    /// Blocks counted so far
    pub fn blocks_processed(&self) -> usize {
        self.blocks_processed
    }

    /// Blocks that matched an existing template
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// `hits / blocks_processed`, 0.0 before the first block
    pub fn hit_ratio(&self) -> f64 {
        if self.blocks_processed == 0 {
            0.0
        } else {
            self.hits as f64 / self.blocks_processed as f64
        }
    }

    /// Mean CER of all accepted matches
    pub fn avg_cer(&self) -> f64 {
        stats::mean(&self.cer_values)
    }

    /// Mean similarity of all accepted matches
    pub fn avg_similarity(&self) -> f64 {
        stats::mean(&self.similarity_scores)
    }

    /// Hit ratio of each completed window
    pub fn continuous_hit_ratio(&self) -> &[f64] {
        &self.continuous_hit_ratio
    }

    /// Adjustment records so far
    pub fn adjustments(&self) -> &[BlockSizeAdjustment] {
        &self.adjustments
    }

    /// Consider a size change after the latest block
    ///
    /// Returns the size of the next block, which is always within
    /// `[min_block_size, max_block_size]`.
    pub fn maybe_adjust(&mut self, trend: &TrendSignal) -> usize {
        if !self.config.adaptive_block_size
            || self.blocks_processed < self.config.min_blocks_before_adjustment
        {
            return self.current;
        }
        if self.blocks_processed - self.last_adjustment_block < self.adjustment_interval() {
            return self.current;
        }

        let signals = self.signals(trend);
        let nbest = self.current;
        let (proposal, mut reason) = match self.polynomial_proposal(nbest) {
            Some(size) => (size, AdjustmentReason::PolynomialOptimization),
            None => heuristic_proposal(nbest, &signals),
        };

        let rejection_window = ((nbest as f64 * 0.03) as usize).max(1);
        let special = signals.recent_hit_ratio < 0.35
            || signals.recent_similarity < 0.45
            || (signals.recent_hit_ratio > 0.8 && signals.recent_similarity > 0.7)
            || self.blocks_processed < 10;
        let applied = proposal.abs_diff(nbest) > rejection_window || special;

        let mut new_size = nbest;
        if applied {
            new_size = proposal.clamp(self.min_size(), self.max_size());

            if nbest == self.max_size()
                && (signals.hit_ratio_trend < 0.0 || signals.similarity_trend < 0.0)
            {
                new_size = scale(nbest, 0.8);
                reason = AdjustmentReason::ReduceFromMaxDueToDecliningMetrics;
            }

            if nbest == self.min_size() {
                if signals.recent_hit_ratio > 0.5 || signals.recent_similarity > 0.6 {
                    new_size = scale(nbest, 2.0);
                    reason = AdjustmentReason::AggressiveIncreaseFromMin;
                } else if signals.hit_ratio_trend > 0.0 && signals.similarity_trend > 0.0 {
                    new_size = scale(nbest, 1.5);
                    reason = AdjustmentReason::StrongerIncreaseFromMin;
                } else {
                    new_size = scale(nbest, 1.3);
                    reason = AdjustmentReason::DefaultIncreaseFromMin;
                }
            }

            if self.blocks_processed <= self.config.min_blocks_before_adjustment * 3 {
                if signals.recent_similarity > 0.55 {
                    if new_size < scale(nbest, 1.5) {
                        new_size = scale(nbest, 1.5);
                        reason = AdjustmentReason::EarlyStageAggressiveIncrease;
                    }
                } else if signals.recent_hit_ratio > 0.3 && new_size < scale(nbest, 1.2) {
                    new_size = scale(nbest, 1.2);
                    reason = AdjustmentReason::EarlyStageDefaultIncrease;
                }
            }
        }

        if new_size == 0 {
            warn!(
                block_number = self.blocks_processed,
                min_block_size = self.min_size(),
                "Computed block size of zero, substituting minimum"
            );
        }
        let new_size = new_size.clamp(self.min_size(), self.max_size());

        info!(
            block_number = self.blocks_processed,
            old_size = nbest,
            new_size,
            hit_ratio = signals.hit_ratio,
            window_hit_ratio = signals.recent_hit_ratio,
            recent_similarity = signals.recent_similarity,
            reason = ?reason,
            "Block size decision"
        );
        crate::metrics::record_block_size_adjustment(nbest, new_size);

        self.adjustments.push(BlockSizeAdjustment {
            block_number: self.blocks_processed,
            old_size: nbest,
            proposed_size: proposal,
            new_size,
            applied,
            reason,
            hit_ratio: signals.hit_ratio,
            window_hit_ratio: signals.recent_hit_ratio,
            hit_ratio_trend: signals.hit_ratio_trend,
            recent_cer: signals.recent_cer,
            recent_similarity: signals.recent_similarity,
            similarity_trend: signals.similarity_trend,
            trend: signals.trend,
        });
        self.observations.push((new_size, signals.hit_ratio));
        self.current = new_size;
        self.last_adjustment_block = self.blocks_processed;
        new_size
    }

    /// Blocks required between adjustments, halved on a similarity drop
    fn adjustment_interval(&self) -> usize {
        let base = self.config.min_adjustment_interval;
        match self.similarity_scores.as_slice() {
            [.., previous, last] if *last < 0.4 || last - previous < -0.2 => (base / 2).max(2),
            _ => base,
        }
    }

    fn signals(&self, trend: &TrendSignal) -> Signals {
        let scores = &self.similarity_scores;
        let recent_similarity = if scores.len() >= RECENT_MATCHES {
            stats::mean(&scores[scores.len() - RECENT_MATCHES..])
        } else {
            1.0
        };
        let similarity_trend = if scores.len() >= RECENT_MATCHES {
            scores[scores.len() - 1] - scores[scores.len() - RECENT_MATCHES]
        } else {
            0.0
        };
        let recent_cer = if self.cer_values.len() >= RECENT_MATCHES {
            stats::mean(&self.cer_values[self.cer_values.len() - RECENT_MATCHES..])
        } else {
            0.0
        };

        let windows = &self.continuous_hit_ratio;
        let hit_ratio = self.hit_ratio();
        let recent_hit_ratio = windows.last().copied().unwrap_or(hit_ratio);
        let hit_ratio_trend = if windows.len() >= 3 {
            windows[windows.len() - 1] - windows[windows.len() - 3]
        } else {
            0.0
        };

        Signals {
            hit_ratio,
            recent_hit_ratio,
            hit_ratio_trend,
            recent_cer,
            recent_similarity,
            similarity_trend,
            trend: *trend,
        }
    }

    /// Vertex of the fitted hit-ratio parabola, limited to a 15% step
    fn polynomial_proposal(&self, nbest: usize) -> Option<usize> {
        if self.observations.len() < 3 {
            return None;
        }
        let points: Vec<(f64, f64)> = self
            .observations
            .iter()
            .map(|&(size, ratio)| (size as f64, ratio))
            .collect();
        let vertex = polynomial::fit_quadratic(&points)?.maximum()?;

        let optimal = (vertex as usize).clamp(self.min_size(), self.max_size());
        let max_step = (nbest as f64 * POLYNOMIAL_MAX_STEP) as usize;
        let proposal = if optimal.abs_diff(nbest) > max_step {
            if optimal > nbest {
                nbest + max_step
            } else {
                nbest - max_step
            }
        } else {
            optimal
        };
        Some(proposal)
    }
}

/// Weighted increase/decrease scoring
fn heuristic_proposal(nbest: usize, s: &Signals) -> (usize, AdjustmentReason) {
    let mut increase = 0.0;
    if s.recent_hit_ratio > 0.6 {
        increase += 0.5 * HIT_RATIO_WEIGHT;
    }
    if s.hit_ratio_trend >= 0.0 {
        increase += 0.5 * HIT_RATIO_WEIGHT;
    }
    if s.recent_similarity > 0.7 {
        increase += SIMILARITY_WEIGHT;
    }
    if !s.trend.has_trend || s.trend.strength < 0.5 {
        increase += TREND_WEIGHT;
    }

    let mut decrease = 0.0;
    if s.recent_hit_ratio < 0.5 {
        decrease += 0.5 * HIT_RATIO_WEIGHT;
    }
    if s.hit_ratio_trend < 0.0 {
        decrease += 0.5 * HIT_RATIO_WEIGHT;
    }
    if s.recent_similarity < 0.6 {
        decrease += SIMILARITY_WEIGHT;
    }
    if s.similarity_trend < -0.1 {
        decrease += 0.5 * SIMILARITY_WEIGHT;
    }
    if s.trend.has_trend && s.trend.strength > 0.5 {
        decrease += TREND_WEIGHT;
    }

    if increase > decrease + 0.2 {
        let factor = ((increase - decrease) * 0.7).min(0.35);
        (scale(nbest, 1.0 + factor), AdjustmentReason::FasterIncreaseByWeightedScore)
    } else if decrease > increase + 0.1 {
        let factor = ((decrease - increase) * 0.6).min(0.3);
        (scale(nbest, 1.0 - factor), AdjustmentReason::FastDecreaseByWeightedScore)
    } else if s.hit_ratio_trend > 0.05 || s.similarity_trend > 0.0 {
        (scale(nbest, 1.25), AdjustmentReason::StrongerIncreaseByTrend)
    } else if s.hit_ratio_trend < -0.1 || s.similarity_trend < -0.05 {
        (scale(nbest, 0.85), AdjustmentReason::ModerateDecreaseByTrend)
    } else if s.recent_hit_ratio > 0.5 && s.recent_similarity > 0.55 {
        (scale(nbest, 1.1), AdjustmentReason::ModerateIncreaseForStableGoodMetrics)
    } else {
        (nbest, AdjustmentReason::StablePerformance)
    }
}

/// `floor(size * factor)`
fn scale(size: usize, factor: f64) -> usize {
    (size as f64 * factor) as usize
}

//! Template dictionary with usage tracking, merging and eviction
//!
//! The store owns every active template of one compression run. Templates
//! are addressed only by id; ids are issued in strictly increasing order and
//! never reused, including for templates restored from the archive.
//!
//! # Lifecycle
//!
//! ```text
//!  unmatched block ──create──▶ active ──merge_similar──▶ archive (merged_into)
//!                                │  ▲                       │
//!                   capacity /   │  └──── resurrect ────────┘ (new id)
//!                   cleanup      ▼
//!                             archive ──expire / overflow──▶ dropped
//! ```
//!
//! Logical time is the number of blocks processed so far and is advanced by
//! the driver through [`TemplateStore::advance_to`].

pub mod archive;

use crate::config::{CompressorConfig, ImportanceWeights, TemplateConfig};
use crate::metrics::{self, TemplateEvent};
use crate::similarity::{stats, SimilarityEngine};
use crate::trend::TrendSignal;
use crate::types::{TemplateId, Window};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

pub use archive::{Archive, ArchiveReason, ArchivedTemplate};

/// Score margin subtracted from candidates while a strong trend is present
const TREND_BOOST: f64 = 0.15;

/// Trend strength at which the boost margin applies
const BOOST_STRENGTH: f64 = 0.85;

/// Trend strength at which a weak best match is rejected outright
const REJECT_STRENGTH: f64 = 0.9;

/// Best adjusted score a match needs under a very strong trend
const REJECT_SCORE: f64 = 0.7;

/// Adjusted score a candidate needs to be considered at all
const MIN_CANDIDATE_SCORE: f64 = 0.3;

/// Archive similarity required for resurrection
const RESURRECT_SCORE: f64 = 0.9;

/// Importance above which a cleaned-up template is archived
const ARCHIVE_IMPORTANCE: f64 = 0.3;

/// Usage above which a template is considered established for merging
const MERGE_USAGE_LIMIT: u64 = 10;

/// Merges performed by one pass at most
const MAX_MERGES_PER_PASS: usize = 3;

/// Templates needed before merging is worth attempting
const MIN_TEMPLATES_FOR_MERGE: usize = 5;

/// Cheap statistics of the primary sequence used to prefilter candidates
#[derive(Debug, Clone, Copy, PartialEq)]
struct Profile {
    mean: f64,
    std: f64,
    range: f64,
}

impl Profile {
    fn of(window: &Window, primary: &str) -> Option<Self> {
        let values = window.primary(primary).filter(|v| !v.is_empty())?;
        let (mean, std) = stats::mean_std(values);
        let (min, max) = stats::min_max(values);
        Some(Self {
            mean,
            std,
            range: max - min,
        })
    }

    /// True when `other` is too far away in both mean and range
    fn rejects(&self, other: &Profile) -> bool {
        (self.mean - other.mean).abs() > 0.5 * self.std
            && (self.range - other.range).abs() > 0.5 * self.range
    }
}

/// An active template
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    /// Stable identifier
    pub id: TemplateId,
    /// Representative waveform, immutable once stored
    pub data: Window,
    /// Number of blocks encoded with this template
    pub usage_count: u64,
    /// Block at which the template was created
    pub created_at_block: u64,
    /// Block at which the template was last used or checked
    pub last_used_at_block: u64,
    profile: Option<Profile>,
}

/// A successful lookup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMatch {
    /// Matched template
    pub template_id: TemplateId,
    /// Composite similarity score
    pub score: f64,
    /// Score after the trend margin
    pub adjusted_score: f64,
    /// Compression error rate of the block against the template
    pub cer: f64,
}

/// Lifecycle counters of one store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Templates created from blocks
    pub created: u64,
    /// Templates restored from the archive
    pub resurrected: u64,
    /// Templates absorbed by merges
    pub merged: u64,
    /// Templates removed by capacity or cleanup
    pub evicted: u64,
    /// Templates written to the archive
    pub archived: u64,
    /// Archive entries dropped by size or age
    pub archive_dropped: u64,
}

/// Owned template dictionary of one compression run
#[derive(Debug, Clone)]
pub struct TemplateStore {
    config: TemplateConfig,
    engine: SimilarityEngine,
    primary_dimension: String,
    templates: BTreeMap<TemplateId, Template>,
    archive: Archive,
    next_id: TemplateId,
    clock: u64,
    last_merge_check: u64,
    stats: StoreStats,
}

impl TemplateStore {
    /// Create an empty store
    pub fn new(config: &CompressorConfig) -> Self {
        Self {
            config: config.templates.clone(),
            engine: SimilarityEngine::from_config(config),
            primary_dimension: config.dimensions.primary_dimension.clone(),
            templates: BTreeMap::new(),
            archive: Archive::new(
                config.templates.archive_capacity,
                config.templates.archive_expiration,
            ),
            next_id: 1,
            clock: 0,
            last_merge_check: 0,
            stats: StoreStats::default(),
        }
    }

    /// Move logical time forward and expire stale archive entries
    pub fn advance_to(&mut self, block: u64) {
        self.clock = self.clock.max(block);
        let dropped = self.archive.expire(self.clock);
        self.note_dropped(dropped);
    }

    /// Current logical time
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Number of active templates
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// True when no template is active
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Active template by id
    pub fn get(&self, id: TemplateId) -> Option<&Template> {
        self.templates.get(&id)
    }

    /// Active ids in ascending order
    pub fn ids(&self) -> Vec<TemplateId> {
        self.templates.keys().copied().collect()
    }

    /// Archived templates
    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Lifecycle counters
    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    /// Count one use of a template at the current time
    ///
    /// Returns false if the template is not active.
    pub fn record_use(&mut self, id: TemplateId) -> bool {
        match self.templates.get_mut(&id) {
            Some(template) => {
                template.usage_count += 1;
                template.last_used_at_block = self.clock;
                true
            },
            None => false,
        }
    }

    /// Find the best template for `window`
    ///
    /// Every template that survives the prefilter is touched as checked.
    /// Under a strong trend candidates are judged with a reduced score, and
    /// a weak best match is rejected so that a fresh template gets created.
    /// The winner's usage is incremented.
    pub fn find_match(&mut self, window: &Window, trend: &TrendSignal) -> Option<TemplateMatch> {
        let profile = Profile::of(window, &self.primary_dimension)?;
        let boost = if trend.has_trend && trend.strength > BOOST_STRENGTH {
            TREND_BOOST
        } else {
            0.0
        };

        let clock = self.clock;
        let mut best: Option<TemplateMatch> = None;
        let mut prefiltered = 0usize;
        for template in self.templates.values_mut() {
            if std::mem::discriminant(&template.data) != std::mem::discriminant(window) {
                continue;
            }
            let Some(candidate) = template.profile.as_ref() else {
                continue;
            };
            if profile.rejects(candidate) {
                prefiltered += 1;
                continue;
            }

            template.last_used_at_block = clock;

            let verdict = self.engine.is_similar(window, &template.data);
            let score = verdict.report.score;
            let adjusted_score = score - boost;
            if verdict.similar
                && adjusted_score > MIN_CANDIDATE_SCORE
                && best.map_or(true, |b| score > b.score)
            {
                best = Some(TemplateMatch {
                    template_id: template.id,
                    score,
                    adjusted_score,
                    cer: verdict.report.cer,
                });
            }
        }

        debug!(
            candidates = self.templates.len(),
            prefiltered,
            matched = best.is_some(),
            "Template lookup finished"
        );

        let best = best?;
        if trend.has_trend && trend.strength > REJECT_STRENGTH && best.adjusted_score < REJECT_SCORE {
            debug!(
                template_id = best.template_id,
                score = best.score,
                trend_strength = trend.strength,
                "Rejecting best match under strong trend"
            );
            return None;
        }

        self.record_use(best.template_id);
        Some(best)
    }

    /// Store `window` as a template and return its id
    ///
    /// Near capacity an archived template closely resembling `window` is
    /// restored under a new id instead. Close to the limit the cleanup pass
    /// runs first, and if the store still overflows after insertion the
    /// least important other template is archived.
    pub fn create(&mut self, window: Window) -> TemplateId {
        let max = self.config.max_templates as f64;
        let occupancy = self.templates.len() as f64;

        if !self.archive.is_empty() && occupancy >= 0.8 * max {
            let engine = &self.engine;
            let restored = self
                .archive
                .take_best_match(RESURRECT_SCORE, |data| engine.similarity(&window, data).score);
            if let Some((entry, score)) = restored {
                let id = self.insert(entry.data);
                self.stats.resurrected += 1;
                metrics::record_template_event(TemplateEvent::Resurrected, 1);
                info!(
                    original_id = entry.original_id,
                    template_id = id,
                    score,
                    "Resurrected archived template"
                );
                self.enforce_capacity(id);
                return id;
            }
        }

        if occupancy >= 0.95 * max {
            self.cleanup();
        }

        let id = self.insert(window);
        self.stats.created += 1;
        metrics::record_template_event(TemplateEvent::Created, 1);
        debug!(template_id = id, active = self.templates.len(), "Created template");
        self.enforce_capacity(id);
        id
    }

    /// Periodic maintenance; returns the number of evicted templates
    ///
    /// Merges near-duplicates when the merge interval has elapsed, then,
    /// only above 90% occupancy, evicts a small share of stale or rarely
    /// used templates, lowest importance first.
    pub fn cleanup(&mut self) -> usize {
        if self.config.enable_template_merging
            && self.clock.saturating_sub(self.last_merge_check) >= self.config.merge_interval
        {
            self.merge_similar();
            self.last_merge_check = self.clock;
        }

        let max = self.config.max_templates as f64;
        if self.templates.len() as f64 <= 0.9 * max {
            return 0;
        }

        let importance = self.importance_table();
        let max_age = self.config.max_template_age as f64;
        let mut candidates: Vec<(TemplateId, f64)> = self
            .templates
            .values()
            .filter(|t| {
                let age = self.clock.saturating_sub(t.created_at_block) as f64;
                let unused = self.clock.saturating_sub(t.last_used_at_block);
                (unused > self.config.template_expiration && age > 0.8 * max_age)
                    || (t.usage_count <= self.config.usage_threshold && age > 0.9 * max_age)
                    || (age > max_age && t.usage_count < 3)
            })
            .map(|t| (t.id, importance.get(&t.id).copied().unwrap_or(0.0)))
            .collect();

        if candidates.is_empty() {
            return 0;
        }

        let quota = ((self.templates.len() as f64 * self.config.max_templates_to_remove) as usize).max(1);
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        candidates.truncate(quota);

        for &(id, score) in &candidates {
            let Some(template) = self.templates.remove(&id) else {
                continue;
            };
            info!(
                template_id = id,
                usage = template.usage_count,
                age = self.clock.saturating_sub(template.created_at_block),
                importance = score,
                "Evicting template during cleanup"
            );
            if score > ARCHIVE_IMPORTANCE {
                self.archive_template(template, ArchiveReason::Cleanup, Some(score), None);
            }
        }

        self.stats.evicted += candidates.len() as u64;
        metrics::record_template_event(TemplateEvent::Evicted, candidates.len());
        candidates.len()
    }

    /// Merge near-duplicate templates; returns the number of merges
    ///
    /// Pairs where both sides are established (usage above 10) are left
    /// alone. The less used template of a pair is absorbed by the other
    /// (ties absorb the higher id); at most three merges happen per pass.
    pub fn merge_similar(&mut self) -> usize {
        if self.templates.len() < MIN_TEMPLATES_FOR_MERGE {
            return 0;
        }

        let threshold = self.config.template_merge_threshold;
        let active: Vec<&Template> = self.templates.values().collect();
        let mut pairs: Vec<(TemplateId, TemplateId, f64)> = Vec::new();
        for (i, first) in active.iter().enumerate() {
            for second in &active[i + 1..] {
                if first.usage_count > MERGE_USAGE_LIMIT && second.usage_count > MERGE_USAGE_LIMIT {
                    continue;
                }
                let score = self.engine.similarity(&first.data, &second.data).score;
                if score > threshold {
                    if first.usage_count >= second.usage_count {
                        pairs.push((second.id, first.id, score));
                    } else {
                        pairs.push((first.id, second.id, score));
                    }
                }
            }
        }
        pairs.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut touched: HashSet<TemplateId> = HashSet::new();
        let mut merged = 0;
        for (source_id, target_id, score) in pairs {
            if touched.contains(&source_id) || touched.contains(&target_id) {
                continue;
            }
            let Some(source) = self.templates.remove(&source_id) else {
                continue;
            };
            let Some(target) = self.templates.get_mut(&target_id) else {
                self.templates.insert(source_id, source);
                continue;
            };

            target.usage_count += source.usage_count;
            target.last_used_at_block = target.last_used_at_block.max(source.last_used_at_block);
            info!(
                source_id,
                target_id,
                similarity = score,
                "Merged template"
            );
            self.archive_template(source, ArchiveReason::Merged, None, Some(target_id));

            touched.insert(source_id);
            touched.insert(target_id);
            merged += 1;
            if merged >= MAX_MERGES_PER_PASS {
                break;
            }
        }

        self.stats.merged += merged as u64;
        metrics::record_template_event(TemplateEvent::Merged, merged);
        merged
    }

    /// Importance of an active template at the current time
    pub fn importance(&self, id: TemplateId) -> Option<f64> {
        self.importance_table().get(&id).copied()
    }

    /// Importance of every active template
    ///
    /// Usage, recency and age are normalized by their maximum across the
    /// store (a zero maximum counts as 1).
    fn importance_table(&self) -> BTreeMap<TemplateId, f64> {
        let ImportanceWeights {
            usage_count: w_usage,
            recency: w_recency,
            age: w_age,
        } = self.config.importance_weights;
        let clock = self.clock;
        let age = |t: &Template| clock.saturating_sub(t.created_at_block) as f64;
        let unused = |t: &Template| clock.saturating_sub(t.last_used_at_block) as f64;
        let nonzero = |v: f64| if v > 0.0 { v } else { 1.0 };

        let max_usage = nonzero(self.templates.values().map(|t| t.usage_count as f64).fold(0.0, f64::max));
        let max_age = nonzero(self.templates.values().map(age).fold(0.0, f64::max));
        let max_unused = nonzero(self.templates.values().map(unused).fold(0.0, f64::max));

        self.templates
            .values()
            .map(|t| {
                let score = w_usage * (t.usage_count as f64 / max_usage)
                    + w_recency * (1.0 - unused(t) / max_unused)
                    + w_age * (age(t) / max_age);
                (t.id, score)
            })
            .collect()
    }

    fn insert(&mut self, data: Window) -> TemplateId {
        let id = self.next_id;
        self.next_id += 1;
        let profile = Profile::of(&data, &self.primary_dimension);
        self.templates.insert(
            id,
            Template {
                id,
                data,
                usage_count: 1,
                created_at_block: self.clock,
                last_used_at_block: self.clock,
                profile,
            },
        );
        id
    }

    /// Archive the least important template other than `protected` while
    /// the store is over capacity
    fn enforce_capacity(&mut self, protected: TemplateId) {
        while self.templates.len() > self.config.max_templates {
            let importance = self.importance_table();
            let victim = importance
                .iter()
                .filter(|(id, _)| **id != protected)
                .min_by(|a, b| a.1.total_cmp(b.1).then(a.0.cmp(b.0)))
                .map(|(id, score)| (*id, *score));
            let Some((id, score)) = victim else {
                break;
            };
            let Some(template) = self.templates.remove(&id) else {
                break;
            };
            info!(
                template_id = id,
                usage = template.usage_count,
                importance = score,
                "Evicting least important template at capacity"
            );
            self.archive_template(template, ArchiveReason::Capacity, Some(score), None);
            self.stats.evicted += 1;
            metrics::record_template_event(TemplateEvent::Evicted, 1);
        }
    }

    fn archive_template(
        &mut self,
        template: Template,
        reason: ArchiveReason,
        importance: Option<f64>,
        merged_into: Option<TemplateId>,
    ) {
        let dropped = self.archive.push(ArchivedTemplate {
            original_id: template.id,
            data: template.data,
            usage_count: template.usage_count,
            created_at_block: template.created_at_block,
            last_used_at_block: template.last_used_at_block,
            archived_at_block: self.clock,
            importance,
            merged_into,
            reason,
        });
        if self.config.archive_capacity > 0 {
            self.stats.archived += 1;
        }
        self.note_dropped(dropped);
    }

    fn note_dropped(&mut self, dropped: usize) {
        if dropped > 0 {
            self.stats.archive_dropped += dropped as u64;
            metrics::record_template_event(TemplateEvent::ArchiveDropped, dropped);
        }
    }
}

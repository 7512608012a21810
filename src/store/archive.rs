//! Bounded archive of evicted and merged templates
//!
//! Entries are kept in archival order. The archive is bounded both in size
//! (oldest entry dropped first) and in time (entries older than the
//! expiration are dropped). Dropped entries are gone for good; only entries
//! still in the archive can be resurrected.

use crate::types::{TemplateId, Window};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Why a template left the active store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveReason {
    /// Removed to stay within `max_templates`
    Capacity,
    /// Removed by the periodic cleanup pass
    Cleanup,
    /// Absorbed into a near-duplicate template
    Merged,
}

/// A template that was removed from the active store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedTemplate {
    /// Id the template had while active
    pub original_id: TemplateId,
    /// Stored waveform
    pub data: Window,
    /// Usage count at removal
    pub usage_count: u64,
    /// Block at which the template was created
    pub created_at_block: u64,
    /// Block at which the template was last used or checked
    pub last_used_at_block: u64,
    /// Block at which the template was archived
    pub archived_at_block: u64,
    /// Importance at removal, when it was computed
    pub importance: Option<f64>,
    /// Template that absorbed this one
    pub merged_into: Option<TemplateId>,
    /// Why the template was archived
    pub reason: ArchiveReason,
}

/// Size- and age-bounded FIFO of archived templates
#[derive(Debug, Clone)]
pub struct Archive {
    entries: VecDeque<ArchivedTemplate>,
    capacity: usize,
    expiration: u64,
}

impl Archive {
    /// Create an archive; a capacity of 0 disables archiving
    pub fn new(capacity: usize, expiration: u64) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            expiration,
        }
    }

    /// Number of archived templates
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is archived
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &ArchivedTemplate> {
        self.entries.iter()
    }

    /// Find an entry by the id it had while active
    pub fn get(&self, original_id: TemplateId) -> Option<&ArchivedTemplate> {
        self.entries.iter().find(|e| e.original_id == original_id)
    }

    /// Archive an entry, returning how many entries were dropped to make room
    ///
    /// With a capacity of 0 the entry itself is dropped.
    pub fn push(&mut self, entry: ArchivedTemplate) -> usize {
        if self.capacity == 0 {
            return 1;
        }
        let mut dropped = 0;
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
            dropped += 1;
        }
        self.entries.push_back(entry);
        dropped
    }

    /// Drop entries archived more than `expiration` blocks before `now`
    pub fn expire(&mut self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| now.saturating_sub(e.archived_at_block) <= self.expiration);
        before - self.entries.len()
    }

    /// Remove and return the best-scoring entry whose score exceeds `threshold`
    ///
    /// Ties keep the older entry.
    pub fn take_best_match<F>(&mut self, threshold: f64, mut score: F) -> Option<(ArchivedTemplate, f64)>
    where
        F: FnMut(&Window) -> f64,
    {
        let mut best: Option<(usize, f64)> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            let s = score(&entry.data);
            if s > threshold && best.map_or(true, |(_, b)| s > b) {
                best = Some((index, s));
            }
        }
        let (index, s) = best?;
        self.entries.remove(index).map(|entry| (entry, s))
    }
}

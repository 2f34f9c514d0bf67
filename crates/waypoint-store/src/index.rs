use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use waypoint_core::{CheckpointCategory, CheckpointId, CheckpointLevel, CheckpointSummary};

/// One timeline entry, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Checkpoint id.
    pub id: CheckpointId,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Checkpoint label.
    pub label: String,
}

/// Derived lookup state over the store's checkpoints.
///
/// Every id in `by_id` appears exactly once in `timeline` and in exactly
/// one `by_category` bucket. Mutations go through [`insert`](Self::insert)
/// and [`remove`](Self::remove), which maintain all three structures
/// together; the store serializes access behind its writer lock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointIndex {
    /// id → summary.
    pub by_id: HashMap<CheckpointId, CheckpointSummary>,
    /// category → ids, append-on-create order.
    pub by_category: HashMap<CheckpointCategory, Vec<CheckpointId>>,
    /// All ids ordered newest first.
    pub timeline: Vec<TimelineEntry>,
}

impl CheckpointIndex {
    /// Adds a checkpoint to all three structures and re-sorts the timeline.
    pub fn insert(&mut self, summary: CheckpointSummary) {
        self.by_category
            .entry(summary.category)
            .or_default()
            .push(summary.id.clone());

        self.timeline.push(TimelineEntry {
            id: summary.id.clone(),
            timestamp: summary.created_at,
            label: summary.label.clone(),
        });
        self.sort_timeline();

        self.by_id.insert(summary.id.clone(), summary);
    }

    /// Removes a checkpoint from all three structures. Removing an unknown
    /// id is a no-op so retention sweeps stay simple.
    pub fn remove(&mut self, id: &CheckpointId) -> Option<CheckpointSummary> {
        let summary = self.by_id.remove(id)?;

        if let Some(bucket) = self.by_category.get_mut(&summary.category) {
            bucket.retain(|entry| entry != id);
            if bucket.is_empty() {
                self.by_category.remove(&summary.category);
            }
        }
        self.timeline.retain(|entry| entry.id != *id);

        Some(summary)
    }

    /// Ids at a given level, newest first.
    pub fn ids_at_level(&self, level: CheckpointLevel) -> Vec<CheckpointId> {
        self.timeline
            .iter()
            .filter(|entry| {
                self.by_id
                    .get(&entry.id)
                    .is_some_and(|summary| summary.level == level)
            })
            .map(|entry| entry.id.clone())
            .collect()
    }

    /// Number of indexed checkpoints.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Verifies the cross-structure invariant; used by tests and by index
    /// rebuild on open.
    pub fn is_consistent(&self) -> bool {
        if self.timeline.len() != self.by_id.len() {
            return false;
        }
        let category_total: usize = self.by_category.values().map(Vec::len).sum();
        if category_total != self.by_id.len() {
            return false;
        }
        self.timeline.iter().all(|entry| {
            self.by_id.contains_key(&entry.id)
                && self
                    .by_category
                    .values()
                    .filter(|bucket| bucket.contains(&entry.id))
                    .count()
                    == 1
        })
    }

    /// Descending by timestamp, id as the creation-order tie-break.
    fn sort_timeline(&mut self) {
        self.timeline
            .sort_by(|left, right| match right.timestamp.cmp(&left.timestamp) {
                core::cmp::Ordering::Equal => right.id.cmp(&left.id),
                ordering => ordering,
            });
    }
}

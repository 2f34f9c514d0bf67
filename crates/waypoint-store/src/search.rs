//! Search and rewind operations over the checkpoint index.
//!
//! All searches walk the timeline newest first, so "first hit" always
//! means "most recent hit". The fuzzy metric is deliberately simple:
//! word-set overlap divided by query word count with a 0.3 threshold, and
//! the first-encountered best score wins ties. These are part of the
//! observable contract and must not be upgraded silently.

use std::collections::HashSet;

use chrono::{Duration, Utc};

use waypoint_core::{CheckpointCategory, CheckpointId, Error, Result};

use crate::store::CheckpointStore;

/// Minimum word-overlap score for a fuzzy description match.
const FUZZY_THRESHOLD: f64 = 0.3;

impl CheckpointStore {
    /// Finds a checkpoint whose searchable text matches `text`.
    ///
    /// Exact substring matches return immediately in timeline order. When
    /// `fuzzy` is set and no exact hit exists, the best word-overlap score
    /// above the threshold wins.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] when nothing matches.
    pub async fn find_by_description(&self, text: &str, fuzzy: bool) -> Result<CheckpointId> {
        let needle = text.to_lowercase();
        let ids = self.timeline_ids().await;

        let mut best: Option<(f64, CheckpointId)> = None;
        for id in ids {
            let metadata = match self.get(&id).await {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };

            if metadata.searchable_text.contains(&needle) {
                return Ok(id);
            }
            if fuzzy {
                let score = word_overlap(&needle, &metadata.searchable_text);
                let beats_best = best.as_ref().is_none_or(|(best_score, _)| score > *best_score);
                if beats_best {
                    best = Some((score, id));
                }
            }
        }

        match best {
            Some((score, id)) if score > FUZZY_THRESHOLD => Ok(id),
            _ => Err(Error::NotFound(format!("no checkpoint matching '{text}'"))),
        }
    }

    /// Finds the checkpoint closest in time to `hours_ago` hours before
    /// now.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] only when the store is empty.
    pub async fn find_by_time(&self, hours_ago: f64) -> Result<CheckpointId> {
        let target = Utc::now() - Duration::milliseconds((hours_ago * 3_600_000.0) as i64);

        self.with_index(|index| {
            index
                .timeline
                .iter()
                .min_by_key(|entry| {
                    entry
                        .timestamp
                        .signed_duration_since(target)
                        .num_milliseconds()
                        .abs()
                })
                .map(|entry| entry.id.clone())
        })
        .await
        .ok_or_else(|| Error::NotFound("store has no checkpoints".to_owned()))
    }

    /// Finds the nth most recent checkpoint (1-indexed) created for the
    /// given agent type.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] when fewer than `nth` matches exist.
    pub async fn find_by_agent(&self, agent_type: &str, nth: usize) -> Result<CheckpointId> {
        if nth == 0 {
            return Err(Error::NotFound("nth is 1-indexed".to_owned()));
        }

        let mut seen = 0;
        for id in self.timeline_ids().await {
            let metadata = match self.get(&id).await {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            if metadata.external_state.agent.as_deref() == Some(agent_type) {
                seen += 1;
                if seen == nth {
                    return Ok(id);
                }
            }
        }

        Err(Error::NotFound(format!(
            "fewer than {nth} checkpoints for agent '{agent_type}'"
        )))
    }

    /// Most recent checkpoint in a category, straight from the index
    /// bucket.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an empty bucket.
    pub async fn find_by_category(&self, category: CheckpointCategory) -> Result<CheckpointId> {
        self.with_index(|index| {
            index
                .timeline
                .iter()
                .find(|entry| {
                    index
                        .by_id
                        .get(&entry.id)
                        .is_some_and(|summary| summary.category == category)
                })
                .map(|entry| entry.id.clone())
        })
        .await
        .ok_or_else(|| Error::NotFound(format!("no checkpoint in category {category:?}")))
    }

    /// The nth entry of the timeline, 1-indexed (1 = newest).
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] when the timeline is shorter than `n`.
    pub async fn rewind_by_steps(&self, steps: usize) -> Result<CheckpointId> {
        if steps == 0 {
            return Err(Error::NotFound("steps is 1-indexed".to_owned()));
        }
        self.with_index(|index| index.timeline.get(steps - 1).map(|entry| entry.id.clone()))
            .await
            .ok_or_else(|| Error::NotFound(format!("fewer than {steps} checkpoints exist")))
    }

    /// Distinct agent types seen across stored checkpoints, used by the
    /// semantic rewind parser.
    pub async fn known_agents(&self) -> Vec<String> {
        let mut agents = Vec::new();
        for id in self.timeline_ids().await {
            if let Ok(metadata) = self.get(&id).await {
                if let Some(agent) = metadata.external_state.agent {
                    if !agents.contains(&agent) {
                        agents.push(agent);
                    }
                }
            }
        }
        agents
    }

    async fn timeline_ids(&self) -> Vec<CheckpointId> {
        self.with_index(|index| {
            index
                .timeline
                .iter()
                .map(|entry| entry.id.clone())
                .collect()
        })
        .await
    }
}

/// |query words ∩ target words| / |query words|. Order-insensitive.
fn word_overlap(query: &str, target: &str) -> f64 {
    let query_words: HashSet<&str> = query.split_whitespace().collect();
    if query_words.is_empty() {
        return 0.0;
    }
    let target_words: HashSet<&str> = target.split_whitespace().collect();
    let shared = query_words.intersection(&target_words).count();
    shared as f64 / query_words.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_overlap_scoring() {
        assert!((word_overlap("bug auth", "fix bug in authentication") - 0.5).abs() < 1e-9);
        assert!((word_overlap("bug", "fix bug now") - 1.0).abs() < 1e-9);
        assert!(word_overlap("xyz", "fix bug now").abs() < 1e-9);
        assert!(word_overlap("", "anything").abs() < 1e-9);
    }
}

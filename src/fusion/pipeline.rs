//! The default fusion sequence, configured once at construction.

use chrono::{DateTime, Utc};

use super::candidate::{ScoreField, SearchCandidate};
use super::rank::{
    apply_freshness_boost, merge_project_results, normalize_scores, FreshnessOptions, MergeOptions,
};

#[derive(Debug, Clone)]
pub struct FusionConfig {
    pub top_k: usize,
    pub dedupe: bool,
    pub max_boost: f64,
    pub half_life: chrono::Duration,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            dedupe: true,
            max_boost: 1.5,
            half_life: chrono::Duration::days(7),
        }
    }
}

/// normalize `score` → seed `final_score` → freshness boost → merge.
#[derive(Debug, Clone)]
pub struct FusionPipeline {
    config: FusionConfig,
}

impl FusionPipeline {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.config.top_k = top_k;
        self
    }

    /// Fuse per-project candidate lists into one ranking, ages measured from `now`.
    pub fn fuse(&self, lists: Vec<Vec<SearchCandidate>>, now: DateTime<Utc>) -> Vec<SearchCandidate> {
        let mut all: Vec<SearchCandidate> = lists.into_iter().flatten().collect();

        normalize_scores(&mut all, ScoreField::Score);
        for c in all.iter_mut() {
            c.final_score = c.normalized_score;
        }
        apply_freshness_boost(
            &mut all,
            FreshnessOptions {
                max_boost: self.config.max_boost,
                half_life: self.config.half_life,
                now,
            },
        );

        merge_project_results(
            vec![all],
            MergeOptions {
                top_k: self.config.top_k,
                dedupe: self.config.dedupe,
            },
        )
    }
}

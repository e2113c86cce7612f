//! Cross-project result fusion.
//!
//! Candidates gathered from several project searches are fingerprinted and
//! deduplicated ([`dedupe_candidates`]), z-score normalized
//! ([`normalize_scores`]), boosted for recency ([`apply_freshness_boost`]) and
//! merged into one ranking ([`merge_project_results`]). [`FusionPipeline`] runs
//! that sequence with a fixed [`FusionConfig`].

pub mod candidate;
pub mod ids;
pub mod pipeline;
pub mod rank;

pub use candidate::{compute_content_hash, ScoreField, SearchCandidate};
pub use ids::{
    group_by_project, namespace_node_id, parse_namespaced_id, NamespacedId, ProjectGroup,
    NAMESPACE_SEPARATOR, UNKNOWN_PROJECT,
};
pub use pipeline::{FusionConfig, FusionPipeline};
pub use rank::{
    apply_freshness_boost, dedupe_candidates, freshness_boost, merge_project_results,
    normalize_scores, FreshnessOptions, MergeOptions,
};

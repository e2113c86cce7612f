//! Search candidates and content fingerprints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One hit from one project search. Ephemeral; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCandidate {
    pub project_id: Option<String>,
    pub node_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    /// Raw retrieval score (weighted similarity for fan-out hits).
    #[serde(default)]
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freshness_boost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Projects whose duplicates were folded into this candidate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other_project_ids: Vec<String>,
    #[serde(default)]
    pub duplicate_count: usize,
}

impl SearchCandidate {
    pub fn new(project_id: impl Into<String>, node_id: impl Into<String>, score: f64) -> Self {
        Self {
            project_id: Some(project_id.into()),
            node_id: node_id.into(),
            score,
            ..Self::default()
        }
    }

    /// `final_score`, with a missing score ranking as 0.
    pub fn rank_score(&self) -> f64 {
        self.final_score.unwrap_or(0.0)
    }

    /// First available of `timestamp`, `updated_at`, `created_at`.
    pub fn effective_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp.or(self.updated_at).or(self.created_at)
    }

    /// Pre-supplied hash if present, otherwise one computed from the text.
    ///
    /// Empty text falls back to the namespaced id so unrelated empty nodes do
    /// not collapse into one group.
    pub fn fingerprint(&self) -> String {
        if let Some(hash) = &self.content_hash {
            return hash.clone();
        }
        if self.text.is_empty() {
            let project = self.project_id.as_deref().unwrap_or_default();
            return compute_content_hash(&super::namespace_node_id(project, &self.node_id));
        }
        compute_content_hash(&self.text)
    }
}

/// Score field selector for [`normalize_scores`](super::normalize_scores).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreField {
    Score,
    Similarity,
    NormalizedScore,
    FinalScore,
}

impl ScoreField {
    /// Read the field; absent values count as 0.
    pub fn get(&self, c: &SearchCandidate) -> f64 {
        match self {
            Self::Score => c.score,
            Self::Similarity => c.similarity.unwrap_or(0.0),
            Self::NormalizedScore => c.normalized_score.unwrap_or(0.0),
            Self::FinalScore => c.final_score.unwrap_or(0.0),
        }
    }
}

/// 32-bit rolling hash (`h = 31·h + c`, wrapping) as 8 lowercase hex digits.
///
/// A dedup fingerprint only; collisions are acceptable.
pub fn compute_content_hash(text: &str) -> String {
    let hash = text
        .chars()
        .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32));
    format!("{hash:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_fixed_width_and_deterministic() {
        assert_eq!(compute_content_hash(""), "00000000");
        assert_eq!(compute_content_hash("a"), "00000061");
        assert_eq!(compute_content_hash("ab"), format!("{:08x}", 97 * 31 + 98));
        let long = "lorem ipsum ".repeat(100);
        assert_eq!(compute_content_hash(&long), compute_content_hash(&long));
        assert_eq!(compute_content_hash(&long).len(), 8);
    }

    #[test]
    fn different_texts_usually_differ() {
        assert_ne!(compute_content_hash("alpha"), compute_content_hash("beta"));
    }

    #[test]
    fn fingerprint_trusts_supplied_hash() {
        let mut c = SearchCandidate::new("p", "n", 1.0);
        c.text = "body".into();
        c.content_hash = Some("deadbeef".into());
        assert_eq!(c.fingerprint(), "deadbeef");
    }

    #[test]
    fn effective_timestamp_prefers_explicit_field() {
        let t1 = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let t2 = DateTime::parse_from_rfc3339("2026-02-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let mut c = SearchCandidate::new("p", "n", 0.0);
        c.created_at = Some(t1);
        assert_eq!(c.effective_timestamp(), Some(t1));
        c.updated_at = Some(t2);
        assert_eq!(c.effective_timestamp(), Some(t2));
        c.timestamp = Some(t1);
        assert_eq!(c.effective_timestamp(), Some(t1));
    }
}

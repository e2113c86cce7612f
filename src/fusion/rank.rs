use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::candidate::{ScoreField, SearchCandidate};

/// Options for [`apply_freshness_boost`].
#[derive(Debug, Clone, Copy)]
pub struct FreshnessOptions {
    /// Boost at age zero; 1.0 disables boosting.
    pub max_boost: f64,
    pub half_life: chrono::Duration,
    /// Reference instant ages are measured from.
    pub now: DateTime<Utc>,
}

/// Options for [`merge_project_results`].
#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    pub top_k: usize,
    pub dedupe: bool,
}

/// Collapse candidates sharing a content fingerprint.
///
/// The representative of each group is the member with the highest
/// `final_score` (earliest in input order on ties). Other members' project ids
/// are folded into `other_project_ids` and counted in `duplicate_count`.
/// Groups come out in first-seen order. Applying this twice is the same as
/// applying it once.
pub fn dedupe_candidates(candidates: Vec<SearchCandidate>) -> Vec<SearchCandidate> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<SearchCandidate>> = HashMap::new();

    for mut c in candidates {
        let hash = c.fingerprint();
        c.content_hash = Some(hash.clone());
        groups
            .entry(hash.clone())
            .or_insert_with(|| {
                order.push(hash);
                Vec::new()
            })
            .push(c);
    }

    order
        .into_iter()
        .filter_map(|hash| groups.remove(&hash))
        .map(fold_group)
        .collect()
}

fn fold_group(mut members: Vec<SearchCandidate>) -> SearchCandidate {
    let mut best = 0;
    for (i, c) in members.iter().enumerate() {
        if c.rank_score() > members[best].rank_score() {
            best = i;
        }
    }

    let mut rep = members.remove(best);

    for other in members {
        rep.duplicate_count += 1 + other.duplicate_count;
        let ids = other
            .project_id
            .into_iter()
            .chain(other.other_project_ids);
        for id in ids {
            if rep.project_id.as_deref() != Some(id.as_str()) && !rep.other_project_ids.contains(&id) {
                rep.other_project_ids.push(id);
            }
        }
    }
    rep
}

/// Z-score `field` across the set, then squash through a logistic into
/// `normalized_score` in (0, 1). A set with no spread maps every value to exactly 0.5.
pub fn normalize_scores(results: &mut [SearchCandidate], field: ScoreField) {
    if results.is_empty() {
        return;
    }

    let values: Vec<f64> = results.iter().map(|c| field.get(c)).collect();
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let degenerate =
        values.iter().all(|v| *v == values[0]) || std_dev == 0.0 || !std_dev.is_finite();

    for (c, v) in results.iter_mut().zip(values) {
        c.normalized_score = Some(if degenerate {
            0.5
        } else {
            logistic((v - mean) / std_dev)
        });
    }
}

fn logistic(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Freshness multiplier for a given age.
///
/// `1 + (max_boost - 1) * 2^(-age / half_life)`; negative ages count as zero.
pub fn freshness_boost(age: chrono::Duration, max_boost: f64, half_life: chrono::Duration) -> f64 {
    let age_secs = (age.num_milliseconds() as f64 / 1000.0).max(0.0);
    let half_secs = half_life.num_milliseconds() as f64 / 1000.0;
    if half_secs <= 0.0 {
        return if age_secs == 0.0 { max_boost } else { 1.0 };
    }
    1.0 + (max_boost - 1.0) * (-age_secs / half_secs).exp2()
}

/// Set `freshness_boost` from each candidate's first available timestamp and
/// scale its `final_score` (falling back to `normalized_score`, then `score`).
/// Candidates without any timestamp get a neutral 1.0.
pub fn apply_freshness_boost(results: &mut [SearchCandidate], options: FreshnessOptions) {
    for c in results.iter_mut() {
        let boost = match c.effective_timestamp() {
            Some(ts) => freshness_boost(options.now - ts, options.max_boost, options.half_life),
            None => 1.0,
        };
        let base = c.final_score.or(c.normalized_score).unwrap_or(c.score);
        c.freshness_boost = Some(boost);
        c.final_score = Some(base * boost);
    }
}

/// Flatten per-project lists, optionally dedupe, stable-sort by `final_score`
/// descending (missing as 0) and keep the first `top_k`.
pub fn merge_project_results(
    lists: Vec<Vec<SearchCandidate>>,
    options: MergeOptions,
) -> Vec<SearchCandidate> {
    let mut merged: Vec<SearchCandidate> = lists.into_iter().flatten().collect();
    if options.dedupe {
        merged = dedupe_candidates(merged);
    }
    merged.sort_by(|a, b| {
        b.rank_score()
            .partial_cmp(&a.rank_score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    merged.truncate(options.top_k);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(project: &str, node: &str, text: &str, final_score: f64) -> SearchCandidate {
        let mut c = SearchCandidate::new(project, node, final_score);
        c.text = text.into();
        c.final_score = Some(final_score);
        c
    }

    fn final_scores(results: &[SearchCandidate]) -> Vec<f64> {
        results.iter().map(|c| c.rank_score()).collect()
    }

    #[test]
    fn merge_orders_and_truncates() {
        let lists = vec![
            vec![scored("a", "1", "x", 0.9), scored("a", "2", "y", 0.3)],
            vec![scored("b", "3", "z", 0.7)],
        ];
        let merged = merge_project_results(lists, MergeOptions { top_k: 2, dedupe: false });
        assert_eq!(final_scores(&merged), vec![0.9, 0.7]);
    }

    #[test]
    fn merge_is_stable_and_treats_missing_as_zero() {
        let mut unscored = SearchCandidate::new("a", "u", 5.0);
        unscored.text = "u".into();
        let lists = vec![
            vec![unscored, scored("a", "1", "p", 0.5)],
            vec![scored("b", "2", "q", 0.5), scored("b", "3", "r", -0.1)],
        ];
        let merged = merge_project_results(lists, MergeOptions { top_k: 10, dedupe: false });
        let ids: Vec<&str> = merged.iter().map(|c| c.node_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "u", "3"]);
    }

    #[test]
    fn merge_can_dedupe_across_projects() {
        let lists = vec![
            vec![scored("a", "1", "same text", 0.4)],
            vec![scored("b", "9", "same text", 0.8)],
        ];
        let merged = merge_project_results(lists, MergeOptions { top_k: 10, dedupe: true });
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].project_id.as_deref(), Some("b"));
        assert_eq!(merged[0].other_project_ids, vec!["a".to_string()]);
    }

    #[test]
    fn dedupe_keeps_best_and_folds_projects() {
        let input = vec![
            scored("a", "1", "dup", 0.5),
            scored("b", "2", "unique", 0.1),
            scored("c", "3", "dup", 0.9),
            scored("d", "4", "dup", 0.9),
            scored("a", "5", "dup", 0.2),
        ];
        let out = dedupe_candidates(input);
        assert_eq!(out.len(), 2);

        let rep = &out[0];
        assert_eq!(rep.node_id, "3", "first of the tied best wins");
        assert_eq!(rep.duplicate_count, 3);
        assert_eq!(rep.other_project_ids, vec!["a".to_string(), "d".to_string()]);
        assert_eq!(out[1].node_id, "2");
        assert_eq!(out[1].duplicate_count, 0);
    }

    #[test]
    fn dedupe_is_idempotent() {
        let input = vec![
            scored("a", "1", "dup", 0.5),
            scored("b", "2", "other", 0.1),
            scored("c", "3", "dup", 0.9),
            scored("c", "4", "third", 0.3),
            scored("d", "5", "other", 0.05),
        ];
        let once = dedupe_candidates(input);
        let twice = dedupe_candidates(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn dedupe_trusts_supplied_hashes() {
        let mut a = scored("a", "1", "one text", 0.5);
        let mut b = scored("b", "2", "another text", 0.4);
        a.content_hash = Some("cafebabe".into());
        b.content_hash = Some("cafebabe".into());
        let out = dedupe_candidates(vec![a, b]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].node_id, "1");
    }

    #[test]
    fn dedupe_keeps_distinct_empty_texts_apart() {
        let out = dedupe_candidates(vec![scored("a", "1", "", 0.5), scored("a", "2", "", 0.4)]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn normalize_identical_scores_is_exactly_half() {
        let mut results: Vec<SearchCandidate> =
            (0..5).map(|i| SearchCandidate::new("p", i.to_string(), 0.1)).collect();
        normalize_scores(&mut results, ScoreField::Score);
        for r in &results {
            assert_eq!(r.normalized_score, Some(0.5));
        }
    }

    #[test]
    fn normalize_preserves_order_within_unit_interval() {
        let mut results: Vec<SearchCandidate> = [1.0, 3.0, 2.0]
            .iter()
            .enumerate()
            .map(|(i, s)| SearchCandidate::new("p", i.to_string(), *s))
            .collect();
        normalize_scores(&mut results, ScoreField::Score);
        let n: Vec<f64> = results.iter().map(|r| r.normalized_score.unwrap()).collect();
        assert!(n.iter().all(|v| *v > 0.0 && *v < 1.0));
        assert!(n[1] > n[2] && n[2] > n[0]);
        assert!((n[2] - 0.5).abs() < 1e-12, "the mean maps to 0.5");
    }

    #[test]
    fn normalize_keeps_tiny_but_real_spread() {
        let mut results = vec![
            SearchCandidate::new("p", "lo", 0.0),
            SearchCandidate::new("p", "hi", 1e-17),
        ];
        normalize_scores(&mut results, ScoreField::Score);
        let lo = results[0].normalized_score.unwrap();
        let hi = results[1].normalized_score.unwrap();
        let expected_hi = 1.0 / (1.0 + (-1.0f64).exp());
        assert!((hi - expected_hi).abs() < 1e-9, "got {hi}");
        assert!((lo - (1.0 - expected_hi)).abs() < 1e-9, "got {lo}");
    }

    #[test]
    fn normalize_reads_the_named_field() {
        let mut a = SearchCandidate::new("p", "a", 0.0);
        a.similarity = Some(0.9);
        let mut b = SearchCandidate::new("p", "b", 0.0);
        b.similarity = Some(0.1);
        let mut results = vec![a, b];
        normalize_scores(&mut results, ScoreField::Similarity);
        assert!(results[0].normalized_score.unwrap() > results[1].normalized_score.unwrap());
    }

    #[test]
    fn freshness_bounds() {
        let half = chrono::Duration::hours(24);
        assert_eq!(freshness_boost(chrono::Duration::zero(), 1.5, half), 1.5);
        assert!((freshness_boost(half, 1.5, half) - 1.25).abs() < 1e-12);
        let ancient = freshness_boost(chrono::Duration::days(365 * 50), 1.5, half);
        assert!((ancient - 1.0).abs() < 1e-9);
        // future timestamps are not penalized
        assert_eq!(freshness_boost(chrono::Duration::hours(-3), 1.5, half), 1.5);
    }

    #[test]
    fn missing_timestamp_is_neutral() {
        let now = Utc::now();
        let mut fresh = scored("p", "fresh", "a", 0.4);
        fresh.updated_at = Some(now);
        let stale = scored("p", "none", "b", 0.4);
        let mut results = vec![fresh, stale];
        apply_freshness_boost(
            &mut results,
            FreshnessOptions {
                max_boost: 2.0,
                half_life: chrono::Duration::hours(1),
                now,
            },
        );
        assert_eq!(results[0].freshness_boost, Some(2.0));
        assert_eq!(results[0].final_score, Some(0.8));
        assert_eq!(results[1].freshness_boost, Some(1.0));
        assert_eq!(results[1].final_score, Some(0.4));
    }

    #[test]
    fn freshness_falls_back_to_normalized_then_raw_score() {
        let now = Utc::now();
        let mut n = SearchCandidate::new("p", "n", 0.2);
        n.normalized_score = Some(0.6);
        let raw = SearchCandidate::new("p", "r", 0.3);
        let mut results = vec![n, raw];
        apply_freshness_boost(
            &mut results,
            FreshnessOptions {
                max_boost: 1.5,
                half_life: chrono::Duration::hours(1),
                now,
            },
        );
        assert_eq!(results[0].final_score, Some(0.6));
        assert_eq!(results[1].final_score, Some(0.3));
    }
}

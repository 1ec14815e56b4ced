//! Rank fusion for hybrid and multi-query search.

use std::collections::{BTreeSet, HashMap};

use serde_json::json;
use tracing::warn;

use retrieval_core::{HybridConfig, Result, RetrievalError, SearchResult};

/// Parameters of weighted Reciprocal Rank Fusion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RrfParams {
    /// RRF constant. Higher values flatten the contribution curve.
    pub k: u32,
    pub dense_weight: f32,
    pub sparse_weight: f32,
}

impl RrfParams {
    fn validate(&self) -> Result<()> {
        for (name, weight) in [("dense", self.dense_weight), ("sparse", self.sparse_weight)] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(RetrievalError::invalid_argument(format!(
                    "{name} weight must be a non-negative number, got {weight}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for RrfParams {
    fn default() -> Self {
        Self {
            k: 60,
            dense_weight: 0.6,
            sparse_weight: 0.4,
        }
    }
}

impl From<&HybridConfig> for RrfParams {
    fn from(config: &HybridConfig) -> Self {
        Self {
            k: config.rrf_k,
            dense_weight: config.dense_weight,
            sparse_weight: config.sparse_weight,
        }
    }
}

/// Fuse a dense and a sparse ranking with weighted Reciprocal Rank Fusion.
///
/// A result at 0-indexed rank `r` of a list contributes
/// `weight / (k + r + 1)`; results present in both lists sum both
/// contributions. Ties keep first-appearance order (dense list first).
///
/// Invalid parameters degrade to the dense list truncated to `limit` with
/// its original scores.
pub fn reciprocal_rank_fusion(
    dense: Vec<SearchResult>,
    sparse: Vec<SearchResult>,
    limit: usize,
    params: RrfParams,
) -> Vec<SearchResult> {
    if let Err(e) = params.validate() {
        warn!("RRF fusion failed, using dense ranking: {}", e);
        let mut dense = dense;
        dense.truncate(limit);
        return dense;
    }

    let k = params.k as f32;
    let mut fused: Vec<SearchResult> = Vec::with_capacity(dense.len() + sparse.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (list, weight) in [(dense, params.dense_weight), (sparse, params.sparse_weight)] {
        for (rank, result) in list.into_iter().enumerate() {
            let contribution = weight / (k + rank as f32 + 1.0);
            match positions.get(&result.id) {
                Some(&pos) => fused[pos].score += contribution,
                None => {
                    positions.insert(result.id.clone(), fused.len());
                    fused.push(SearchResult {
                        score: contribution,
                        ..result
                    });
                }
            }
        }
    }

    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    fused.truncate(limit);
    fused
}

/// Results of one query of a multi-query search.
#[derive(Debug, Clone)]
pub struct SubqueryResults {
    pub query: String,
    pub results: Vec<SearchResult>,
}

/// Per-document accumulator for multi-query fusion.
struct FusionEntry {
    result: SearchResult,
    scores: Vec<f32>,
    queries: BTreeSet<String>,
}

/// Fuse the results of several queries into one ranking.
///
/// Results are grouped by id. Each group scores
/// `max_score + diversity_bonus * distinct_queries`, and the first-seen
/// result represents the group. `multi_query_count` (number of hits) and a
/// `score_details` breakdown are added to the metadata.
pub fn fuse_multi_query(subqueries: &[SubqueryResults], diversity_bonus: f32) -> Vec<SearchResult> {
    let mut entries: Vec<FusionEntry> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for subquery in subqueries {
        for result in &subquery.results {
            let pos = *positions.entry(result.id.as_str()).or_insert_with(|| {
                entries.push(FusionEntry {
                    result: result.clone(),
                    scores: Vec::new(),
                    queries: BTreeSet::new(),
                });
                entries.len() - 1
            });
            let entry = &mut entries[pos];
            entry.scores.push(result.score);
            entry.queries.insert(subquery.query.clone());
        }
    }

    let mut fused: Vec<SearchResult> = entries
        .into_iter()
        .map(|entry| {
            let max_score = entry.scores.iter().cloned().fold(f32::MIN, f32::max);
            let avg_score = entry.scores.iter().sum::<f32>() / entry.scores.len() as f32;
            let bonus = diversity_bonus * entry.queries.len() as f32;

            SearchResult {
                score: max_score + bonus,
                ..entry.result
            }
            .with_metadata("multi_query_count", entry.scores.len())
            .with_metadata(
                "score_details",
                json!({
                    "avg_score": avg_score,
                    "max_score": max_score,
                    "diversity_bonus": bonus,
                }),
            )
        })
        .collect();

    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(ids: &[&str]) -> Vec<SearchResult> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| SearchResult::new(*id, format!("content {id}"), 0.9 - i as f32 * 0.1))
            .collect()
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_rrf_disjoint_lists() {
        let params = RrfParams::default();
        let fused = reciprocal_rank_fusion(ranked(&["a", "b"]), ranked(&["c", "d", "e"]), 10, params);

        assert_eq!(fused.len(), 5);
        let score = |id: &str| fused.iter().find(|r| r.id == id).unwrap().score;
        assert!(close(score("a"), 0.6 / 61.0));
        assert!(close(score("b"), 0.6 / 62.0));
        assert!(close(score("c"), 0.4 / 61.0));
        assert!(close(score("e"), 0.4 / 63.0));
    }

    #[test]
    fn test_rrf_overlap_sums_contributions() {
        let params = RrfParams::default();
        let fused = reciprocal_rank_fusion(ranked(&["a", "b"]), ranked(&["a", "c"]), 10, params);

        assert_eq!(fused[0].id, "a");
        assert!(close(fused[0].score, 0.6 / 61.0 + 0.4 / 61.0));
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn test_rrf_sparse_can_outrank_dense() {
        // b is second in dense but first in sparse; a only appears in dense
        let fused = reciprocal_rank_fusion(
            ranked(&["a", "b"]),
            ranked(&["b"]),
            10,
            RrfParams::default(),
        );
        assert_eq!(fused[0].id, "b");
        assert_eq!(fused[1].id, "a");
    }

    #[test]
    fn test_rrf_truncation() {
        let fused = reciprocal_rank_fusion(
            ranked(&["a", "b", "c", "d"]),
            ranked(&["e", "f"]),
            3,
            RrfParams::default(),
        );
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn test_rrf_invalid_weights_degrade_to_dense() {
        let params = RrfParams {
            dense_weight: f32::NAN,
            ..Default::default()
        };
        let fused = reciprocal_rank_fusion(ranked(&["a", "b", "c"]), ranked(&["d"]), 2, params);

        assert_eq!(fused.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), ["a", "b"]);
        assert!(close(fused[0].score, 0.9));
    }

    #[test]
    fn test_multi_query_diversity_bonus() {
        let subqueries = vec![
            SubqueryResults {
                query: "rent cap".to_string(),
                results: vec![
                    SearchResult::new("shared", "rent cap", 0.9),
                    SearchResult::new("single", "deposit", 0.9),
                ],
            },
            SubqueryResults {
                query: "rent increase limit".to_string(),
                results: vec![SearchResult::new("shared", "rent cap", 0.5)],
            },
        ];

        let fused = fuse_multi_query(&subqueries, 0.05);

        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].id, "shared");
        assert!(close(fused[0].score, 1.0));
        assert!(close(fused[1].score, 0.95));

        assert_eq!(fused[0].metadata["multi_query_count"], 2);
        let details = &fused[0].metadata["score_details"];
        assert!(close(details["avg_score"].as_f64().unwrap() as f32, 0.7));
        assert!(close(details["max_score"].as_f64().unwrap() as f32, 0.9));
    }

    #[test]
    fn test_multi_query_repeat_hits_from_one_query() {
        // The same query twice counts one distinct source
        let subqueries = vec![
            SubqueryResults {
                query: "rent".to_string(),
                results: vec![SearchResult::new("a", "x", 0.6)],
            },
            SubqueryResults {
                query: "rent".to_string(),
                results: vec![SearchResult::new("a", "x", 0.8)],
            },
        ];

        let fused = fuse_multi_query(&subqueries, 0.05);
        assert!(close(fused[0].score, 0.85));
        assert_eq!(fused[0].metadata["multi_query_count"], 2);
    }
}

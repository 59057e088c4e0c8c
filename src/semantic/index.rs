//! Linear nearest-neighbor scan over embeddings.
//!
//! Corpora here are hundreds to low thousands of entities, so every
//! candidate is scored; there is no ANN structure.

use crate::eid::EntityId;
use crate::semantic::embeddings::Embedding;
use crate::semantic::vector::cosine_similarity;

/// Search result from a similarity scan.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub id: EntityId,
    /// Cosine similarity score (0.0 to 1.0)
    pub score: f64,
}

/// Score every candidate against `query`, keep those at or above
/// `threshold`, and return the best `limit` by descending score.
///
/// Candidates from a different model or with a different dimensionality are
/// skipped and logged.
pub fn find_similar(
    query: &Embedding,
    candidates: &[(EntityId, Embedding)],
    limit: usize,
    threshold: f64,
) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = candidates
        .iter()
        .filter_map(|(id, candidate)| {
            if candidate.model_identifier != query.model_identifier {
                log::warn!(
                    "skipping {id}: model '{}' differs from query model '{}'",
                    candidate.model_identifier,
                    query.model_identifier
                );
                return None;
            }

            match cosine_similarity(&query.vector, &candidate.vector) {
                Ok(score) if score >= threshold => Some(SearchResult {
                    id: id.clone(),
                    score,
                }),
                Ok(_) => None,
                Err(e) => {
                    log::warn!("skipping {id}: {e}");
                    None
                }
            }
        })
        .collect();

    // Sort by score descending
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    // Apply limit
    results.truncate(limit);

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn embedding(vector: Vec<f64>) -> Embedding {
        Embedding {
            vector,
            source_text: String::new(),
            content_hash: String::new(),
            model_identifier: "test-model".to_string(),
            generated_at: Utc::now(),
        }
    }

    fn candidates() -> Vec<(EntityId, Embedding)> {
        vec![
            ("orthogonal".into(), embedding(vec![0.0, 1.0, 0.0])),
            ("close".into(), embedding(vec![0.9, 0.1, 0.0])),
            ("exact".into(), embedding(vec![1.0, 0.0, 0.0])),
            ("mid".into(), embedding(vec![0.6, 0.6, 0.0])),
        ]
    }

    #[test]
    fn test_sorted_descending() {
        let query = embedding(vec![1.0, 0.0, 0.0]);
        let results = find_similar(&query, &candidates(), 10, 0.0);

        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "close", "mid", "orthogonal"]);
        assert!((results[0].score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_filters() {
        let query = embedding(vec![1.0, 0.0, 0.0]);
        let results = find_similar(&query, &candidates(), 10, 0.9);

        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "close"]);
    }

    #[test]
    fn test_limit_truncates() {
        let query = embedding(vec![1.0, 0.0, 0.0]);
        let results = find_similar(&query, &candidates(), 1, 0.0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id.as_str(), "exact");
    }

    #[test]
    fn test_incomparable_candidates_skipped() {
        let query = embedding(vec![1.0, 0.0, 0.0]);
        let mut other_model = embedding(vec![1.0, 0.0, 0.0]);
        other_model.model_identifier = "other".to_string();

        let pool = vec![
            ("wrong-dims".into(), embedding(vec![1.0, 0.0])),
            ("wrong-model".into(), other_model),
            ("ok".into(), embedding(vec![1.0, 0.0, 0.0])),
        ];

        let results = find_similar(&query, &pool, 10, 0.0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id.as_str(), "ok");
    }

    #[test]
    fn test_empty_candidates() {
        let query = embedding(vec![1.0]);
        assert!(find_similar(&query, &[], 5, 0.0).is_empty());
    }
}

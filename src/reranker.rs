use serde::Serialize;

use crate::{error::Result, vector_store::SearchResult};

/// Scores (query, document) pairs. Higher is more relevant; the range is
/// model-dependent.
pub trait RelevanceScorer: Send + Sync {
    fn model_name(&self) -> &str;

    /// One score per document, in document order.
    fn score(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>>;
}

/// A search result after reranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RerankedResult {
    /// `score` holds the rerank score once reranking applied, and `rank`
    /// the new position.
    #[serde(flatten)]
    pub result: SearchResult,
    /// `None` when the scorer failed and the original order was kept.
    pub rerank_score: Option<f32>,
    /// Rank assigned by the vector store.
    pub original_rank: usize,
}

impl RerankedResult {
    fn unchanged(result: SearchResult) -> Self {
        let original_rank = result.rank;
        Self {
            result,
            rerank_score: None,
            original_rank,
        }
    }
}

/// Reorders retrieval candidates with a relevance model.
///
/// Reranking never blocks an answer: when the scorer fails, the first
/// `top_k` candidates come back in their original order.
pub struct Reranker {
    scorer: Option<Box<dyn RelevanceScorer>>,
}

impl Reranker {
    pub fn new(scorer: Box<dyn RelevanceScorer>) -> Self {
        Self {
            scorer: Some(scorer),
        }
    }

    /// A reranker that keeps the vector store's order.
    pub fn passthrough() -> Self {
        Self { scorer: None }
    }

    pub fn model_name(&self) -> &str {
        self.scorer
            .as_deref()
            .map(|s| s.model_name())
            .unwrap_or("none")
    }

    pub fn rerank(
        &self,
        query: &str,
        candidates: Vec<SearchResult>,
        top_k: usize,
    ) -> Vec<RerankedResult> {
        let Some(scorer) = &self.scorer else {
            return fallback(candidates, top_k);
        };
        if candidates.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let documents: Vec<&str> = candidates.iter().map(|c| c.content.as_str()).collect();
        let scores = match scorer.score(query, &documents) {
            Ok(scores) if scores.len() == candidates.len() => scores,
            Ok(scores) => {
                tracing::warn!(
                    expected = candidates.len(),
                    got = scores.len(),
                    "reranker returned wrong number of scores, keeping retrieval order"
                );
                return fallback(candidates, top_k);
            }
            Err(e) => {
                tracing::warn!("reranking failed, keeping retrieval order: {e}");
                return fallback(candidates, top_k);
            }
        };

        let mut reranked: Vec<RerankedResult> = candidates
            .into_iter()
            .zip(scores)
            .map(|(mut result, score)| {
                let original_rank = result.rank;
                result.score = score;
                RerankedResult {
                    result,
                    rerank_score: Some(score),
                    original_rank,
                }
            })
            .collect();

        // Stable sort keeps retrieval order among equal scores.
        reranked.sort_by(|a, b| b.result.score.total_cmp(&a.result.score));
        reranked.truncate(top_k);
        for (i, r) in reranked.iter_mut().enumerate() {
            r.result.rank = i + 1;
        }

        tracing::debug!(
            model = scorer.model_name(),
            kept = reranked.len(),
            "reranked candidates"
        );
        reranked
    }
}

fn fallback(candidates: Vec<SearchResult>, top_k: usize) -> Vec<RerankedResult> {
    candidates
        .into_iter()
        .take(top_k)
        .map(RerankedResult::unchanged)
        .collect()
}

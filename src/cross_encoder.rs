//! Cross-encoder scoring through a text-embeddings-inference style
//! `/rerank` endpoint.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    http,
    reranker::RelevanceScorer,
};

pub struct HttpCrossEncoder {
    client: Client,
    endpoint: String,
    model: String,
    max_retries: usize,
}

impl HttpCrossEncoder {
    pub fn new(base_url: &str, model: &str, timeout: Duration, max_retries: usize) -> Result<Self> {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "reranker URL must be http(s): {base_url}"
            )));
        }
        Ok(Self {
            client: http::build_client(timeout, None)?,
            endpoint: http::endpoint(base_url, "rerank"),
            model: model.to_string(),
            max_retries,
        })
    }
}

impl RelevanceScorer for HttpCrossEncoder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn score(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let request = RerankRequest {
            query,
            texts: documents,
            truncate: true,
        };
        let resp = http::send_with_retry("rerank", self.max_retries, || {
            self.client.post(&self.endpoint).json(&request)
        })?;
        let hits: Vec<RerankHit> = resp
            .json()
            .map_err(|e| Error::Rerank(format!("malformed rerank response: {e}")))?;
        scores_in_order(hits, documents.len())
    }
}

/// The endpoint answers sorted by score; put scores back in input order.
fn scores_in_order(hits: Vec<RerankHit>, expected: usize) -> Result<Vec<f32>> {
    let mut scores = vec![None; expected];
    for hit in hits {
        let slot = scores.get_mut(hit.index).ok_or_else(|| {
            Error::Rerank(format!("rerank index {} out of range", hit.index))
        })?;
        *slot = Some(hit.score);
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| Error::Rerank(format!("no score for document {i}"))))
        .collect()
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [&'a str],
    truncate: bool,
}

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(json: &str) -> Vec<RerankHit> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn restores_input_order() {
        let scores = scores_in_order(
            hits(r#"[{"index":2,"score":0.9},{"index":0,"score":0.5},{"index":1,"score":0.1}]"#),
            3,
        )
        .unwrap();
        assert_eq!(scores, vec![0.5, 0.1, 0.9]);
    }

    #[test]
    fn missing_scores_are_errors() {
        assert!(scores_in_order(hits(r#"[{"index":0,"score":0.5}]"#), 2).is_err());
        assert!(scores_in_order(hits(r#"[{"index":5,"score":0.5}]"#), 2).is_err());
    }

    #[test]
    fn rejects_non_http_url() {
        assert!(HttpCrossEncoder::new("localhost:8080", "m", Duration::from_secs(1), 1).is_err());
    }

    #[test]
    fn unreachable_endpoint_is_an_error() {
        let encoder =
            HttpCrossEncoder::new("http://127.0.0.1:9", "m", Duration::from_secs(2), 1).unwrap();
        assert_eq!(encoder.model_name(), "m");
        assert!(encoder.score("q", &["a"]).is_err());
        assert!(encoder.score("q", &[]).unwrap().is_empty());
    }
}

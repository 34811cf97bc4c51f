use std::sync::Mutex;

use candle_core::{Device, Tensor};
use pylate_rs::ColBERT;

use crate::{
    error::{Error, Result},
    reranker::RelevanceScorer,
};

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

fn model_err(e: impl std::fmt::Display) -> Error {
    Error::Model(e.to_string())
}

fn tensor_err(e: candle_core::Error) -> Error {
    Error::Rerank(format!("tensor computation error: {e}"))
}

/// Owns a late-interaction model, loaded from the HuggingFace Hub on first
/// use.
pub struct ModelManager {
    model: Option<ColBERT>,
    model_id: String,
}

impl ModelManager {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model: None,
            model_id: model_id.into(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn ensure_loaded(&mut self) -> Result<&mut ColBERT> {
        if self.model.is_none() {
            tracing::info!(model = %self.model_id, "loading reranking model");
            let colbert: ColBERT = ColBERT::from(&self.model_id)
                .with_device(default_device())
                .try_into()
                .map_err(model_err)?;
            self.model = Some(colbert);
        }

        self.model
            .as_mut()
            .ok_or_else(|| Error::Model("model failed to load".to_string()))
    }

    /// Query token embeddings, shape `[Q, D]`.
    pub fn encode_query(&mut self, query: &str) -> Result<Tensor> {
        let model = self.ensure_loaded()?;
        let embeddings = model
            .encode(&[query.to_string()], true)
            .map_err(model_err)?;
        embeddings.squeeze(0).map_err(tensor_err)
    }

    /// Document token embeddings, shape `[B, T, D]`.
    pub fn encode_documents(&mut self, texts: &[String]) -> Result<Tensor> {
        let model = self.ensure_loaded()?;
        model.encode(texts, false).map_err(model_err)
    }

    /// MaxSim score of every document against `query`.
    pub fn score_documents(&mut self, query: &str, documents: &[&str]) -> Result<Vec<f32>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = self.encode_query(query)?;
        let texts: Vec<String> = documents.iter().map(|d| d.to_string()).collect();
        let doc_embeddings = self.encode_documents(&texts)?;

        (0..documents.len())
            .map(|i| {
                let doc = doc_embeddings.get(i).map_err(tensor_err)?;
                maxsim(&query_embedding, &doc)
            })
            .collect()
    }
}

/// Compute the MaxSim score between a query embedding and a document embedding.
///
/// query_embedding: [Q, D] where Q = query tokens, D = embedding dimension
/// doc_embedding: [T, D] where T = document tokens, D = embedding dimension
///
/// MaxSim = sum over query tokens of max(query_token . doc_token for all doc tokens)
pub fn maxsim(query_embedding: &Tensor, doc_embedding: &Tensor) -> Result<f32> {
    let sim_matrix = query_embedding
        .matmul(&doc_embedding.t().map_err(tensor_err)?)
        .map_err(tensor_err)?;

    // Best document token per query token
    let row_maxes = sim_matrix.max(1).map_err(tensor_err)?;

    row_maxes
        .sum_all()
        .map_err(tensor_err)?
        .to_scalar::<f32>()
        .map_err(tensor_err)
}

/// [`RelevanceScorer`] backed by a local ColBERT model.
pub struct ColbertScorer {
    model_id: String,
    manager: Mutex<ModelManager>,
}

impl ColbertScorer {
    pub fn new(model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        Self {
            manager: Mutex::new(ModelManager::new(model_id.clone())),
            model_id,
        }
    }
}

impl RelevanceScorer for ColbertScorer {
    fn model_name(&self) -> &str {
        &self.model_id
    }

    fn score(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>> {
        let mut manager = self
            .manager
            .lock()
            .map_err(|_| Error::Model("model lock poisoned".to_string()))?;
        manager.score_documents(query, documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tensor(data: &[f32], shape: (usize, usize)) -> Tensor {
        Tensor::from_vec(data.to_vec(), shape, &Device::Cpu).unwrap()
    }

    #[test]
    fn not_loaded_until_used() {
        let manager = ModelManager::new("custom/model");
        assert_eq!(manager.model_id(), "custom/model");
        assert!(!manager.is_loaded());
    }

    #[test]
    fn scorer_reports_model() {
        let scorer = ColbertScorer::new("lightonai/GTE-ModernColBERT-v1");
        assert_eq!(scorer.model_name(), "lightonai/GTE-ModernColBERT-v1");
    }

    #[test]
    fn empty_documents_skip_loading() {
        let scorer = ColbertScorer::new("does/not-exist");
        assert!(scorer.score("q", &[]).unwrap().is_empty());
    }

    #[test]
    fn maxsim_identical_vectors() {
        let q = make_tensor(&[1.0, 0.0, 0.0], (1, 3));
        let d = make_tensor(&[1.0, 0.0, 0.0], (1, 3));
        let score = maxsim(&q, &d).unwrap();
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn maxsim_orthogonal_vectors() {
        let q = make_tensor(&[1.0, 0.0, 0.0], (1, 3));
        let d = make_tensor(&[0.0, 1.0, 0.0], (1, 3));
        let score = maxsim(&q, &d).unwrap();
        assert!(score.abs() < 1e-6);
    }

    #[test]
    fn maxsim_multiple_query_tokens() {
        // Row maxes are [1.0, 1.0]
        let q = make_tensor(&[1.0, 0.0, 0.0, 1.0], (2, 2));
        let d = make_tensor(&[1.0, 0.0, 0.0, 1.0, 0.5, 0.5], (3, 2));
        let score = maxsim(&q, &d).unwrap();
        assert!((score - 2.0).abs() < 1e-6);
    }
}

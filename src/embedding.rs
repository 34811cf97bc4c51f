//! Dense text embeddings from an OpenAI-compatible endpoint.

use reqwest::{blocking::Client, header::AUTHORIZATION};
use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    error::{Error, Result},
    http,
};

/// Maps text to fixed-length vectors.
///
/// Implementations never fail a whole batch: a text that cannot be embedded
/// comes back as an empty vector in its slot.
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// One vector per input, in input order.
    fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>>;

    fn embed(&self, text: &str) -> Vec<f32> {
        self.embed_batch(&[text]).into_iter().next().unwrap_or_default()
    }
}

/// Blocking client for `POST {base_url}/embeddings`.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    max_retries: usize,
    batch_size: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config.require_openai_key()?;
        let bearer = format!("Bearer {}", api_key.trim());
        let client = http::build_client(config.request_timeout, Some((AUTHORIZATION, &bearer)))?;
        Ok(Self {
            client,
            endpoint: http::endpoint(&config.openai_base_url, "embeddings"),
            model: config.embedding_model.clone(),
            dimensions: config.embedding_dimensions,
            max_retries: config.max_retries,
            batch_size: config.embed_batch_size.max(1),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embed a batch in one request. Fails if the response is short or any
    /// vector has the wrong dimension.
    pub fn try_embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            // Older models reject the parameter.
            dimensions: self
                .model
                .starts_with("text-embedding-3")
                .then_some(self.dimensions),
        };
        let resp = http::send_with_retry("embeddings", self.max_retries, || {
            self.client.post(&self.endpoint).json(&request)
        })?;
        let mut parsed: EmbeddingResponse = resp
            .json()
            .map_err(|e| Error::Embedding(format!("malformed embedding response: {e}")))?;

        parsed.data.sort_by_key(|entry| entry.index);
        if parsed.data.len() != inputs.len() {
            return Err(Error::Embedding(format!(
                "service returned {} embeddings for {} inputs",
                parsed.data.len(),
                inputs.len()
            )));
        }
        if let Some(bad) = parsed
            .data
            .iter()
            .find(|entry| entry.embedding.len() != self.dimensions)
        {
            return Err(Error::Embedding(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                bad.embedding.len()
            )));
        }
        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }

    /// Embed one request worth of texts, falling back to one request per
    /// text when the batch call fails.
    fn embed_request(&self, inputs: &[&str]) -> Vec<Vec<f32>> {
        match self.try_embed_batch(inputs) {
            Ok(vectors) => vectors,
            Err(e) if inputs.len() == 1 => {
                tracing::warn!("embedding failed: {e}");
                vec![Vec::new()]
            }
            Err(e) => {
                tracing::warn!(
                    batch = inputs.len(),
                    "batch embedding failed, retrying per item: {e}"
                );
                inputs
                    .iter()
                    .map(|text| match self.try_embed_batch(&[*text]) {
                        Ok(mut v) => v.pop().unwrap_or_default(),
                        Err(e) => {
                            tracing::warn!("embedding failed: {e}");
                            Vec::new()
                        }
                    })
                    .collect()
            }
        }
    }
}

impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        let mut out = vec![Vec::new(); texts.len()];

        // The API rejects empty strings; those slots stay empty.
        let pending: Vec<usize> = (0..texts.len())
            .filter(|&i| !texts[i].trim().is_empty())
            .collect();

        for group in pending.chunks(self.batch_size) {
            let inputs: Vec<&str> = group.iter().map(|&i| texts[i]).collect();
            for (&i, vector) in group.iter().zip(self.embed_request(&inputs)) {
                out[i] = vector;
            }
        }
        out
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

//! The storage contract shared by the embedded and remote vector stores.

use serde::Serialize;

use crate::{
    chunking::Document,
    error::Result,
    record::{MetaValue, Metadata, sanitize_metadata},
};

/// Payload key holding the chunk text.
pub const CONTENT_KEY: &str = "content";
/// Payload key holding the chunk's string id.
pub const CHUNK_KEY: &str = "chunk_key";
pub const SOURCE_KEY: &str = "source";

/// One (id, vector, payload) triple as written to a store.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: u64,
    pub vector: Vec<f32>,
    /// Sanitized metadata plus content, source and chunk key.
    pub payload: Metadata,
}

impl Point {
    pub fn from_document(document: &Document, vector: Vec<f32>) -> Self {
        let mut payload = sanitize_metadata(&document.metadata);
        payload.insert(CONTENT_KEY.into(), MetaValue::from(document.content.as_str()));
        payload.insert(SOURCE_KEY.into(), MetaValue::from(document.source.as_str()));
        payload.insert(CHUNK_KEY.into(), MetaValue::from(document.id.as_str()));
        Self {
            id: document.chunk_id().numeric,
            vector,
            payload,
        }
    }

    pub fn chunk_key(&self) -> &str {
        self.payload
            .get(CHUNK_KEY)
            .and_then(MetaValue::as_str)
            .unwrap_or_default()
    }
}

/// A retrieved chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// Chunk id, `"{record_id}_chunk_{index}"`.
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    /// Similarity in `[0, 1]`, 1 being identical.
    pub score: f32,
    /// 1-based.
    pub rank: usize,
}

impl SearchResult {
    /// Rebuild a result from a stored payload. `rank` is assigned later.
    pub fn from_payload(mut payload: Metadata, score: f32) -> Self {
        let content = payload
            .remove(CONTENT_KEY)
            .map(|v| v.to_string())
            .unwrap_or_default();
        let id = payload
            .remove(CHUNK_KEY)
            .map(|v| v.to_string())
            .unwrap_or_default();
        Self {
            id,
            content,
            metadata: payload,
            score: normalize_similarity(score),
            rank: 0,
        }
    }

    pub fn source(&self) -> &str {
        self.meta_str(SOURCE_KEY).unwrap_or("unknown")
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(MetaValue::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Equality conjunction over metadata fields.
///
/// # Examples
///
/// ```
/// use campusrag::record::{MetaValue, Metadata};
/// use campusrag::vector_store::MetadataFilter;
///
/// let filter = MetadataFilter::new().equals("source", "forum").equals("score", 3i64);
///
/// let mut meta = Metadata::new();
/// meta.insert("source".into(), MetaValue::from("forum"));
/// meta.insert("score".into(), MetaValue::Float(3.0));
/// assert!(filter.matches(&meta));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    conditions: Vec<(String, MetaValue)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.conditions.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &[(String, MetaValue)] {
        &self.conditions
    }

    /// Values are compared after sanitizing, the same form stores hold.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions.iter().all(|(key, expected)| {
            metadata
                .get(key)
                .is_some_and(|actual| actual.sanitized().matches(&expected.sanitized()))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub backend: String,
    pub collection_name: String,
    pub total_documents: usize,
    pub vector_size: usize,
    pub distance: String,
}

/// Outcome of [`VectorStore::add`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddReport {
    pub stored: usize,
    /// Pairs without an embedding.
    pub skipped: usize,
    /// Points that failed even when written alone.
    pub failed: usize,
}

/// A named collection of (id, vector, payload) points.
///
/// Backends create their collection on first use. Scores returned by
/// `search` are similarities in `[0, 1]` regardless of the native metric.
pub trait VectorStore: Send + Sync {
    /// Short backend name for stats and logs.
    fn backend(&self) -> &'static str;

    fn collection_name(&self) -> &str;

    /// Points per write.
    fn batch_size(&self) -> usize;

    /// Write all points or none of them.
    fn upsert(&self, points: &[Point]) -> Result<()>;

    /// At most `top_k` results, best first, ranks starting at 1.
    fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>>;

    fn stats(&self) -> Result<StoreStats>;

    /// Remove every point, keeping the collection.
    fn clear(&self) -> Result<()>;

    /// Drop the collection entirely.
    fn delete_collection(&self) -> Result<()>;

    /// Pair documents with embeddings by index and write them in batches.
    ///
    /// Pairs with an empty or missing embedding are skipped. A failed
    /// batch is retried one point at a time so a single bad point does not
    /// lose its neighbours.
    fn add(&self, documents: &[Document], embeddings: &[Vec<f32>]) -> AddReport {
        let mut report = AddReport::default();
        let mut points = Vec::with_capacity(documents.len());

        for (i, document) in documents.iter().enumerate() {
            match embeddings.get(i) {
                Some(vector) if !vector.is_empty() => {
                    points.push(Point::from_document(document, vector.clone()));
                }
                _ => {
                    tracing::warn!(chunk = %document.id, "skipping chunk without embedding");
                    report.skipped += 1;
                }
            }
        }

        let batch_size = self.batch_size().max(1);
        let batches = points.len().div_ceil(batch_size);
        for (n, batch) in points.chunks(batch_size).enumerate() {
            match self.upsert(batch) {
                Ok(()) => {
                    report.stored += batch.len();
                    tracing::debug!(
                        collection = self.collection_name(),
                        batch = n + 1,
                        of = batches,
                        points = batch.len(),
                        "stored batch"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        collection = self.collection_name(),
                        batch = n + 1,
                        "batch write failed, retrying per point: {e}"
                    );
                    for point in batch {
                        match self.upsert(std::slice::from_ref(point)) {
                            Ok(()) => report.stored += 1,
                            Err(e) => {
                                tracing::error!(chunk = point.chunk_key(), "failed to store point: {e}");
                                report.failed += 1;
                            }
                        }
                    }
                }
            }
        }

        report
    }
}

/// Clamp a backend score into `[0, 1]`.
pub fn normalize_similarity(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Cosine similarity; zero vectors are dissimilar to everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Sort best first, cap at `top_k` and number ranks from 1.
pub fn rank_results(mut results: Vec<SearchResult>, top_k: usize) -> Vec<SearchResult> {
    results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    results.truncate(top_k);
    for (i, result) in results.iter_mut().enumerate() {
        result.rank = i + 1;
    }
    results
}

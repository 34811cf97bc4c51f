//! Remote vector store backed by the Qdrant REST API.

use std::sync::atomic::{AtomicBool, Ordering};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::{
    blocking::Client,
    header::HeaderName,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    config::Config,
    error::{Error, Result},
    http,
    record::{MetaValue, Metadata, metadata_from_json},
    vector_store::{MetadataFilter, Point, SearchResult, StoreStats, VectorStore, rank_results},
};

/// Characters escaped in collection names; `-` and `_` pass through.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

const DISTANCE: &str = "Cosine";

pub struct QdrantStore {
    client: Client,
    base_url: String,
    collection: String,
    dimension: usize,
    batch_size: usize,
    max_retries: usize,
    provisioned: AtomicBool,
}

impl QdrantStore {
    pub fn new(config: &Config) -> Result<Self> {
        let auth = config
            .qdrant_api_key
            .as_deref()
            .map(|key| (HeaderName::from_static("api-key"), key));
        let client = http::build_client(config.request_timeout, auth)?;
        Ok(Self {
            client,
            base_url: config.qdrant_url.trim_end_matches('/').to_string(),
            collection: config.collection_name.clone(),
            dimension: config.embedding_dimensions,
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            provisioned: AtomicBool::new(false),
        })
    }

    fn collection_url(&self, suffix: &str) -> String {
        let name = utf8_percent_encode(&self.collection, PATH_SEGMENT);
        format!("{}/collections/{name}{suffix}", self.base_url)
    }

    fn get_collection(&self) -> Result<Option<CollectionInfo>> {
        let url = self.collection_url("");
        match http::send_with_retry("qdrant", self.max_retries, || self.client.get(&url)) {
            Ok(resp) => {
                let body: QdrantResponse<CollectionInfo> = resp.json()?;
                Ok(Some(body.result))
            }
            Err(Error::Upstream { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create_collection(&self) -> Result<()> {
        let url = self.collection_url("");
        let body = json!({
            "vectors": { "size": self.dimension, "distance": DISTANCE }
        });
        http::send_with_retry("qdrant", self.max_retries, || self.client.put(&url).json(&body))?;
        Ok(())
    }

    /// Create the collection on first use; an existing one is reused.
    fn ensure_collection(&self) -> Result<()> {
        if self.provisioned.load(Ordering::Acquire) {
            return Ok(());
        }
        match self.get_collection()? {
            Some(info) => {
                if let Some(size) = info.vector_size()
                    && size != self.dimension
                {
                    return Err(Error::Store(format!(
                        "collection {} holds {size}-dimensional vectors, expected {}",
                        self.collection, self.dimension
                    )));
                }
                tracing::debug!(collection = %self.collection, "using existing collection");
            }
            None => {
                self.create_collection()?;
                tracing::info!(
                    collection = %self.collection,
                    dimension = self.dimension,
                    "created collection"
                );
            }
        }
        self.provisioned.store(true, Ordering::Release);
        Ok(())
    }
}

impl VectorStore for QdrantStore {
    fn backend(&self) -> &'static str {
        "qdrant"
    }

    fn collection_name(&self) -> &str {
        &self.collection
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn upsert(&self, points: &[Point]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        self.ensure_collection()?;

        let body = UpsertRequest {
            points: points
                .iter()
                .map(|p| QdrantPoint {
                    id: p.id,
                    vector: &p.vector,
                    payload: &p.payload,
                })
                .collect(),
        };
        let url = self.collection_url("/points?wait=true");
        http::send_with_retry("qdrant", self.max_retries, || self.client.put(&url).json(&body))?;
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        if top_k == 0 || query.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_collection()?;

        let mut body = json!({
            "vector": query,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = filter_json(filter);
        }

        let url = self.collection_url("/points/search");
        let resp =
            http::send_with_retry("qdrant", self.max_retries, || self.client.post(&url).json(&body))?;
        let parsed: QdrantResponse<Vec<ScoredPoint>> = resp.json()?;

        let results = parsed
            .result
            .into_iter()
            .map(ScoredPoint::into_result)
            .collect();
        Ok(rank_results(results, top_k))
    }

    fn stats(&self) -> Result<StoreStats> {
        let info = self.get_collection()?;
        Ok(StoreStats {
            backend: self.backend().to_string(),
            collection_name: self.collection.clone(),
            total_documents: info
                .as_ref()
                .and_then(|i| i.points_count)
                .unwrap_or_default(),
            vector_size: info
                .as_ref()
                .and_then(CollectionInfo::vector_size)
                .unwrap_or(self.dimension),
            distance: DISTANCE.to_lowercase(),
        })
    }

    fn clear(&self) -> Result<()> {
        self.delete_collection()?;
        self.ensure_collection()?;
        tracing::info!(collection = %self.collection, "cleared collection");
        Ok(())
    }

    fn delete_collection(&self) -> Result<()> {
        let url = self.collection_url("");
        match http::send_with_retry("qdrant", self.max_retries, || self.client.delete(&url)) {
            Ok(_) | Err(Error::Upstream { status: 404, .. }) => {}
            Err(e) => return Err(e),
        }
        self.provisioned.store(false, Ordering::Release);
        tracing::info!(collection = %self.collection, "deleted collection");
        Ok(())
    }
}

/// Translate an equality conjunction into a Qdrant `must` filter.
///
/// Qdrant only matches keywords, integers and booleans exactly; floats
/// become a closed range on the same value.
fn filter_json(filter: &MetadataFilter) -> Value {
    let must: Vec<Value> = filter
        .conditions()
        .iter()
        .map(|(key, value)| match value.sanitized() {
            MetaValue::Float(f) => json!({ "key": key, "range": { "gte": f, "lte": f } }),
            other => json!({ "key": key, "match": { "value": other } }),
        })
        .collect();
    json!({ "must": must })
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    points: Vec<QdrantPoint<'a>>,
}

#[derive(Serialize)]
struct QdrantPoint<'a> {
    id: u64,
    vector: &'a [f32],
    payload: &'a Metadata,
}

#[derive(Debug, Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: Option<serde_json::Map<String, Value>>,
}

impl ScoredPoint {
    fn into_result(self) -> SearchResult {
        let payload = self
            .payload
            .as_ref()
            .map(metadata_from_json)
            .unwrap_or_default();
        SearchResult::from_payload(payload, self.score)
    }
}

#[derive(Debug, Default, Deserialize)]
struct CollectionInfo {
    #[serde(default)]
    points_count: Option<usize>,
    #[serde(default)]
    config: Option<Value>,
}

impl CollectionInfo {
    fn vector_size(&self) -> Option<usize> {
        self.config
            .as_ref()?
            .pointer("/params/vectors/size")?
            .as_u64()
            .map(|n| n as usize)
    }
}

//! Runtime configuration.
//!
//! Values start from built-in defaults, are overridden by `CAMPUSRAG_*`
//! environment variables (plus the conventional `OPENAI_API_KEY`,
//! `QDRANT_URL` and `QDRANT_API_KEY`), and finally by CLI flags.

use std::{str::FromStr, time::Duration};

use crate::error::{Error, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
/// Output dimension of `text-embedding-3-small`.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;
pub const DEFAULT_LLM_MODEL: &str = "gpt-4";
pub const DEFAULT_COLLECTION: &str = "university_rag";
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 64;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6333";
pub const DEFAULT_COLBERT_MODEL: &str = "lightonai/GTE-ModernColBERT-v1";
pub const DEFAULT_CROSS_ENCODER_MODEL: &str =
    "cross-encoder/ms-marco-MiniLM-L-6-v2";

/// Which physical vector store backs the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Embedded redb file under the data directory.
    Local,
    /// Remote Qdrant cluster over its REST API.
    Qdrant,
}

impl FromStr for StoreBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "embedded" | "redb" => Ok(Self::Local),
            "qdrant" | "remote" => Ok(Self::Qdrant),
            other => Err(Error::Config(format!(
                "unknown vector store backend '{other}' (expected local or qdrant)"
            ))),
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Qdrant => f.write_str("qdrant"),
        }
    }
}

/// Which relevance model the reranker uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerankerKind {
    /// Local ColBERT late-interaction model.
    Colbert,
    /// Remote cross-encoder behind a `/rerank` endpoint.
    Http,
    /// Keep vector-search order.
    None,
}

impl FromStr for RerankerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "colbert" | "local" => Ok(Self::Colbert),
            "http" | "cross-encoder" | "tei" => Ok(Self::Http),
            "none" | "off" => Ok(Self::None),
            other => Err(Error::Config(format!(
                "unknown reranker '{other}' (expected colbert, http or none)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    /// Texts per embedding request.
    pub embed_batch_size: usize,
    pub llm_model: String,
    pub collection_name: String,
    /// Points per vector store write.
    pub batch_size: usize,
    pub backend: StoreBackend,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub reranker: RerankerKind,
    pub reranker_model: String,
    pub reranker_url: Option<String>,
    pub request_timeout: Duration,
    pub max_retries: usize,
    /// Size of the ingestion worker pool.
    pub workers: usize,
    pub show_progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            collection_name: DEFAULT_COLLECTION.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            backend: StoreBackend::Local,
            qdrant_url: DEFAULT_QDRANT_URL.to_string(),
            qdrant_api_key: None,
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            reranker: RerankerKind::Colbert,
            reranker_model: DEFAULT_COLBERT_MODEL.to_string(),
            reranker_url: None,
            request_timeout: Duration::from_secs(60),
            max_retries: 3,
            workers: 4,
            show_progress: false,
        }
    }
}

impl Config {
    /// Build a configuration from defaults and environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("CAMPUSRAG_CHUNK_SIZE") {
            config.chunk_size = parse_var("CAMPUSRAG_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = get("CAMPUSRAG_CHUNK_OVERLAP") {
            config.chunk_overlap = parse_var("CAMPUSRAG_CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = get("CAMPUSRAG_EMBEDDING_MODEL") {
            config.embedding_model = v;
        }
        if let Some(v) = get("CAMPUSRAG_EMBEDDING_DIMENSIONS") {
            config.embedding_dimensions =
                parse_var("CAMPUSRAG_EMBEDDING_DIMENSIONS", &v)?;
        }
        if let Some(v) = get("CAMPUSRAG_EMBED_BATCH_SIZE") {
            config.embed_batch_size =
                parse_var("CAMPUSRAG_EMBED_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("CAMPUSRAG_LLM_MODEL") {
            config.llm_model = v;
        }
        if let Some(v) = get("CAMPUSRAG_COLLECTION") {
            config.collection_name = v;
        }
        if let Some(v) = get("CAMPUSRAG_BATCH_SIZE") {
            config.batch_size = parse_var("CAMPUSRAG_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("CAMPUSRAG_BACKEND") {
            config.backend = v.parse()?;
        }
        if let Some(v) = get("QDRANT_URL") {
            config.qdrant_url = v;
        }
        config.qdrant_api_key = get("QDRANT_API_KEY");
        config.openai_api_key = get("OPENAI_API_KEY");
        if let Some(v) = get("OPENAI_BASE_URL") {
            config.openai_base_url = v;
        }
        if let Some(v) = get("CAMPUSRAG_RERANKER") {
            config.reranker = v.parse()?;
            if config.reranker == RerankerKind::Http {
                config.reranker_model = DEFAULT_CROSS_ENCODER_MODEL.to_string();
            }
        }
        if let Some(v) = get("CAMPUSRAG_RERANKER_MODEL") {
            config.reranker_model = v;
        }
        config.reranker_url = get("CAMPUSRAG_RERANKER_URL");
        if let Some(v) = get("CAMPUSRAG_TIMEOUT_SECS") {
            let secs: u64 = parse_var("CAMPUSRAG_TIMEOUT_SECS", &v)?;
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = get("CAMPUSRAG_MAX_RETRIES") {
            config.max_retries = parse_var("CAMPUSRAG_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("CAMPUSRAG_WORKERS") {
            config.workers = parse_var("CAMPUSRAG_WORKERS", &v)?;
        }

        Ok(config)
    }

    /// Check every setting the ingestion and query paths depend on.
    pub fn validate(&self) -> Result<()> {
        self.validate_store()?;
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk size must be positive".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::Config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.embed_batch_size == 0 {
            return Err(Error::Config("batch sizes must be positive".into()));
        }
        if self.workers == 0 {
            return Err(Error::Config("worker count must be positive".into()));
        }
        if self.reranker == RerankerKind::Http && self.reranker_url.is_none() {
            return Err(Error::Config(
                "CAMPUSRAG_RERANKER_URL is required for the http reranker"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Check only the settings needed to open the vector store, for the
    /// `stats` and `clear` paths.
    pub fn validate_store(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch sizes must be positive".into()));
        }
        if self.embedding_dimensions == 0 {
            return Err(Error::Config(
                "embedding dimensions must be positive".into(),
            ));
        }
        if self.collection_name.trim().is_empty() {
            return Err(Error::Config("collection name is required".into()));
        }
        Ok(())
    }

    /// The OpenAI key, required by the ingestion and query paths.
    pub fn require_openai_key(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                Error::Config(
                    "OPENAI_API_KEY environment variable is required".into(),
                )
            })
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!("invalid value for {key}: '{value}'"))
    })
}

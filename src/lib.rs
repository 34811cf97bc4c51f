//! campusrag - retrieval-augmented question answering over university
//! web pages and student forum posts.
//!
//! Records exported by scrapers as JSON Lines are split into overlapping
//! chunks, scored for quality, embedded and stored in a vector collection,
//! either an embedded [redb](https://github.com/cberner/redb) file or a
//! remote [Qdrant](https://qdrant.tech) cluster. Questions are embedded,
//! matched against the collection, reranked with a
//! [ColBERT](https://github.com/stanford-futuredata/ColBERT) model or an
//! HTTP cross-encoder, and answered by a chat model from the best chunks.
//!
//! # Quick start
//!
//! ```no_run
//! use campusrag::{Config, DataDir, RagPipeline};
//!
//! let config = Config::from_env().unwrap();
//! let data_dir = DataDir::resolve(None).unwrap();
//! let rag = RagPipeline::from_config(config, data_dir).unwrap();
//!
//! rag.ingest(&["web".to_string(), "forum".to_string()]).unwrap();
//!
//! let response = rag.query("Where can I get tutoring for calculus?", 5);
//! println!("{}", response.answer);
//! for source in &response.sources {
//!     println!("  {} ({:.3}) {}", source.title, source.score, source.url);
//! }
//! ```

pub mod chunking;
pub mod config;
pub mod cross_encoder;
pub mod data_dir;
pub mod doc_id;
pub mod embedding;
pub mod error;
pub mod http;
pub mod insight;
pub mod llm;
pub mod local_store;
pub mod model_manager;
pub mod pipeline;
pub mod processor;
pub mod qdrant_store;
pub mod quality;
pub mod record;
pub mod reranker;
pub mod text_util;
pub mod vector_store;

pub use chunking::{Chunker, ChunkingConfig, Document};
pub use config::Config;
pub use data_dir::DataDir;
pub use doc_id::ChunkId;
pub use embedding::{Embedder, OpenAiEmbedder};
pub use error::{Error, Result};
pub use llm::{AnswerGenerator, OpenAiChat};
pub use local_store::LocalStore;
pub use model_manager::ModelManager;
pub use pipeline::{QueryResponse, RagPipeline};
pub use qdrant_store::QdrantStore;
pub use record::{MetaValue, Metadata, RawRecord};
pub use reranker::{RelevanceScorer, Reranker};
pub use vector_store::{SearchResult, VectorStore};

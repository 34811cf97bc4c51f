//! Ingestion and query orchestration.

use std::{path::Path, sync::Mutex};

use kdam::{Bar, BarExt, tqdm};
use rayon::prelude::*;
use serde::Serialize;

use crate::{
    chunking::{Chunker, ChunkingConfig, Document},
    config::{Config, RerankerKind, StoreBackend},
    cross_encoder::HttpCrossEncoder,
    data_dir::DataDir,
    embedding::{Embedder, OpenAiEmbedder},
    error::{Error, Result},
    llm::{AnswerGenerator, OpenAiChat},
    local_store::LocalStore,
    model_manager::ColbertScorer,
    processor,
    qdrant_store::QdrantStore,
    record::{RecordFile, latest_file},
    reranker::{RerankedResult, Reranker},
    text_util::{self, DEFAULT_PREVIEW_CHARS},
    vector_store::{MetadataFilter, StoreStats, VectorStore},
};

pub const DEFAULT_TOP_K: usize = 5;

/// Answer when the question could not be embedded.
pub const EMBEDDING_FAILED_ANSWER: &str =
    "I'm sorry, I couldn't process your question right now. Please try again later.";
/// Answer when retrieval found nothing.
pub const NO_RESULTS_ANSWER: &str =
    "I couldn't find any relevant information to answer your question.";

const NO_TITLE: &str = "No Title";

/// A retrieved source as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub title: String,
    pub url: String,
    pub score: f32,
    pub source: String,
    pub content_preview: String,
}

impl From<&RerankedResult> for SourceRef {
    fn from(r: &RerankedResult) -> Self {
        Self {
            title: r.result.meta_str("title").unwrap_or(NO_TITLE).to_string(),
            url: r.result.meta_str("url").unwrap_or_default().to_string(),
            score: r.result.score,
            source: r.result.source().to_string(),
            content_preview: text_util::preview(&r.result.content, DEFAULT_PREVIEW_CHARS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub question: String,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    /// The context handed to the generator.
    pub context: String,
}

impl QueryResponse {
    fn without_sources(question: &str, answer: &str) -> Self {
        Self {
            question: question.to_string(),
            answer: answer.to_string(),
            sources: Vec::new(),
            context: String::new(),
        }
    }
}

/// Counts from one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub files: usize,
    pub records: usize,
    /// Records dropped for lacking an id.
    pub rejected: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub stored: usize,
    /// Chunks skipped for lack of an embedding.
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    pub vector_store: StoreStats,
    pub embedding_model: String,
    pub llm_model: String,
    pub reranker_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl PipelineStats {
    /// Stats from configuration alone, for callers without credentials.
    pub fn from_config(config: &Config, vector_store: StoreStats) -> Self {
        let reranker_model = match config.reranker {
            RerankerKind::None => "none".to_string(),
            _ => config.reranker_model.clone(),
        };
        Self {
            vector_store,
            embedding_model: config.embedding_model.clone(),
            llm_model: config.llm_model.clone(),
            reranker_model,
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }
}

/// Open the configured vector store.
pub fn store_from_config(config: &Config, data_dir: &DataDir) -> Result<Box<dyn VectorStore>> {
    Ok(match config.backend {
        StoreBackend::Local => Box::new(LocalStore::open(
            &data_dir.vector_db(&config.collection_name)?,
            &config.collection_name,
            config.embedding_dimensions,
            config.batch_size,
        )?),
        StoreBackend::Qdrant => Box::new(QdrantStore::new(config)?),
    })
}

pub fn reranker_from_config(config: &Config) -> Result<Reranker> {
    Ok(match config.reranker {
        RerankerKind::Colbert => Reranker::new(Box::new(ColbertScorer::new(&config.reranker_model))),
        RerankerKind::Http => {
            let url = config.reranker_url.as_deref().ok_or_else(|| {
                Error::Config("the http reranker needs CAMPUSRAG_RERANKER_URL".into())
            })?;
            Reranker::new(Box::new(HttpCrossEncoder::new(
                url,
                &config.reranker_model,
                config.request_timeout,
                config.max_retries,
            )?))
        }
        RerankerKind::None => Reranker::passthrough(),
    })
}

/// Optional progress bar shared by pool workers.
struct Progress(Option<Mutex<Bar>>);

impl Progress {
    fn new(enabled: bool, total: usize, desc: &str) -> Self {
        if !enabled || total == 0 {
            return Self(None);
        }
        Self(Some(Mutex::new(tqdm!(total = total, desc = desc.to_string()))))
    }

    fn tick(&self) {
        if let Some(bar) = &self.0
            && let Ok(mut bar) = bar.lock()
        {
            let _ = bar.update(1);
        }
    }

    fn finish(self) {
        if self.0.is_some() {
            eprintln!();
        }
    }
}

/// The retrieval-augmented question answering pipeline.
///
/// Every collaborator is injected; [`RagPipeline::from_config`] builds the
/// production set.
pub struct RagPipeline {
    config: Config,
    data_dir: DataDir,
    chunker: Chunker,
    embedder: Box<dyn Embedder>,
    store: Box<dyn VectorStore>,
    reranker: Reranker,
    generator: Box<dyn AnswerGenerator>,
    pool: rayon::ThreadPool,
}

impl RagPipeline {
    pub fn new(
        config: Config,
        data_dir: DataDir,
        embedder: Box<dyn Embedder>,
        store: Box<dyn VectorStore>,
        reranker: Reranker,
        generator: Box<dyn AnswerGenerator>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("campusrag-worker-{i}"))
            .build()
            .map_err(|e| Error::Config(format!("failed to start worker pool: {e}")))?;
        let chunker = Chunker::new(ChunkingConfig {
            chunk_size: config.chunk_size,
            overlap: config.chunk_overlap,
        });

        Ok(Self {
            config,
            data_dir,
            chunker,
            embedder,
            store,
            reranker,
            generator,
            pool,
        })
    }

    /// Build the pipeline with OpenAI clients and the configured store and
    /// reranker. Fails without an OpenAI key.
    pub fn from_config(config: Config, data_dir: DataDir) -> Result<Self> {
        config.validate()?;
        let embedder = OpenAiEmbedder::new(&config)?;
        let generator = OpenAiChat::new(&config)?;
        let store = store_from_config(&config, &data_dir)?;
        let reranker = reranker_from_config(&config)?;
        Self::new(
            config,
            data_dir,
            Box::new(embedder),
            store,
            reranker,
            Box::new(generator),
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    /// Ingest the latest export of each named source from
    /// `<data dir>/raw/<source>/`.
    ///
    /// Missing sources and unreadable files are logged and skipped.
    pub fn ingest(&self, sources: &[String]) -> Result<IngestReport> {
        let mut files = Vec::new();
        for source in sources {
            let dir = self.data_dir.raw_dir(source);
            match latest_file(&dir)? {
                Some(path) => {
                    tracing::info!(source = %source, path = %path.display(), "found export");
                    files.push((source.as_str(), RecordFile::new(path)));
                }
                None => {
                    tracing::warn!(source = %source, dir = %dir.display(), "no records found for source");
                }
            }
        }

        let processed: Vec<_> = self.pool.install(|| {
            files
                .par_iter()
                .filter_map(|(source, file)| {
                    match processor::process_file(file, source, &self.chunker) {
                        Ok(p) => {
                            tracing::info!(
                                source = %source,
                                records = p.records,
                                chunks = p.documents.len(),
                                "processed file"
                            );
                            Some(p)
                        }
                        Err(e) => {
                            tracing::error!(path = %file.path().display(), "failed to process file: {e}");
                            None
                        }
                    }
                })
                .collect()
        });

        let mut report = IngestReport {
            files: processed.len(),
            ..IngestReport::default()
        };
        let mut documents = Vec::new();
        for p in processed {
            report.records += p.records;
            report.rejected += p.rejected;
            documents.extend(p.documents);
        }
        if documents.is_empty() {
            tracing::warn!("no documents to ingest");
            return Ok(report);
        }

        self.store_documents(&documents, &mut report);
        Ok(report)
    }

    /// Ingest one explicit JSON Lines file under the given source tag.
    pub fn ingest_file(&self, path: &Path, source: &str) -> Result<IngestReport> {
        if !path.is_file() {
            return Err(Error::NotFound {
                kind: "file",
                name: path.display().to_string(),
            });
        }
        let processed = self.pool.install(|| {
            processor::process_file(&RecordFile::new(path), source, &self.chunker)
        })?;

        let mut report = IngestReport {
            files: 1,
            records: processed.records,
            rejected: processed.rejected,
            ..IngestReport::default()
        };
        if processed.documents.is_empty() {
            tracing::warn!(path = %path.display(), "no documents to ingest");
            return Ok(report);
        }
        self.store_documents(&processed.documents, &mut report);
        Ok(report)
    }

    fn store_documents(&self, documents: &[Document], report: &mut IngestReport) {
        report.chunks += documents.len();

        let embeddings = self.embed_documents(documents);
        report.embedded += embeddings.iter().filter(|v| !v.is_empty()).count();

        let added = self.store.add(documents, &embeddings);
        report.stored += added.stored;
        report.skipped += added.skipped;
        report.failed += added.failed;

        tracing::info!(
            collection = self.store.collection_name(),
            chunks = report.chunks,
            stored = report.stored,
            skipped = report.skipped,
            failed = report.failed,
            "ingestion finished"
        );
    }

    /// Embed every document, one request per batch, batches spread over
    /// the worker pool. Output order matches `documents`.
    fn embed_documents(&self, documents: &[Document]) -> Vec<Vec<f32>> {
        let texts: Vec<String> = documents.iter().map(Document::embedding_text).collect();
        let batches: Vec<Vec<&str>> = texts
            .chunks(self.config.embed_batch_size.max(1))
            .map(|batch| batch.iter().map(String::as_str).collect())
            .collect();

        let progress = Progress::new(self.config.show_progress, batches.len(), "Embedding");
        let embedded: Vec<Vec<Vec<f32>>> = self.pool.install(|| {
            batches
                .par_iter()
                .map(|batch| {
                    let vectors = self.embedder.embed_batch(batch);
                    progress.tick();
                    vectors
                })
                .collect()
        });
        progress.finish();

        embedded.into_iter().flatten().collect()
    }

    /// Answer `question` from the `top_k` best chunks.
    pub fn query(&self, question: &str, top_k: usize) -> QueryResponse {
        self.query_filtered(question, top_k, None)
    }

    /// Like [`RagPipeline::query`], restricting retrieval to chunks whose
    /// metadata matches `filter`.
    pub fn query_filtered(
        &self,
        question: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> QueryResponse {
        let query_embedding = self.embedder.embed(question);
        if query_embedding.is_empty() {
            tracing::warn!("could not embed question");
            return QueryResponse::without_sources(question, EMBEDDING_FAILED_ANSWER);
        }

        let candidates = match self.store.search(&query_embedding, top_k.saturating_mul(2), filter) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("vector search failed: {e}");
                Vec::new()
            }
        };
        if candidates.is_empty() {
            tracing::info!("no candidates retrieved");
            return QueryResponse::without_sources(question, NO_RESULTS_ANSWER);
        }
        tracing::debug!(candidates = candidates.len(), "retrieved candidates");

        let reranked = self.reranker.rerank(question, candidates, top_k);
        let context = build_context(&reranked);
        let sources = reranked.iter().map(SourceRef::from).collect();
        let answer = self.generator.generate(question, &context);

        QueryResponse {
            question: question.to_string(),
            answer,
            sources,
            context,
        }
    }

    /// Remove every chunk, or drop the collection when `delete` is set.
    pub fn clear(&self, delete: bool) -> Result<()> {
        if delete {
            self.store.delete_collection()
        } else {
            self.store.clear()
        }
    }

    pub fn stats(&self) -> Result<PipelineStats> {
        Ok(PipelineStats {
            vector_store: self.store.stats()?,
            embedding_model: self.embedder.model_name().to_string(),
            llm_model: self.generator.model_name().to_string(),
            reranker_model: self.reranker.model_name().to_string(),
            chunk_size: self.config.chunk_size,
            chunk_overlap: self.config.chunk_overlap,
        })
    }
}

/// Label each result and join them in rank order.
pub fn build_context(results: &[RerankedResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let title = r.result.meta_str("title").unwrap_or(NO_TITLE);
            let url = match r.result.meta_str("url") {
                Some(url) => format!(" [URL: {url}]"),
                None => String::new(),
            };
            format!(
                "Source {} ({}): {title}{url}\n{}",
                i + 1,
                r.result.source(),
                r.result.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

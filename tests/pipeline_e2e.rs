use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use campusrag::{
    AnswerGenerator,
    Config,
    DataDir,
    Embedder,
    LocalStore,
    RagPipeline,
    Reranker,
    Result,
    VectorStore,
    chunking::QUALITY_SCORE_KEY,
    config::RerankerKind,
    pipeline::{EMBEDDING_FAILED_ANSWER, NO_RESULTS_ANSWER},
    vector_store::{MetadataFilter, Point, SearchResult, StoreStats},
};
use serde_json::json;

const DIM: usize = 8;

const SHORT_TEXT: &str = "The campus gym opens at six every weekday morning.";

/// Deterministic embedder: the same text always maps to the same vector.
struct HashEmbedder;

impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts
            .iter()
            .map(|t| {
                if t.trim().is_empty() {
                    return Vec::new();
                }
                let hash = blake3::hash(t.as_bytes());
                hash.as_bytes()[..DIM]
                    .iter()
                    .map(|b| *b as f32 / 255.0 - 0.5)
                    .collect()
            })
            .collect()
    }
}

struct BrokenEmbedder;

impl Embedder for BrokenEmbedder {
    fn model_name(&self) -> &str {
        "broken"
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        vec![Vec::new(); texts.len()]
    }
}

struct CannedGenerator;

impl AnswerGenerator for CannedGenerator {
    fn model_name(&self) -> &str {
        "canned"
    }

    fn try_generate(&self, query: &str, _context: &str) -> Result<String> {
        Ok(format!("Answer to: {query}"))
    }
}

/// Wraps a store and counts searches.
struct CountingStore {
    inner: LocalStore,
    searches: Arc<AtomicUsize>,
}

impl VectorStore for CountingStore {
    fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    fn collection_name(&self) -> &str {
        self.inner.collection_name()
    }

    fn batch_size(&self) -> usize {
        self.inner.batch_size()
    }

    fn upsert(&self, points: &[Point]) -> Result<()> {
        self.inner.upsert(points)
    }

    fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner.search(query, top_k, filter)
    }

    fn stats(&self) -> Result<StoreStats> {
        self.inner.stats()
    }

    fn clear(&self) -> Result<()> {
        self.inner.clear()
    }

    fn delete_collection(&self) -> Result<()> {
        self.inner.delete_collection()
    }
}

fn config() -> Config {
    Config {
        embedding_dimensions: DIM,
        reranker: RerankerKind::None,
        workers: 2,
        ..Config::default()
    }
}

fn write_export(root: &Path) {
    let dir = root.join("raw").join("web");
    std::fs::create_dir_all(&dir).unwrap();
    let records = [
        json!({
            "id": "short",
            "title": "Gym hours",
            "text": SHORT_TEXT,
            "url": "https://example.edu/gym",
            "source": "web",
            "ingested_at": "2026-01-01T00:00:00Z",
            "metadata": {}
        }),
        json!({
            "id": "long",
            "title": "Tutoring",
            "text": "Students can find tutoring in this library today. ".repeat(50),
            "url": "https://example.edu/tutoring",
            "source": "web",
            "ingested_at": "2026-01-01T00:00:00Z",
            "metadata": {"author": "library", "post_type": "post", "score": 25}
        }),
    ];
    let body: Vec<String> = records.iter().map(|r| r.to_string()).collect();
    std::fs::write(dir.join("2026-01-01.jsonl"), body.join("\n")).unwrap();
}

fn pipeline(
    root: &Path,
    embedder: Box<dyn Embedder>,
) -> (RagPipeline, Arc<AtomicUsize>) {
    let config = config();
    let data_dir = DataDir::resolve(Some(root)).unwrap();
    let store = LocalStore::open(
        &data_dir.vector_db(&config.collection_name).unwrap(),
        &config.collection_name,
        DIM,
        config.batch_size,
    )
    .unwrap();
    let searches = Arc::new(AtomicUsize::new(0));
    let store = CountingStore {
        inner: store,
        searches: Arc::clone(&searches),
    };
    let rag = RagPipeline::new(
        config,
        data_dir,
        embedder,
        Box::new(store),
        Reranker::passthrough(),
        Box::new(CannedGenerator),
    )
    .unwrap();
    (rag, searches)
}

#[test]
fn ingest_then_query_ranks_exact_match_first() {
    let tmp = tempfile::tempdir().unwrap();
    write_export(tmp.path());
    let (rag, _) = pipeline(tmp.path(), Box::new(HashEmbedder));

    let report = rag.ingest(&["web".to_string()]).unwrap();
    assert_eq!(report.files, 1);
    assert_eq!(report.records, 2);
    assert_eq!(report.chunks, 4);
    assert_eq!(report.stored, 4);
    assert_eq!(report.skipped, 0);
    assert_eq!(rag.stats().unwrap().vector_store.total_documents, 4);

    // Every chunk, via a query that matches nothing in particular.
    let all = rag
        .store()
        .search(&[1.0; DIM], 10, None)
        .unwrap();
    let mut per_record: BTreeMap<String, usize> = BTreeMap::new();
    for result in &all {
        *per_record
            .entry(result.meta_str("id").unwrap().to_string())
            .or_default() += 1;
        let quality = result.metadata[QUALITY_SCORE_KEY].as_f64().unwrap();
        assert!((0.0..=10.0).contains(&quality));
    }
    assert_eq!(per_record["short"], 1);
    assert_eq!(per_record["long"], 3);

    // The short record is stored verbatim, so embedding its text
    // reproduces its vector exactly.
    let response = rag.query(SHORT_TEXT, 3);
    assert_eq!(response.answer, format!("Answer to: {SHORT_TEXT}"));
    assert_eq!(response.sources.len(), 3);
    assert_eq!(response.sources[0].title, "Gym hours");
    assert_eq!(response.sources[0].url, "https://example.edu/gym");
    assert!((response.sources[0].score - 1.0).abs() < 1e-4);
    assert!(response.context.starts_with(
        "Source 1 (web): Gym hours [URL: https://example.edu/gym]\n"
    ));
}

#[test]
fn reingest_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    write_export(tmp.path());
    let (rag, _) = pipeline(tmp.path(), Box::new(HashEmbedder));

    rag.ingest(&["web".to_string()]).unwrap();
    rag.ingest(&["web".to_string()]).unwrap();
    assert_eq!(rag.stats().unwrap().vector_store.total_documents, 4);

    rag.clear(false).unwrap();
    assert_eq!(rag.stats().unwrap().vector_store.total_documents, 0);
}

#[test]
fn unembeddable_question_never_searches() {
    let tmp = tempfile::tempdir().unwrap();
    write_export(tmp.path());
    let (rag, searches) = pipeline(tmp.path(), Box::new(BrokenEmbedder));

    let report = rag.ingest(&["web".to_string()]).unwrap();
    assert_eq!(report.chunks, 4);
    assert_eq!(report.stored, 0);
    assert_eq!(report.skipped, 4);

    let response = rag.query("When does the gym open?", 5);
    assert_eq!(response.answer, EMBEDDING_FAILED_ANSWER);
    assert!(response.sources.is_empty());
    assert_eq!(searches.load(Ordering::SeqCst), 0);
}

#[test]
fn empty_collection_gives_no_results_answer() {
    let tmp = tempfile::tempdir().unwrap();
    let (rag, searches) = pipeline(tmp.path(), Box::new(HashEmbedder));

    let response = rag.query("When does the gym open?", 5);
    assert_eq!(response.answer, NO_RESULTS_ANSWER);
    assert!(response.sources.is_empty());
    assert_eq!(searches.load(Ordering::SeqCst), 1);
}

#[test]
fn source_filter_restricts_retrieval() {
    let tmp = tempfile::tempdir().unwrap();
    write_export(tmp.path());
    let (rag, _) = pipeline(tmp.path(), Box::new(HashEmbedder));
    rag.ingest(&["web".to_string()]).unwrap();

    let forum_only = MetadataFilter::new().equals("source", "forum");
    let response = rag.query_filtered(SHORT_TEXT, 5, Some(&forum_only));
    assert_eq!(response.answer, NO_RESULTS_ANSWER);

    let web_only = MetadataFilter::new().equals("source", "web");
    let response = rag.query_filtered(SHORT_TEXT, 5, Some(&web_only));
    assert_eq!(response.sources.len(), 4);
}

#[test]
fn ingest_single_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("posts.jsonl");
    std::fs::write(
        &path,
        concat!(
            r#"{"id":"p1","title":"Parking","text":"Where do commuters park?","metadata":{"post_type":"post"}}"#,
            "\n",
            "not json\n",
            r#"{"id":"c1","title":"","text":"The east garage.","metadata":{"post_type":"comment","parent_id":"t3_p1","subreddit":"campus"}}"#,
            "\n",
        ),
    )
    .unwrap();
    let (rag, _) = pipeline(tmp.path(), Box::new(HashEmbedder));

    let report = rag.ingest_file(&path, "forum").unwrap();
    assert_eq!(report.records, 2);
    assert_eq!(report.stored, 2);

    let hits = rag.store().search(&[1.0; DIM], 10, None).unwrap();
    assert!(hits.iter().all(|h| h.source() == "forum"));
    let reply = hits.iter().find(|h| h.meta_str("id") == Some("c1")).unwrap();
    assert!(
        reply
            .meta_str("conversation_context")
            .unwrap()
            .starts_with("Original post: Parking")
    );
}

fn write_source(root: &Path, source: &str, file: &str, id: &str) {
    let dir = root.join("raw").join(source);
    std::fs::create_dir_all(&dir).unwrap();
    let record = json!({
        "id": id,
        "title": id,
        "text": format!("Notes from {id} about campus dining."),
        "source": source,
    });
    std::fs::write(dir.join(file), record.to_string()).unwrap();
}

#[test]
fn ingest_reads_newest_export_of_each_source() {
    let tmp = tempfile::tempdir().unwrap();
    write_source(tmp.path(), "web", "2026-01-01.jsonl", "web-old");
    write_source(tmp.path(), "web", "2026-02-01.jsonl", "web-new");
    write_source(tmp.path(), "forum", "2026-03-01.jsonl", "forum-new");
    write_source(tmp.path(), "forum", "2025-12-31.jsonl", "forum-old");
    let (rag, _) = pipeline(tmp.path(), Box::new(HashEmbedder));

    let sources = ["web", "forum", "missing"].map(String::from);
    let report = rag.ingest(&sources).unwrap();
    assert_eq!(report.files, 2);
    assert_eq!(report.records, 2);
    assert_eq!(report.stored, 2);

    let hits = rag.store().search(&[1.0; DIM], 10, None).unwrap();
    let ids: BTreeSet<&str> = hits.iter().filter_map(|h| h.meta_str("id")).collect();
    assert_eq!(ids, BTreeSet::from(["forum-new", "web-new"]));
    let forum = hits.iter().find(|h| h.meta_str("id") == Some("forum-new")).unwrap();
    assert_eq!(forum.source(), "forum");
}

#[test]
fn records_without_id_are_not_stored() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("untagged.jsonl");
    std::fs::write(
        &path,
        concat!(
            r#"{"title":"A","text":"Alpha record."}"#,
            "\n",
            r#"{"title":"B","text":"Beta record."}"#,
            "\n",
            r#"{"id":"c","title":"C","text":"Gamma record."}"#,
            "\n",
        ),
    )
    .unwrap();
    let (rag, _) = pipeline(tmp.path(), Box::new(HashEmbedder));

    let report = rag.ingest_file(&path, "web").unwrap();
    assert_eq!(report.records, 3);
    assert_eq!(report.rejected, 2);
    assert_eq!(report.stored, 1);

    let hits = rag.store().search(&[1.0; DIM], 10, None).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].meta_str("id"), Some("c"));
    assert_eq!(rag.stats().unwrap().vector_store.total_documents, 1);
}

use std::{
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::{
    error::{Error, Result},
    record::Metadata,
    vector_store::{
        MetadataFilter,
        Point,
        SearchResult,
        StoreStats,
        VectorStore,
        cosine_similarity,
        rank_results,
    },
};

const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const PAYLOADS: TableDefinition<u64, &str> = TableDefinition::new("payloads");
const COLLECTION: TableDefinition<&str, &str> = TableDefinition::new("collection");

const DISTANCE: &str = "cosine";

/// Embedded vector store: one redb file per collection.
///
/// Vectors are stored as raw little-endian f32 bytes and payloads as JSON,
/// both keyed by point id and written in the same transaction. Search is
/// an exact scan, which is fine for the tens of thousands of chunks a
/// campus corpus produces.
pub struct LocalStore {
    db: Database,
    collection: String,
    dimension: usize,
    batch_size: usize,
    provisioned: AtomicBool,
}

impl LocalStore {
    /// Open or create the store at `path`.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use campusrag::{LocalStore, VectorStore};
    ///
    /// let store = LocalStore::open(&tmp.path().join("c.redb"), "campus", 3, 100).unwrap();
    /// assert_eq!(store.stats().unwrap().total_documents, 0);
    /// ```
    pub fn open(path: &Path, collection: &str, dimension: usize, batch_size: usize) -> Result<Self> {
        let db = Database::create(path)?;
        let store = Self {
            db,
            collection: collection.to_string(),
            dimension,
            batch_size,
            provisioned: AtomicBool::new(false),
        };
        store.ensure_collection()?;
        Ok(store)
    }

    /// Create the tables and record the collection's vector size. An
    /// existing collection with another vector size is an error.
    fn ensure_collection(&self) -> Result<()> {
        if self.provisioned.load(Ordering::Acquire) {
            return Ok(());
        }

        let txn = self.db.begin_write()?;
        {
            txn.open_table(VECTORS)?;
            txn.open_table(PAYLOADS)?;
            let mut meta = txn.open_table(COLLECTION)?;
            let existing = meta
                .get("dimension")?
                .map(|guard| guard.value().to_string());
            match existing {
                Some(dim) if dim == self.dimension.to_string() => {
                    tracing::debug!(collection = %self.collection, "using existing collection");
                }
                Some(dim) => {
                    return Err(Error::Store(format!(
                        "collection {} holds {dim}-dimensional vectors, expected {}",
                        self.collection, self.dimension
                    )));
                }
                None => {
                    meta.insert("name", self.collection.as_str())?;
                    meta.insert("dimension", self.dimension.to_string().as_str())?;
                    meta.insert("distance", DISTANCE)?;
                    tracing::info!(
                        collection = %self.collection,
                        dimension = self.dimension,
                        "created collection"
                    );
                }
            }
        }
        txn.commit()?;

        self.provisioned.store(true, Ordering::Release);
        Ok(())
    }
}

impl VectorStore for LocalStore {
    fn backend(&self) -> &'static str {
        "local"
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
        if let Some(bad) = points.iter().find(|p| p.vector.len() != self.dimension) {
            return Err(Error::Store(format!(
                "vector for {} has {} dimensions, expected {}",
                bad.chunk_key(),
                bad.vector.len(),
                self.dimension
            )));
        }
        self.ensure_collection()?;

        let txn = self.db.begin_write()?;
        {
            let mut vectors = txn.open_table(VECTORS)?;
            let mut payloads = txn.open_table(PAYLOADS)?;
            for point in points {
                let payload = serde_json::to_string(&point.payload)?;
                vectors.insert(point.id, bytemuck::cast_slice::<f32, u8>(&point.vector))?;
                payloads.insert(point.id, payload.as_str())?;
            }
        }
        txn.commit()?;
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

        let txn = self.db.begin_read()?;
        let vectors = txn.open_table(VECTORS)?;
        let payloads = txn.open_table(PAYLOADS)?;
        let filter = filter.filter(|f| !f.is_empty());

        let mut scored: Vec<(u64, f32, Option<Metadata>)> = Vec::new();
        for entry in vectors.iter()? {
            let (key, value) = entry?;
            let id = key.value();

            // Filtered searches need the payload before ranking.
            let payload = match filter {
                Some(f) => {
                    let Some(meta) = load_payload(&payloads, id)? else {
                        continue;
                    };
                    if !f.matches(&meta) {
                        continue;
                    }
                    Some(meta)
                }
                None => None,
            };

            let vector: Vec<f32> = bytemuck::pod_collect_to_vec(value.value());
            scored.push((id, cosine_similarity(query, &vector), payload));
        }

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        let mut results = Vec::with_capacity(scored.len());
        for (id, score, payload) in scored {
            let payload = match payload {
                Some(p) => p,
                None => match load_payload(&payloads, id)? {
                    Some(p) => p,
                    None => {
                        tracing::warn!(point = id, "vector without payload");
                        continue;
                    }
                },
            };
            results.push(SearchResult::from_payload(payload, score));
        }

        Ok(rank_results(results, top_k))
    }

    fn stats(&self) -> Result<StoreStats> {
        self.ensure_collection()?;
        let txn = self.db.begin_read()?;
        let vectors = txn.open_table(VECTORS)?;
        let total_documents = vectors.len()? as usize;

        Ok(StoreStats {
            backend: self.backend().to_string(),
            collection_name: self.collection.clone(),
            total_documents,
            vector_size: self.dimension,
            distance: DISTANCE.to_string(),
        })
    }

    fn clear(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.delete_table(VECTORS)?;
        txn.delete_table(PAYLOADS)?;
        txn.open_table(VECTORS)?;
        txn.open_table(PAYLOADS)?;
        txn.commit()?;
        tracing::info!(collection = %self.collection, "cleared collection");
        Ok(())
    }

    fn delete_collection(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.delete_table(VECTORS)?;
        txn.delete_table(PAYLOADS)?;
        txn.delete_table(COLLECTION)?;
        txn.commit()?;
        self.provisioned.store(false, Ordering::Release);
        tracing::info!(collection = %self.collection, "deleted collection");
        Ok(())
    }
}

fn load_payload(
    table: &impl ReadableTable<u64, &'static str>,
    id: u64,
) -> Result<Option<Metadata>> {
    match table.get(id)? {
        Some(guard) => Ok(Some(serde_json::from_str(guard.value())?)),
        None => Ok(None),
    }
}

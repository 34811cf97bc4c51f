/// A stable chunk identifier derived from (record_id, chunk_index).
///
/// The string key is what users and logs see; the numeric form is the point
/// id handed to vector stores, several of which only accept integer keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkId {
    /// Human-readable key, `"{record_id}_chunk_{index}"`.
    pub key: String,
    /// The numeric ID used as the point key in vector stores.
    pub numeric: u64,
}

impl ChunkId {
    /// Generate the identifier for chunk `index` of record `record_id`.
    pub fn new(record_id: &str, index: usize) -> Self {
        Self::from_key(format!("{record_id}_chunk_{index}"))
    }

    /// Rebuild an identifier from its string key.
    pub fn from_key(key: String) -> Self {
        let numeric = Self::hash_key(&key);
        Self { key, numeric }
    }

    /// blake3 is stable across platforms and releases, unlike the std
    /// hasher, so points keep their ids between ingestion runs.
    fn hash_key(key: &str) -> u64 {
        let digest = blake3::hash(key.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

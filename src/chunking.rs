//! Chunking utilities for splitting long records into overlapping segments.
//!
//! Records longer than the configured chunk size are split into windows
//! that overlap by a fixed number of characters. Window ends are pulled back
//! to a paragraph break when one is close, otherwise to the end of a
//! sentence, and only cut mid-sentence when neither is found.

use serde::{Deserialize, Serialize};

use crate::{
    config::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    doc_id::ChunkId,
    quality,
    record::{MetaValue, Metadata},
};

/// How far back from a window end the boundary search looks, in characters.
pub const BOUNDARY_SLACK: usize = 100;

/// Metadata key holding the zero-based chunk index.
pub const CHUNK_INDEX_KEY: &str = "chunk_id";
/// Metadata key holding the heuristic quality score.
pub const QUALITY_SCORE_KEY: &str = "quality_score";
/// Metadata key holding the one-line parent thread summary, when present.
pub const CONVERSATION_CONTEXT_KEY: &str = "conversation_context";

/// Chunking configuration.
///
/// # Examples
///
/// ```
/// use campusrag::chunking::ChunkingConfig;
///
/// let config = ChunkingConfig::default();
/// assert_eq!(config.chunk_size, 1000);
/// assert_eq!(config.overlap, 200);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// A chunk of text from a larger record.
///
/// Produced by [`chunk_text`]. Each chunk is a trimmed window of the
/// original text, with an index and byte offset for mapping back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// The chunk text content, trimmed.
    pub text: String,
    /// Zero-based chunk index within the record.
    pub index: usize,
    /// Byte offset where the untrimmed window starts in the original text.
    pub start_offset: usize,
    /// Byte offset where the untrimmed window ends in the original text.
    pub end_offset: usize,
}

/// The unit that gets embedded and stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// `"{record_id}_chunk_{index}"`.
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    /// Source tag, e.g. `web` or `forum`.
    pub source: String,
}

impl Document {
    pub fn chunk_id(&self) -> ChunkId {
        ChunkId::from_key(self.id.clone())
    }

    pub fn quality_score(&self) -> Option<f64> {
        self.metadata.get(QUALITY_SCORE_KEY).and_then(MetaValue::as_f64)
    }

    pub fn conversation_context(&self) -> Option<&str> {
        self.metadata
            .get(CONVERSATION_CONTEXT_KEY)
            .and_then(MetaValue::as_str)
    }

    /// Text sent to the embedding model. The parent thread summary is
    /// prepended so replies are found by questions about their thread,
    /// while the stored content stays a verbatim slice of the record.
    pub fn embedding_text(&self) -> String {
        match self.conversation_context() {
            Some(context) if !context.is_empty() => {
                format!("Context: {context}\n\nContent: {}", self.content)
            }
            _ => self.content.clone(),
        }
    }
}

/// Splits record text into [`Document`]s carrying their metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Chunk `text` into documents.
    ///
    /// `metadata` must carry the record `id` and `source`; every chunk gets
    /// a copy plus its `chunk_id` index and `quality_score`.
    ///
    /// # Examples
    ///
    /// ```
    /// use campusrag::chunking::{Chunker, ChunkingConfig};
    /// use campusrag::record::{MetaValue, Metadata};
    ///
    /// let mut meta = Metadata::new();
    /// meta.insert("id".into(), MetaValue::from("r1"));
    /// meta.insert("source".into(), MetaValue::from("web"));
    ///
    /// let docs = Chunker::new(ChunkingConfig::default()).chunk("  Hello!  ", &meta);
    /// assert_eq!(docs.len(), 1);
    /// assert_eq!(docs[0].id, "r1_chunk_0");
    /// assert_eq!(docs[0].content, "Hello!");
    /// ```
    pub fn chunk(&self, text: &str, metadata: &Metadata) -> Vec<Document> {
        let record_id = metadata
            .get("id")
            .map(|v| v.to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        let source = metadata
            .get("source")
            .map(|v| v.to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        let score = quality::quality_score(metadata);

        chunk_text(text, self.config.chunk_size, self.config.overlap)
            .into_iter()
            .map(|chunk| {
                let mut meta = metadata.clone();
                meta.insert(
                    CHUNK_INDEX_KEY.to_string(),
                    MetaValue::Int(chunk.index as i64),
                );
                meta.insert(
                    QUALITY_SCORE_KEY.to_string(),
                    MetaValue::Float(score),
                );
                Document {
                    id: ChunkId::new(&record_id, chunk.index).key,
                    content: chunk.text,
                    metadata: meta,
                    source: source.clone(),
                }
            })
            .collect()
    }
}

/// Split text into overlapping chunks.
///
/// Sizes are counted in characters, so multi-byte text is never split
/// inside a code point. Text no longer than `chunk_size` comes back as a
/// single trimmed chunk. Chunks that are empty after trimming are dropped
/// without consuming an index.
///
/// # Examples
///
/// ```
/// use campusrag::chunking::chunk_text;
///
/// // Short text returns a single chunk
/// let chunks = chunk_text("Hello, world!", 1000, 200);
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].text, "Hello, world!");
///
/// // Long text gets split
/// let text = "A sentence about campus. ".repeat(100);
/// let chunks = chunk_text(&text, 1000, 200);
/// assert!(chunks.len() >= 2);
/// ```
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<TextChunk> {
    let chars: Vec<char> = text.chars().collect();
    let char_count = chars.len();
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);

    // Short text doesn't need chunking
    if char_count <= chunk_size {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        return vec![TextChunk {
            text: trimmed.to_string(),
            index: 0,
            start_offset: 0,
            end_offset: text.len(),
        }];
    }

    // Build a map of char index -> byte index for O(1) lookups
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut index = 0;

    loop {
        let window_end = start + chunk_size;
        let end = if window_end < char_count {
            find_boundary(&chars, start, window_end, overlap)
        } else {
            char_count
        };

        let start_byte = char_to_byte[start];
        let end_byte = char_to_byte[end];
        let chunk = text[start_byte..end_byte].trim();
        if !chunk.is_empty() {
            chunks.push(TextChunk {
                text: chunk.to_string(),
                index,
                start_offset: start_byte,
                end_offset: end_byte,
            });
            index += 1;
        }

        if end >= char_count {
            break;
        }
        start = end - overlap;
    }

    chunks
}

/// Pick the end of the window `[start, window_end)`.
///
/// Searches back at most [`BOUNDARY_SLACK`] characters, but never so far
/// that the next window (which starts `overlap` characters before the end)
/// would fail to advance.
fn find_boundary(
    chars: &[char],
    start: usize,
    window_end: usize,
    overlap: usize,
) -> usize {
    let floor = window_end
        .saturating_sub(BOUNDARY_SLACK)
        .max(start + overlap + 1);

    // Paragraph break: end just before the second newline.
    if let Some(i) = (floor.max(start + 1)..=window_end)
        .rev()
        .find(|&i| chars[i] == '\n' && chars[i - 1] == '\n')
    {
        return i;
    }

    // Sentence end: keep the punctuation.
    if let Some(i) = (floor..window_end)
        .rev()
        .find(|&i| matches!(chars[i], '.' | '!' | '?'))
    {
        return i + 1;
    }

    window_end
}

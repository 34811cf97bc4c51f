//! Turns a JSON Lines export into chunked documents.

use rayon::prelude::*;

use crate::{
    chunking::{CONVERSATION_CONTEXT_KEY, Chunker, Document},
    error::Result,
    quality::{self, ParentIndex},
    record::{MetaValue, Metadata, RawRecord, RecordFile, metadata_from_json},
};

/// Chunks produced from one file, with the counts the ingest report needs.
#[derive(Debug, Default)]
pub struct ProcessedFile {
    pub records: usize,
    /// Records dropped for lacking an id.
    pub rejected: usize,
    pub documents: Vec<Document>,
}

/// Build the metadata bag carried by every chunk of `record`.
///
/// Source-specific metadata is copied first; the record's own fields are
/// written over it so ids and source tags stay consistent.
pub fn record_metadata(record: &RawRecord, source: &str, line_number: usize) -> Metadata {
    let mut meta = metadata_from_json(&record.metadata);
    let source = if record.source.is_empty() {
        source
    } else {
        record.source.as_str()
    };

    meta.insert("id".into(), MetaValue::from(record.id.as_str()));
    meta.insert("url".into(), MetaValue::from(record.url.as_str()));
    meta.insert("title".into(), MetaValue::from(record.title.as_str()));
    meta.insert("source".into(), MetaValue::from(source));
    meta.insert(
        "ingested_at".into(),
        MetaValue::from(record.ingested_at.as_str()),
    );
    meta.insert("line_number".into(), MetaValue::Int(line_number as i64));
    meta
}

/// Read `file` twice: once to index parents for conversation context, once
/// to chunk every record.
///
/// Records are chunked in parallel on the current rayon pool; document
/// order follows line order.
pub fn process_file(file: &RecordFile, source: &str, chunker: &Chunker) -> Result<ProcessedFile> {
    let parents: ParentIndex = {
        let mut index = ParentIndex::new();
        for (_, record) in file.records()? {
            index.insert(&record);
        }
        index
    };

    let (records, missing_id): (Vec<(usize, RawRecord)>, Vec<_>) = file
        .records()?
        .partition(|(_, record)| !record.id.trim().is_empty());
    for (line, _) in &missing_id {
        tracing::warn!(
            path = %file.path().display(),
            line,
            "skipping record without an id"
        );
    }
    tracing::debug!(
        path = %file.path().display(),
        records = records.len(),
        parents = parents.len(),
        "read records"
    );

    let documents: Vec<Document> = records
        .par_iter()
        .flat_map_iter(|(line_number, record)| {
            let mut meta = record_metadata(record, source, *line_number);
            if let Some(context) = quality::conversation_context(record, &parents) {
                meta.insert(CONVERSATION_CONTEXT_KEY.into(), MetaValue::from(context));
            }
            chunker.chunk(&record.text, &meta)
        })
        .collect();

    Ok(ProcessedFile {
        records: records.len() + missing_id.len(),
        rejected: missing_id.len(),
        documents,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::chunking::{CHUNK_INDEX_KEY, ChunkingConfig};

    fn write_jsonl(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".jsonl").tempfile().unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        f
    }

    #[test]
    fn chunks_each_record() {
        let long = "Office hours move to the library. ".repeat(60);
        let file = write_jsonl(&[
            r#"{"id":"a","title":"Short","text":"Dining hall opens at 7am.","url":"u","source":"web"}"#,
            &format!(r#"{{"id":"b","title":"Long","text":"{long}","source":"web"}}"#),
        ]);

        let processed =
            process_file(&RecordFile::new(file.path()), "web", &Chunker::default()).unwrap();
        assert_eq!(processed.records, 2);

        let short: Vec<_> = processed.documents.iter().filter(|d| d.id.starts_with("a_")).collect();
        assert_eq!(short.len(), 1);
        assert_eq!(short[0].metadata["title"], MetaValue::from("Short"));
        assert_eq!(short[0].metadata["line_number"], MetaValue::Int(0));

        let long_docs: Vec<_> = processed.documents.iter().filter(|d| d.id.starts_with("b_")).collect();
        assert!(long_docs.len() > 1);
        for (i, doc) in long_docs.iter().enumerate() {
            assert_eq!(doc.metadata[CHUNK_INDEX_KEY], MetaValue::Int(i as i64));
        }
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let file = write_jsonl(&[
            r#"{"id":"a","text":"Fine."}"#,
            "{not json",
            "",
            r#"{"id":"b","text":"Also fine."}"#,
        ]);
        let processed =
            process_file(&RecordFile::new(file.path()), "forum", &Chunker::default()).unwrap();
        assert_eq!(processed.records, 2);
        assert_eq!(processed.documents.len(), 2);
        assert_eq!(processed.documents[1].metadata["line_number"], MetaValue::Int(3));
    }

    #[test]
    fn source_argument_fills_missing_tag() {
        let file = write_jsonl(&[r#"{"id":"a","text":"Hi."}"#]);
        let processed =
            process_file(&RecordFile::new(file.path()), "forum", &Chunker::default()).unwrap();
        assert_eq!(processed.documents[0].source, "forum");
    }

    #[test]
    fn replies_carry_thread_context() {
        let file = write_jsonl(&[
            r#"{"id":"p1","title":"Parking permits","text":"How much are they?","metadata":{"post_type":"submission"}}"#,
            r#"{"id":"c1","text":"About $300 a quarter.","metadata":{"post_type":"comment","parent_id":"t3_p1","subreddit":"ucsd"}}"#,
        ]);
        let chunker = Chunker::new(ChunkingConfig::default());
        let processed = process_file(&RecordFile::new(file.path()), "forum", &chunker).unwrap();

        let reply = processed.documents.iter().find(|d| d.id == "c1_chunk_0").unwrap();
        let ctx = reply.conversation_context().unwrap();
        assert!(ctx.starts_with("Original post: Parking permits"));
        assert!(ctx.ends_with("Community: r/ucsd"));
        assert_eq!(reply.content, "About $300 a quarter.");

        let post = processed.documents.iter().find(|d| d.id == "p1_chunk_0").unwrap();
        assert!(post.conversation_context().is_none());
        assert!(post.quality_score().unwrap() > reply.quality_score().unwrap());
    }

    #[test]
    fn records_without_id_are_rejected() {
        let file = write_jsonl(&[
            r#"{"title":"A","text":"Alpha record."}"#,
            r#"{"id":"  ","title":"B","text":"Beta record."}"#,
            r#"{"id":7,"title":"C","text":"Gamma record."}"#,
        ]);
        let processed =
            process_file(&RecordFile::new(file.path()), "web", &Chunker::default()).unwrap();
        assert_eq!(processed.records, 3);
        assert_eq!(processed.rejected, 2);
        assert_eq!(processed.documents.len(), 1);
        assert_eq!(processed.documents[0].id, "7_chunk_0");
    }

    #[test]
    fn record_fields_override_metadata() {
        let record: RawRecord =
            serde_json::from_str(r#"{"id":"x","metadata":{"id":"spoofed","score":3}}"#).unwrap();
        let meta = record_metadata(&record, "forum", 7);
        assert_eq!(meta["id"], MetaValue::from("x"));
        assert_eq!(meta["score"], MetaValue::Int(3));
        assert_eq!(meta["source"], MetaValue::from("forum"));
    }
}

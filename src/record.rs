//! Raw records produced by the scraping collaborators, and the typed
//! metadata bag that travels with every chunk.
//!
//! Records arrive as JSON Lines, one object per line:
//!
//! ```json
//! {"id": "abc", "title": "...", "text": "...", "url": "...", "source": "forum",
//!  "ingested_at": "2024-01-01T00:00:00Z", "metadata": {"score": 12}}
//! ```

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    time::SystemTime,
};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A scalar metadata value. Nested structures never reach a store: they are
/// stringified when a [`serde_json::Value`] is converted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value; numeric strings are accepted because
    /// scrapers are not consistent about quoting counters.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Equality used by metadata filters: integers and floats with the same
    /// numeric value match each other.
    pub fn matches(&self, other: &MetaValue) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            _ => false,
        }
    }

    /// Value written to a backing store: null becomes the empty string.
    pub fn sanitized(&self) -> MetaValue {
        match self {
            Self::Null => Self::String(String::new()),
            other => other.clone(),
        }
    }
}

impl PartialEq for MetaValue {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

impl From<&serde_json::Value> for MetaValue {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => Self::String(s.clone()),
            Value::Array(_) | Value::Object(_) => Self::String(value.to_string()),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl std::fmt::Display for MetaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

pub type Metadata = BTreeMap<String, MetaValue>;

/// Coerce every value into a form any backend accepts.
pub fn sanitize_metadata(metadata: &Metadata) -> Metadata {
    metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.sanitized()))
        .collect()
}

/// Convert a free-form JSON object into a flat scalar metadata bag.
pub fn metadata_from_json(
    map: &serde_json::Map<String, serde_json::Value>,
) -> Metadata {
    map.iter().map(|(k, v)| (k.clone(), MetaValue::from(v))).collect()
}

/// One ingested unit from an external source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub ingested_at: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RawRecord {
    pub fn meta(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta(key).and_then(|v| v.as_str())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// A JSON Lines file of raw records.
///
/// [`RecordFile::records`] reopens the file on each call, so a file can be
/// walked several times (once to index parents, once to chunk).
#[derive(Debug, Clone)]
pub struct RecordFile {
    path: PathBuf,
}

impl RecordFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lazily iterate `(line_number, record)` pairs.
    ///
    /// Malformed lines are logged and skipped; blank lines are ignored.
    /// Line numbers are zero-based.
    pub fn records(&self) -> Result<impl Iterator<Item = (usize, RawRecord)> + use<>> {
        let file = File::open(&self.path)?;
        let path = self.path.clone();
        Ok(BufReader::new(file).lines().enumerate().filter_map(
            move |(line_number, line)| {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            line = line_number,
                            "unreadable line: {e}"
                        );
                        return None;
                    }
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    return None;
                }
                match serde_json::from_str::<RawRecord>(trimmed) {
                    Ok(record) => Some((line_number, record)),
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            line = line_number,
                            "skipping malformed record: {e}"
                        );
                        None
                    }
                }
            },
        ))
    }
}

/// Pick the most recent `*.jsonl` export in `dir`.
///
/// Scrapers name their exports with a sortable timestamp, so the greatest
/// file name wins; modification time breaks ties. Returns `None` when the
/// directory is missing or holds no exports.
pub fn latest_file(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let matcher = globset::Glob::new("*.jsonl")
        .map_err(|e| Error::Config(format!("invalid glob pattern: {e}")))?
        .compile_matcher();

    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !matcher.is_match(&name) {
            continue;
        }
        let mtime = entry
            .metadata()?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        candidates.push((name, mtime, entry.path()));
    }

    candidates.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    Ok(candidates.pop().map(|(_, _, path)| path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_record() {
        let line = r#"{"id":"p1","title":"Parking","text":"Where to park?","url":"https://forum.example/p1","source":"forum","ingested_at":"2024-03-01","metadata":{"score":12,"author":"sparky","tags":["a","b"]}}"#;
        let record: RawRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.id, "p1");
        assert_eq!(record.meta_str("author"), Some("sparky"));

        let meta = metadata_from_json(&record.metadata);
        assert_eq!(meta["score"], MetaValue::Int(12));
        assert_eq!(meta["tags"], MetaValue::String("[\"a\",\"b\"]".into()));
    }

    #[test]
    fn missing_fields_default() {
        let record: RawRecord = serde_json::from_str(r#"{"id": 42}"#).unwrap();
        assert_eq!(record.id, "42");
        assert!(record.text.is_empty());
        assert!(record.metadata.is_empty());
    }

    #[test]
    fn sanitize_turns_null_into_empty_string() {
        let mut meta = Metadata::new();
        meta.insert("parent".into(), MetaValue::Null);
        meta.insert("score".into(), MetaValue::Float(2.5));
        let clean = sanitize_metadata(&meta);
        assert_eq!(clean["parent"], MetaValue::String(String::new()));
        assert_eq!(clean["score"], MetaValue::Float(2.5));
    }

    #[test]
    fn numeric_values_match_across_variants() {
        assert!(MetaValue::Int(3).matches(&MetaValue::Float(3.0)));
        assert!(!MetaValue::Int(3).matches(&MetaValue::String("3".into())));
        assert!(MetaValue::Null.matches(&MetaValue::Null));
    }

    #[test]
    fn untagged_roundtrip_keeps_integers() {
        let mut meta = Metadata::new();
        meta.insert("count".into(), MetaValue::Int(7));
        meta.insert("ratio".into(), MetaValue::Float(0.5));
        meta.insert("flag".into(), MetaValue::Bool(true));
        let json = serde_json::to_string(&meta).unwrap();
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert!(matches!(back["count"], MetaValue::Int(7)));
        assert!(matches!(back["flag"], MetaValue::Bool(true)));
    }

    #[test]
    fn records_skip_bad_lines_and_can_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("export.jsonl");
        std::fs::write(
            &path,
            "{\"id\":\"a\",\"text\":\"one\"}\nnot json\n\n{\"id\":\"b\",\"text\":\"two\"}\n",
        )
        .unwrap();

        let file = RecordFile::new(&path);
        let first: Vec<_> = file.records().unwrap().collect();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].0, 0);
        assert_eq!(first[1].0, 3);
        assert_eq!(first[1].1.id, "b");

        let second: Vec<_> = file.records().unwrap().map(|(_, r)| r.id).collect();
        assert_eq!(second, vec!["a", "b"]);
    }

    #[test]
    fn missing_file_is_io_error() {
        let file = RecordFile::new("/nonexistent/export.jsonl");
        assert!(matches!(file.records(), Err(Error::Io(_))));
    }

    #[test]
    fn latest_file_picks_greatest_name() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("forum_20240101.jsonl"), "").unwrap();
        std::fs::write(tmp.path().join("forum_20240301.jsonl"), "").unwrap();
        std::fs::write(tmp.path().join("forum_20240501.json"), "").unwrap();
        std::fs::write(tmp.path().join(".forum_20990101.jsonl"), "").unwrap();

        let latest = latest_file(tmp.path()).unwrap().unwrap();
        assert_eq!(latest.file_name().unwrap(), "forum_20240301.jsonl");
    }

    #[test]
    fn latest_file_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(latest_file(&tmp.path().join("nope")).unwrap().is_none());
        assert!(latest_file(tmp.path()).unwrap().is_none());
    }
}

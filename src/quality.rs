//! Heuristic quality scoring and conversation context for forum records.

use std::collections::HashMap;

use crate::{
    record::{MetaValue, Metadata, RawRecord},
    text_util::{self, DEFAULT_PREVIEW_CHARS},
};

pub const MAX_QUALITY_SCORE: f64 = 10.0;

const BASE_SCORE: f64 = 1.0;
const SCORE_BONUS_CAP: f64 = 5.0;
const COMMENTS_BONUS_CAP: f64 = 3.0;
const AUTHOR_BONUS: f64 = 0.5;
const TOP_LEVEL_BONUS: f64 = 1.0;

const DELETED_AUTHOR: &str = "[deleted]";

fn post_type(metadata: &Metadata) -> Option<&str> {
    metadata.get("post_type").and_then(MetaValue::as_str)
}

/// Top-level posts (as opposed to replies).
pub fn is_top_level(post_type: Option<&str>) -> bool {
    matches!(post_type, Some("submission" | "post"))
}

pub fn is_reply(post_type: Option<&str>) -> bool {
    matches!(post_type, Some("comment" | "reply"))
}

/// Score a record from its engagement signals, in `[0, 10]`.
///
/// Generic web records carry none of the signals and get the base score.
///
/// # Examples
///
/// ```
/// use campusrag::quality::quality_score;
/// use campusrag::record::{MetaValue, Metadata};
///
/// assert_eq!(quality_score(&Metadata::new()), 1.0);
///
/// let mut meta = Metadata::new();
/// meta.insert("score".into(), MetaValue::Int(1000));
/// meta.insert("num_comments".into(), MetaValue::Int(1000));
/// meta.insert("author".into(), MetaValue::from("sparky"));
/// meta.insert("post_type".into(), MetaValue::from("submission"));
/// assert_eq!(quality_score(&meta), 10.0);
/// ```
pub fn quality_score(metadata: &Metadata) -> f64 {
    let mut score = BASE_SCORE;

    if let Some(upvotes) = metadata.get("score").and_then(MetaValue::as_f64) {
        score += (upvotes / 10.0).min(SCORE_BONUS_CAP);
    }
    if let Some(comments) = metadata.get("num_comments").and_then(MetaValue::as_f64) {
        score += (comments / 5.0).min(COMMENTS_BONUS_CAP);
    }

    let author = metadata.get("author").and_then(MetaValue::as_str);
    if let Some(author) = author
        && !author.is_empty()
        && author != DELETED_AUTHOR
    {
        score += AUTHOR_BONUS;
    }

    if is_top_level(post_type(metadata)) {
        score += TOP_LEVEL_BONUS;
    }

    if score.is_nan() {
        return BASE_SCORE;
    }
    score.clamp(0.0, MAX_QUALITY_SCORE)
}

#[derive(Debug, Clone)]
struct ParentSummary {
    title: String,
    text: String,
}

/// Records of one file, keyed by id, for reply-to-parent lookups.
#[derive(Debug, Default)]
pub struct ParentIndex {
    parents: HashMap<String, ParentSummary>,
}

impl ParentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: &RawRecord) {
        if record.id.is_empty() {
            return;
        }
        self.parents.insert(
            record.id.clone(),
            ParentSummary {
                title: record.title.clone(),
                text: record.text.clone(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Look up a parent by id. Forum ids may carry a `t1_`/`t3_` kind
    /// prefix that the stored records lack.
    fn get(&self, parent_id: &str) -> Option<&ParentSummary> {
        self.parents.get(parent_id).or_else(|| {
            let stripped = parent_id
                .strip_prefix("t1_")
                .or_else(|| parent_id.strip_prefix("t3_"))?;
            self.parents.get(stripped)
        })
    }
}

impl<'a> FromIterator<&'a RawRecord> for ParentIndex {
    fn from_iter<I: IntoIterator<Item = &'a RawRecord>>(iter: I) -> Self {
        let mut index = Self::new();
        for record in iter {
            index.insert(record);
        }
        index
    }
}

/// One-line summary of the thread a reply belongs to.
///
/// Returns `None` for top-level records and for replies whose parent is not
/// in `index`.
pub fn conversation_context(record: &RawRecord, index: &ParentIndex) -> Option<String> {
    if !is_reply(record.meta_str("post_type")) {
        return None;
    }
    let parent_id = record
        .meta("parent_id")
        .map(|v| MetaValue::from(v).to_string())
        .filter(|id| !id.is_empty())?;
    let parent = index.get(&parent_id)?;

    let mut parts = Vec::new();
    if !parent.title.is_empty() {
        parts.push(format!("Original post: {}", text_util::single_line(&parent.title)));
    }
    if !parent.text.is_empty() {
        let text = text_util::single_line(&parent.text);
        parts.push(format!(
            "Content: {}",
            text_util::preview(&text, DEFAULT_PREVIEW_CHARS)
        ));
    }
    if let Some(sub) = record.meta_str("subreddit").filter(|s| !s.is_empty()) {
        parts.push(format!("Community: r/{sub}"));
    } else if let Some(forum) = record
        .meta_str("community")
        .or_else(|| record.meta_str("forum"))
        .filter(|s| !s.is_empty())
    {
        parts.push(format!("Community: {forum}"));
    }

    if parts.is_empty() {
        return None;
    }
    Some(parts.join(" | "))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn meta(pairs: &[(&str, MetaValue)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn record(json: &str) -> RawRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn base_score_without_signals() {
        assert_eq!(quality_score(&Metadata::new()), 1.0);
    }

    #[test]
    fn components_add_up() {
        let m = meta(&[
            ("score", MetaValue::Int(20)),
            ("num_comments", MetaValue::Int(5)),
            ("author", MetaValue::from("sparky")),
            ("post_type", MetaValue::from("submission")),
        ]);
        // 1 + 2 + 1 + 0.5 + 1
        assert!((quality_score(&m) - 5.5).abs() < 1e-9);
    }

    #[test]
    fn deleted_author_gets_no_bonus() {
        let m = meta(&[("author", MetaValue::from("[deleted]"))]);
        assert_eq!(quality_score(&m), 1.0);
    }

    #[test]
    fn replies_get_no_top_level_bonus() {
        let m = meta(&[("post_type", MetaValue::from("comment"))]);
        assert_eq!(quality_score(&m), 1.0);
    }

    #[test]
    fn numeric_strings_count() {
        let m = meta(&[("score", MetaValue::from("30"))]);
        assert!((quality_score(&m) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn heavily_downvoted_clamps_at_zero() {
        let m = meta(&[("score", MetaValue::Int(-500))]);
        assert_eq!(quality_score(&m), 0.0);
    }

    #[test]
    fn context_for_reply_with_parent() {
        let parent = record(
            r#"{"id":"abc","title":"Best dorms?","text":"Moving in next fall.","metadata":{"post_type":"submission"}}"#,
        );
        let reply = record(
            r#"{"id":"c1","text":"West campus.","metadata":{"post_type":"comment","parent_id":"t3_abc","subreddit":"ucla"}}"#,
        );
        let index: ParentIndex = [&parent].into_iter().collect();

        assert_eq!(
            conversation_context(&reply, &index).as_deref(),
            Some("Original post: Best dorms? | Content: Moving in next fall. | Community: r/ucla")
        );
    }

    #[test]
    fn context_preview_is_bounded() {
        let long = "word ".repeat(200);
        let parent = record(&format!(r#"{{"id":"p","title":"T","text":"{long}"}}"#));
        let reply = record(r#"{"id":"c","metadata":{"post_type":"comment","parent_id":"p"}}"#);
        let index: ParentIndex = [&parent].into_iter().collect();

        let ctx = conversation_context(&reply, &index).unwrap();
        let content = ctx.split(" | ").nth(1).unwrap();
        let preview = content.strip_prefix("Content: ").unwrap();
        assert!(preview.chars().count() <= DEFAULT_PREVIEW_CHARS);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn missing_parent_is_not_an_error() {
        let reply = record(r#"{"id":"c","metadata":{"post_type":"comment","parent_id":"gone"}}"#);
        assert_eq!(conversation_context(&reply, &ParentIndex::new()), None);
    }

    #[test]
    fn top_level_records_have_no_context() {
        let parent = record(r#"{"id":"p","title":"T"}"#);
        let post = record(r#"{"id":"q","metadata":{"post_type":"submission","parent_id":"p"}}"#);
        let index: ParentIndex = [&parent].into_iter().collect();
        assert_eq!(conversation_context(&post, &index), None);
    }

    proptest! {
        #[test]
        fn score_is_clamped(score in -1e6f64..1e6, comments in -1e6f64..1e6) {
            let m = meta(&[
                ("score", MetaValue::Float(score)),
                ("num_comments", MetaValue::Float(comments)),
                ("author", MetaValue::from("a")),
                ("post_type", MetaValue::from("submission")),
            ]);
            let q = quality_score(&m);
            prop_assert!((0.0..=MAX_QUALITY_SCORE).contains(&q));
        }

        #[test]
        fn monotonic_in_engagement(
            score in 0i64..200,
            comments in 0i64..100,
            extra_score in 0i64..50,
            extra_comments in 0i64..50,
        ) {
            let low = meta(&[
                ("score", MetaValue::Int(score)),
                ("num_comments", MetaValue::Int(comments)),
            ]);
            let more_score = meta(&[
                ("score", MetaValue::Int(score + extra_score)),
                ("num_comments", MetaValue::Int(comments)),
            ]);
            let more_comments = meta(&[
                ("score", MetaValue::Int(score)),
                ("num_comments", MetaValue::Int(comments + extra_comments)),
            ]);
            prop_assert!(quality_score(&more_score) >= quality_score(&low));
            prop_assert!(quality_score(&more_comments) >= quality_score(&low));
        }
    }
}

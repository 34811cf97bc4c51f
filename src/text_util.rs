/// Default length of the content preview attached to query sources.
pub const DEFAULT_PREVIEW_CHARS: usize = 200;

const ELLIPSIS: &str = "...";

/// Truncate `text` to at most `max_chars` characters, respecting UTF-8
/// boundaries.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Shorten `text` to a preview of at most `max_chars` characters.
///
/// Text that has to be cut ends in `...`; the ellipsis counts toward the
/// limit.
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut out = truncate_chars(text, keep).trim_end().to_string();
    out.push_str(ELLIPSIS);
    out
}

/// Collapse all runs of whitespace (including newlines) to single spaces.
pub fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

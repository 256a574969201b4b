//! String utility functions.
//!
//! Character-boundary-safe truncation and identifier sanitizing shared by
//! the prompt builders, the pipeline and the stores.

use once_cell::sync::Lazy;
use regex::Regex;

static DISALLOWED_ID_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_\-\.]+").expect("static regex"));
static DUPLICATE_UNDERSCORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_+").expect("static regex"));

const MAX_ID_LENGTH: usize = 128;

/// Keep at most `max_chars` characters of `text`.
///
/// Counts Unicode scalar values, never splits a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Keep at most the last `max_chars` characters of `text`.
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    let skip = total - max_chars;
    match text.char_indices().nth(skip) {
        Some((byte_idx, _)) => &text[byte_idx..],
        None => "",
    }
}

/// Number of characters (not bytes) in `text`.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Sanitize an identifier so it is safe to use as a file stem.
///
/// Anything outside `[A-Za-z0-9_.-]` collapses to a single underscore and
/// leading dots are stripped, so `../x` can never walk out of a directory.
pub fn sanitize_id(id: &str) -> String {
    let replaced = DISALLOWED_ID_CHARS.replace_all(id.trim(), "_");
    let collapsed = DUPLICATE_UNDERSCORE.replace_all(&replaced, "_");
    let stripped = collapsed
        .trim_start_matches(|c| c == '.' || c == '_')
        .trim_end_matches('_');
    truncate_chars(stripped, MAX_ID_LENGTH).to_string()
}

/// Whether `text` has at least one cased character and all of them are upper case.
pub fn is_all_caps(text: &str) -> bool {
    let mut saw_cased = false;
    for ch in text.chars() {
        if ch.is_lowercase() {
            return false;
        }
        if ch.is_uppercase() {
            saw_cased = true;
        }
    }
    saw_cased
}

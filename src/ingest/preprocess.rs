//! Corpus cleaning ahead of extraction, indexing and summarization.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::utilities::string_utils::{char_len, truncate_chars};

static PII_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // SSN-shaped
        r"\b\d{3}-\d{2}-\d{4}\b",
        // bare 10-digit runs (phone numbers)
        r"\b\d{10}\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

pub const REDACTED: &str = "[REDACTED]";

/// Replace PII-shaped numeric patterns with `[REDACTED]`.
pub fn redact_pii(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in PII_PATTERNS.iter() {
        out = pattern.replace_all(&out, REDACTED).into_owned();
    }
    out
}

/// Trim, redact and drop empty messages, keeping order.
pub fn clean_texts<S: AsRef<str>>(texts: &[S]) -> Vec<String> {
    texts
        .iter()
        .map(|t| redact_pii(t.as_ref().trim()))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Lines shorter than this are merged with their neighbours.
pub const SHORT_LINE_CHARS: usize = 40;
/// A merged run is emitted once it reaches this length.
pub const MERGED_LINE_CHARS: usize = 100;

/// Merge runs of consecutive short lines into single lines.
///
/// Short lines accumulate (space-joined) until the run reaches
/// [`MERGED_LINE_CHARS`]; a long line flushes the run and passes through.
pub fn compact_short_lines(texts: &[String]) -> Vec<String> {
    let mut merged = Vec::with_capacity(texts.len());
    let mut buf = String::new();
    for text in texts {
        if char_len(text) < SHORT_LINE_CHARS {
            if buf.is_empty() {
                buf = text.clone();
            } else {
                buf = format!("{} {}", buf, text).trim().to_string();
            }
            if char_len(&buf) >= MERGED_LINE_CHARS {
                merged.push(std::mem::take(&mut buf));
            }
        } else {
            if !buf.is_empty() {
                merged.push(std::mem::take(&mut buf));
            }
            merged.push(text.clone());
        }
    }
    if !buf.is_empty() {
        merged.push(buf);
    }
    merged
}

/// Cap each line at `per_line` characters.
pub fn cap_lines(texts: Vec<String>, per_line: usize) -> Vec<String> {
    texts
        .into_iter()
        .map(|t| truncate_chars(&t, per_line).to_string())
        .collect()
}

/// Drop the oldest lines until the total character count fits `total_chars`.
pub fn budget_oldest_first(mut texts: Vec<String>, total_chars: usize) -> Vec<String> {
    let mut total: usize = texts.iter().map(|t| char_len(t)).sum();
    let mut drop = 0;
    while drop < texts.len() && total > total_chars {
        total -= char_len(&texts[drop]);
        drop += 1;
    }
    texts.drain(..drop);
    texts
}

/// The last `n` items, or everything when `n` is zero.
pub fn last_n<T: Clone>(items: &[T], n: usize) -> Vec<T> {
    if n == 0 || n >= items.len() {
        items.to_vec()
    } else {
        items[items.len() - n..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_pii() {
        assert_eq!(redact_pii("ssn 123-45-6789 ok"), "ssn [REDACTED] ok");
        assert_eq!(redact_pii("call 5551234567"), "call [REDACTED]");
        assert_eq!(redact_pii("year 2024 and 55512345678"), "year 2024 and 55512345678");
    }

    #[test]
    fn test_clean_texts_drops_blank() {
        let cleaned = clean_texts(&["  hi  ", "   ", "", "yo"]);
        assert_eq!(cleaned, vec!["hi".to_string(), "yo".to_string()]);
    }

    #[test]
    fn test_compact_short_lines() {
        let long = "x".repeat(60);
        let input = vec![
            "a".to_string(),
            "b".to_string(),
            long.clone(),
            "c".to_string(),
        ];
        assert_eq!(
            compact_short_lines(&input),
            vec!["a b".to_string(), long, "c".to_string()]
        );
    }

    #[test]
    fn test_compact_flushes_at_merged_length() {
        let line = "y".repeat(35);
        let input = vec![line.clone(), line.clone(), line.clone(), line.clone()];
        let out = compact_short_lines(&input);
        // 35 + 1 + 35 + 1 + 35 = 107 >= 100 flushes after the third line
        assert_eq!(out.len(), 2);
        assert_eq!(char_len(&out[0]), 107);
        assert_eq!(out[1], line);
    }

    #[test]
    fn test_budget_drops_oldest() {
        let texts = vec!["aaaa".to_string(), "bbbb".to_string(), "cc".to_string()];
        assert_eq!(
            budget_oldest_first(texts, 6),
            vec!["bbbb".to_string(), "cc".to_string()]
        );
    }

    #[test]
    fn test_last_n() {
        let v = vec![1, 2, 3, 4];
        assert_eq!(last_n(&v, 2), vec![3, 4]);
        assert_eq!(last_n(&v, 0), v);
        assert_eq!(last_n(&v, 10), v);
    }
}

//! Fixed word lists the style extractor matches against.
//!
//! Every list is data, not code: a [`Lexicons`] value can be deserialized
//! from configuration to retune extraction without touching the extractor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Emoji counted by the compact (basic) trait summary.
pub const BASIC_EMOJI: &str = "😀😃😄😁😆😅😂🙂😉😊😍😘🤔🙃😭🤣✨🔥💯👍🙏❤";

/// Emoji counted by the rich trait extraction.
pub const RICH_EMOJI: &str =
    "😀😃😄😁😆😅😂🙂😉😊😍😘🤔🙃😭🤣✨🔥💯👍🙏❤💀😬😎😜😇😏🥲😤😢🤷😮💨";

pub const BASIC_SLANG: &[&str] = &["lol", "brb", "idk", "btw", "omg", "ikr"];

pub const SLANG_WORDS: &[&str] = &[
    "bruh", "ngl", "lowkey", "highkey", "fr", "ong", "tbh", "idk", "ikr", "btw", "lol", "lmao",
    "rofl", "smh", "af", "jk", "imo", "imho", "yeet", "sus", "cap", "no cap", "bet", "rip", "brb",
    "gg", "ggs",
];

pub const POLITENESS: &[&str] = &["please", "pls", "plz", "thank you", "thanks", "ty", "tysm"];

pub const HEDGES: &[&str] = &["maybe", "perhaps", "i think", "kinda", "sort of", "might"];

pub const POSITIVE_WORDS: &[&str] = &[
    "great", "good", "nice", "love", "awesome", "cool", "yay", "win", "like",
];

pub const NEGATIVE_WORDS: &[&str] = &[
    "bad", "hate", "annoying", "ugh", "worst", "lame", "sad", "angry", "fail",
];

pub const HUMOR_MARKERS: &[&str] = &["lol", "lmao", "meme"];

pub const GEN_Z_MARKERS: &[&str] = &["bruh", "ngl", "lowkey", "fr"];

pub const SUBCULTURE_MARKERS: &[&str] = &["anime", "clan", "guild", "discord"];

pub const MEDIA_STOP_WORDS: &[&str] = &[
    "the", "and", "with", "this", "that", "have", "from", "over", "under", "your", "into", "about",
];

const REGIONAL: &[(&str, &[&str])] = &[
    ("US-South", &["y'all", "fixin'", "ain't"]),
    ("UK", &["mate", "cheers", "bloody"]),
    ("AU/NZ", &["mate", "heaps", "keen"]),
];

const TOPICS: &[(&str, &[&str])] = &[
    (
        "media",
        &[
            "anime", "manga", "movie", "show", "season", "episode", "game", "gaming", "lofi",
            "music", "song", "meme", "memes",
        ],
    ),
    (
        "lifestyle",
        &[
            "gym", "workout", "travel", "trip", "food", "snack", "coffee", "tea", "run", "hike",
            "bike",
        ],
    ),
    (
        "technology",
        &[
            "ai", "gpt", "llm", "python", "javascript", "crypto", "gpu", "server", "dev", "code",
        ],
    ),
    (
        "community",
        &["school", "work", "job", "team", "fandom", "discord", "guild", "clan"],
    ),
    (
        "events",
        &["news", "politics", "election", "war", "update", "launch", "release"],
    ),
];

/// Word lists used by [`StyleExtractor`](super::style::StyleExtractor).
///
/// Matching is case-insensitive. Multi-word entries ("thank you") match as
/// substrings; topic words match on word boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lexicons {
    pub basic_emoji: String,
    pub emoji: String,
    pub basic_slang: Vec<String>,
    pub slang: Vec<String>,
    pub politeness: Vec<String>,
    pub hedges: Vec<String>,
    pub positive: Vec<String>,
    pub negative: Vec<String>,
    pub humor_markers: Vec<String>,
    pub gen_z_markers: Vec<String>,
    pub subculture_markers: Vec<String>,
    /// Region label → marker words, in reporting order.
    pub regional: Vec<(String, Vec<String>)>,
    /// Topic category → vocabulary.
    pub topics: BTreeMap<String, Vec<String>>,
    pub media_stop_words: Vec<String>,
}

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl Default for Lexicons {
    fn default() -> Self {
        Self {
            basic_emoji: BASIC_EMOJI.to_string(),
            emoji: RICH_EMOJI.to_string(),
            basic_slang: owned(BASIC_SLANG),
            slang: owned(SLANG_WORDS),
            politeness: owned(POLITENESS),
            hedges: owned(HEDGES),
            positive: owned(POSITIVE_WORDS),
            negative: owned(NEGATIVE_WORDS),
            humor_markers: owned(HUMOR_MARKERS),
            gen_z_markers: owned(GEN_Z_MARKERS),
            subculture_markers: owned(SUBCULTURE_MARKERS),
            regional: REGIONAL
                .iter()
                .map(|(region, words)| (region.to_string(), owned(words)))
                .collect(),
            topics: TOPICS
                .iter()
                .map(|(cat, words)| (cat.to_string(), owned(words)))
                .collect(),
            media_stop_words: owned(MEDIA_STOP_WORDS),
        }
    }
}

impl Lexicons {
    pub fn is_emoji(&self, ch: char) -> bool {
        self.emoji.contains(ch)
    }

    pub fn is_basic_emoji(&self, ch: char) -> bool {
        self.basic_emoji.contains(ch)
    }
}

/// Whether `word` occurs in `haystack` delimited by non-word characters.
///
/// Both sides are expected to already be lower-cased.
pub fn contains_word(haystack: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    haystack.match_indices(word).any(|(start, _)| {
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !is_word(c));
        let after_ok = haystack[start + word.len()..]
            .chars()
            .next()
            .map_or(true, |c| !is_word(c));
        before_ok && after_ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_word_boundaries() {
        assert!(contains_word("i love anime", "anime"));
        assert!(contains_word("anime!", "anime"));
        assert!(!contains_word("animes are cool", "anime"));
        assert!(!contains_word("said", "ai"));
        assert!(contains_word("ai stuff", "ai"));
    }

    #[test]
    fn test_default_lexicons_cover_categories() {
        let lex = Lexicons::default();
        assert_eq!(lex.topics.len(), 5);
        assert!(lex.topics["technology"].contains(&"gpu".to_string()));
        assert!(lex.is_emoji('💀'));
        assert!(!lex.is_basic_emoji('💀'));
        assert_eq!(lex.regional[0].0, "US-South");
    }
}

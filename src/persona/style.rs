//! Deterministic style extraction.
//!
//! [`StyleExtractor::extract`] turns a corpus of messages into
//! [`StyleFeatures`] using closed-form statistics only: character and word
//! counts, lexicon membership, capitalization ratios and punctuation
//! repetition. Each statistic maps to a label through a cutoff in
//! [`StyleThresholds`]; the same corpus and configuration always produce the
//! same features.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ingest::preprocess::redact_pii;
use crate::persona::lexicon::{contains_word, Lexicons};
use crate::utilities::string_utils::{char_len, is_all_caps, tail_chars};

static SENTENCE_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+").expect("static regex"));
static GREETING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(yo|hey|hi|sup|hello)\b").expect("static regex"));
static ADVICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(you should|try|consider)\b").expect("static regex"));
static VENTING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(i'?m|i am) (tired|annoyed|done)\b").expect("static regex")
});
static CAPTION_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z]{3,}").expect("static regex"));

/// Cutoffs mapping corpus statistics onto labels.
///
/// | field | label when exceeded |
/// |---|---|
/// | `short_length_chars` / `long_length_chars` | average length → short / medium / long |
/// | `lowercase_msg_ratio` | capitalization → "always lowercase" |
/// | `all_caps_word_ratio` | capitalization → "frequent ALL CAPS", exaggeration → frequent |
/// | `punctuation_per_msg` | punctuation → "frequent !!! and ???" |
/// | `repeat_punct_ratio` | punctuation → "uses ellipses and repeats", exaggeration → frequent |
/// | `emoji_end_ratio` | emoji placement → "at end of sentences" |
/// | `elongated_ratio` | typos → "some elongated words/typos" |
/// | `gif_count` | media usage → "GIFs often" (at least this many) |
/// | `sentiment_ratio` | optimism → optimistic / pessimistic |
/// | `hedge_rate` | directness → hedged (at or above) |
/// | `expressive_emoji_per_msg` / `expressive_exclaim_per_msg` | expressiveness → expressive |
/// | `short_msg_chars` | what counts as a short message |
/// | `burst_ratio` | bursts → "often sends short bursts" |
/// | `greeting_ratio` | initiation → "often starts casually" |
/// | `mention_ratio` | mentions → frequent |
/// | `habit_min_hits` | advice-giving / venting (more than this many messages) |
/// | `emoji_rare_rate` / `emoji_occasional_rate` | basic emoji rate → rare / occasional / frequent |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleThresholds {
    pub short_length_chars: f64,
    pub long_length_chars: f64,
    pub lowercase_msg_ratio: f64,
    pub all_caps_word_ratio: f64,
    pub punctuation_per_msg: f64,
    pub repeat_punct_ratio: f64,
    pub emoji_end_ratio: f64,
    pub elongated_ratio: f64,
    pub gif_count: usize,
    pub sentiment_ratio: f64,
    pub hedge_rate: f64,
    pub expressive_emoji_per_msg: f64,
    pub expressive_exclaim_per_msg: f64,
    pub short_msg_chars: usize,
    pub burst_ratio: f64,
    pub greeting_ratio: f64,
    pub mention_ratio: f64,
    pub habit_min_hits: usize,
    pub emoji_rare_rate: f64,
    pub emoji_occasional_rate: f64,
}

impl Default for StyleThresholds {
    fn default() -> Self {
        Self {
            short_length_chars: 80.0,
            long_length_chars: 180.0,
            lowercase_msg_ratio: 0.7,
            all_caps_word_ratio: 0.05,
            punctuation_per_msg: 1.0,
            repeat_punct_ratio: 0.3,
            emoji_end_ratio: 0.4,
            elongated_ratio: 0.1,
            gif_count: 3,
            sentiment_ratio: 1.2,
            hedge_rate: 0.1,
            expressive_emoji_per_msg: 0.5,
            expressive_exclaim_per_msg: 0.5,
            short_msg_chars: 40,
            burst_ratio: 0.6,
            greeting_ratio: 0.2,
            mention_ratio: 0.3,
            habit_min_hits: 2,
            emoji_rare_rate: 0.001,
            emoji_occasional_rate: 0.01,
        }
    }
}

impl StyleThresholds {
    /// Average message length in characters → short / medium / long.
    pub fn length_label(&self, avg_chars: f64) -> &'static str {
        if avg_chars < self.short_length_chars {
            "short"
        } else if avg_chars < self.long_length_chars {
            "medium"
        } else {
            "long"
        }
    }

    /// Emoji per character → rare / occasional / frequent.
    pub fn emoji_rate_label(&self, rate: f64) -> &'static str {
        if rate < self.emoji_rare_rate {
            "rare"
        } else if rate < self.emoji_occasional_rate {
            "occasional"
        } else {
            "frequent"
        }
    }
}

// ============================================================================
// Feature types
// ============================================================================

/// Compact trait summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicTraits {
    pub tone: String,
    pub emoji_rate: f64,
    pub avg_length: f64,
    pub slang: Vec<String>,
    pub topics: Vec<String>,
    pub response_style: String,
}

impl Default for BasicTraits {
    fn default() -> Self {
        Self {
            tone: "neutral".to_string(),
            emoji_rate: 0.0,
            avg_length: 0.0,
            slang: Vec::new(),
            topics: Vec::new(),
            response_style: "concise".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextStyle {
    pub message_length: String,
    pub length_label: String,
    pub sentence_complexity: String,
    pub capitalization: String,
    pub punctuation: String,
    pub emoji_use: String,
    pub slang: Vec<String>,
    pub typos: String,
    pub formatting: String,
    pub media_usage: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Personality {
    pub humor: String,
    pub directness: String,
    pub formality: String,
    pub optimism: String,
    pub expressiveness: String,
    pub politeness: String,
    pub exaggeration: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationHabits {
    pub message_bursts: String,
    pub initiation: String,
    pub question_frequency: String,
    pub mentions: String,
    pub reply_style: String,
    pub advice_vs_venting: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Beliefs {
    pub values: Vec<String>,
    pub worldview: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Culture {
    pub generation: String,
    pub subcultures: Vec<String>,
    pub regional_references: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaTraits {
    pub captions: Vec<String>,
    pub keywords: Vec<String>,
}

/// Topic category → matched keywords (sorted, at most ten per category).
pub type TopicMap = BTreeMap<String, Vec<String>>;

/// Detailed trait breakdown. Every section is empty for an empty corpus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RichTraits {
    pub text_style: TextStyle,
    pub personality: Personality,
    pub conversation: ConversationHabits,
    pub topics: TopicMap,
    pub beliefs: Beliefs,
    pub culture: Culture,
    pub media: MediaTraits,
}

/// Everything the extractor derives from one corpus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleFeatures {
    pub basic: BasicTraits,
    pub rich: RichTraits,
}

// ============================================================================
// Extractor
// ============================================================================

/// Pure corpus → features transform.
#[derive(Debug, Clone, Default)]
pub struct StyleExtractor {
    thresholds: StyleThresholds,
    lexicons: Lexicons,
}

impl StyleExtractor {
    pub fn new(thresholds: StyleThresholds, lexicons: Lexicons) -> Self {
        Self {
            thresholds,
            lexicons,
        }
    }

    pub fn thresholds(&self) -> &StyleThresholds {
        &self.thresholds
    }

    /// Extract basic and rich traits. Never fails.
    ///
    /// Input is PII-redacted and trimmed first; blank messages are ignored.
    pub fn extract(&self, corpus: &[String], media_captions: &[String]) -> StyleFeatures {
        let texts: Vec<String> = corpus
            .iter()
            .map(|t| redact_pii(t.trim()))
            .filter(|t| !t.is_empty())
            .collect();
        StyleFeatures {
            basic: self.basic_traits(&texts),
            rich: self.rich_traits(&texts, media_captions),
        }
    }

    /// Compact summary: tone, emoji rate per character, average length, slang.
    pub fn basic_traits(&self, texts: &[String]) -> BasicTraits {
        if texts.is_empty() {
            return BasicTraits::default();
        }
        let total_len: usize = texts.iter().map(|t| char_len(t)).sum();
        let avg_len = total_len as f64 / texts.len() as f64;
        let emoji_count = texts
            .iter()
            .flat_map(|t| t.chars())
            .filter(|c| self.lexicons.is_basic_emoji(*c))
            .count();
        let lowered: Vec<String> = texts.iter().map(|t| t.to_lowercase()).collect();
        let mut slang: Vec<String> = self
            .lexicons
            .basic_slang
            .iter()
            .filter(|w| lowered.iter().any(|t| t.contains(w.as_str())))
            .cloned()
            .collect();
        slang.sort();
        slang.dedup();

        BasicTraits {
            tone: "casual".to_string(),
            emoji_rate: emoji_count as f64 / total_len.max(1) as f64,
            avg_length: avg_len,
            slang,
            topics: Vec::new(),
            response_style: if avg_len < self.thresholds.short_length_chars {
                "concise"
            } else {
                "detailed"
            }
            .to_string(),
        }
    }

    /// Full breakdown of text style, personality, habits, topics and culture.
    pub fn rich_traits(&self, texts: &[String], media_captions: &[String]) -> RichTraits {
        if texts.is_empty() {
            return RichTraits::default();
        }
        let th = &self.thresholds;
        let lex = &self.lexicons;
        let n = texts.len() as f64;
        let lowered: Vec<String> = texts.iter().map(|t| t.to_lowercase()).collect();
        let padded: Vec<String> = lowered.iter().map(|t| format!(" {} ", t)).collect();

        let total_chars: usize = texts.iter().map(|t| char_len(t)).sum();
        let words: Vec<&str> = texts.iter().flat_map(|t| t.split_whitespace()).collect();
        let total_words = words.len();
        let avg_chars = total_chars as f64 / n;
        let avg_words = total_words as f64 / n;

        let sentences: usize = texts
            .iter()
            .map(|t| {
                SENTENCE_SPLIT
                    .split(t)
                    .filter(|s| !s.trim().is_empty())
                    .count()
                    .max(1)
            })
            .sum();
        let complexity = total_words as f64 / sentences.max(1) as f64;

        // Capitalization
        let lowercase_msgs = texts
            .iter()
            .zip(&lowered)
            .filter(|(t, l)| t == l)
            .count();
        let upper_words = words
            .iter()
            .filter(|w| char_len(w) > 1 && is_all_caps(w))
            .count();
        let caps_ratio = upper_words as f64 / total_words.max(1) as f64;
        let capitalization = if lowercase_msgs as f64 / n > th.lowercase_msg_ratio {
            "always lowercase"
        } else if caps_ratio > th.all_caps_word_ratio {
            "frequent ALL CAPS"
        } else {
            "mixed"
        };

        // Punctuation
        let exclaims: usize = texts.iter().map(|t| t.matches('!').count()).sum();
        let questions: usize = texts.iter().map(|t| t.matches('?').count()).sum();
        let repeated = texts
            .iter()
            .filter(|t| t.contains("!!") || t.contains("??") || t.contains("..."))
            .count();
        let repeat_ratio = repeated as f64 / n;
        let punctuation = if (exclaims + questions) as f64 / n > th.punctuation_per_msg {
            "frequent !!! and ???"
        } else if repeat_ratio > th.repeat_punct_ratio {
            "uses ellipses and repeats"
        } else {
            "normal"
        };

        // Emoji
        let emoji_total = texts
            .iter()
            .flat_map(|t| t.chars())
            .filter(|c| lex.is_emoji(*c))
            .count();
        let emoji_per_msg = emoji_total as f64 / n;
        let emoji_at_end = texts
            .iter()
            .filter(|t| tail_chars(t, 3).chars().any(|c| lex.is_emoji(c)))
            .count();
        let emoji_place = if emoji_at_end as f64 / n > th.emoji_end_ratio {
            "at end of sentences"
        } else {
            "inline"
        };
        let top_emojis = most_common(texts.iter().flat_map(|t| t.chars()).filter(|c| lex.is_emoji(*c)), 5);
        let emoji_use = if top_emojis.is_empty() {
            emoji_place.to_string()
        } else {
            let listed: Vec<String> = top_emojis.iter().map(|c| c.to_string()).collect();
            format!("{}; {}", listed.join(", "), emoji_place)
        };

        let mut slang: Vec<String> = lex
            .slang
            .iter()
            .filter(|w| lowered.iter().any(|t| t.contains(w.as_str())))
            .cloned()
            .collect();
        slang.sort();
        slang.dedup();

        let elongated = texts.iter().filter(|t| has_elongation(t)).count();
        let typos = if elongated as f64 / n > th.elongated_ratio {
            "some elongated words/typos"
        } else {
            "rare"
        };

        let code_blocks = texts.iter().any(|t| t.contains('`'));
        let quotes = texts.iter().any(|t| t.trim().starts_with('>'));
        let formatting = match (code_blocks, quotes) {
            (true, true) => "code blocks, quote replies",
            (true, false) => "code blocks",
            (false, true) => "quote replies",
            (false, false) => "plain",
        };

        let media_lines: Vec<&String> = texts
            .iter()
            .filter(|t| t.starts_with("[attachments:"))
            .collect();
        let gifs = media_lines
            .iter()
            .filter(|t| t.to_lowercase().contains(".gif"))
            .count();
        let media_usage = if gifs >= th.gif_count {
            "GIFs often"
        } else if !media_lines.is_empty() {
            "images sometimes"
        } else {
            "rare"
        };

        // Personality
        let positive: usize = lowered
            .iter()
            .map(|t| lex.positive.iter().map(|w| t.matches(w.as_str()).count()).sum::<usize>())
            .sum();
        let negative: usize = lowered
            .iter()
            .map(|t| lex.negative.iter().map(|w| t.matches(w.as_str()).count()).sum::<usize>())
            .sum();
        let optimism = if positive as f64 > negative as f64 * th.sentiment_ratio {
            "optimistic"
        } else if negative as f64 > positive as f64 * th.sentiment_ratio {
            "pessimistic"
        } else {
            "neutral"
        };
        let hedge_hits = count_hits(&lowered, &lex.hedges);
        let directness = if (hedge_hits as f64 / n) < th.hedge_rate {
            "direct"
        } else {
            "hedged"
        };
        let politeness = if count_hits(&lowered, &lex.politeness) > 0 {
            "polite"
        } else {
            "informal"
        };
        let expressiveness = if emoji_per_msg > th.expressive_emoji_per_msg
            || exclaims as f64 / n > th.expressive_exclaim_per_msg
        {
            "expressive"
        } else {
            "reserved"
        };
        let humor = if any_padded(&padded, &lex.humor_markers) {
            "meme-heavy"
        } else {
            "subtle"
        };
        let exaggeration =
            if repeat_ratio > th.repeat_punct_ratio || caps_ratio > th.all_caps_word_ratio {
                "frequent"
            } else {
                "rare"
            };
        let formality = if capitalization == "always lowercase" || !slang.is_empty() {
            "informal"
        } else {
            "mixed"
        };

        // Conversation habits
        let short_ratio = texts
            .iter()
            .filter(|t| char_len(t) < th.short_msg_chars)
            .count() as f64
            / n;
        let message_bursts = if short_ratio > th.burst_ratio {
            "often sends short bursts"
        } else {
            "balanced"
        };
        let greetings = texts.iter().filter(|t| GREETING.is_match(t.trim())).count();
        let initiation = if greetings as f64 / n > th.greeting_ratio {
            "often starts casually"
        } else {
            "varied"
        };
        let question_rate = texts.iter().filter(|t| t.contains('?')).count() as f64 / n;
        let mentions = texts.iter().filter(|t| t.contains('@')).count() as f64 / n;
        let reply_style = if quotes {
            "quotes"
        } else if short_ratio > th.burst_ratio {
            "short quips"
        } else {
            "mixed"
        };
        let advice = texts.iter().filter(|t| ADVICE.is_match(t)).count();
        let venting = texts.iter().filter(|t| VENTING.is_match(t)).count();
        let advice_vs_venting = if advice > th.habit_min_hits {
            "advice-giving"
        } else if venting > th.habit_min_hits {
            "venting"
        } else {
            "mixed"
        };

        // Topics
        let mut topics = TopicMap::new();
        for (category, vocab) in &lex.topics {
            let mut found: Vec<String> = vocab
                .iter()
                .filter(|w| lowered.iter().any(|t| contains_word(t, &w.to_lowercase())))
                .cloned()
                .collect();
            found.sort();
            found.dedup();
            found.truncate(10);
            if !found.is_empty() {
                topics.insert(category.clone(), found);
            }
        }

        // Culture
        let generation = if any_padded(&padded, &lex.gen_z_markers) {
            "Gen Z"
        } else {
            "Millennial"
        };
        let regional_references: Vec<String> = lex
            .regional
            .iter()
            .filter(|(_, markers)| count_hits(&lowered, markers) > 0)
            .map(|(region, _)| region.clone())
            .collect();
        let mut subcultures = Vec::new();
        if count_hits(&lowered, &lex.subculture_markers) > 0 {
            subcultures.push("Discord/anime/gaming culture".to_string());
        }

        RichTraits {
            text_style: TextStyle {
                message_length: format!("avg {:.1} words", avg_words),
                length_label: th.length_label(avg_chars).to_string(),
                sentence_complexity: format!("avg {:.1} words/sentence", complexity),
                capitalization: capitalization.to_string(),
                punctuation: punctuation.to_string(),
                emoji_use,
                slang,
                typos: typos.to_string(),
                formatting: formatting.to_string(),
                media_usage: media_usage.to_string(),
            },
            personality: Personality {
                humor: humor.to_string(),
                directness: directness.to_string(),
                formality: formality.to_string(),
                optimism: optimism.to_string(),
                expressiveness: expressiveness.to_string(),
                politeness: politeness.to_string(),
                exaggeration: exaggeration.to_string(),
            },
            conversation: ConversationHabits {
                message_bursts: message_bursts.to_string(),
                initiation: initiation.to_string(),
                question_frequency: format!("{:.0}% of messages", question_rate * 100.0),
                mentions: if mentions > th.mention_ratio {
                    "frequent"
                } else {
                    "occasional"
                }
                .to_string(),
                reply_style: reply_style.to_string(),
                advice_vs_venting: advice_vs_venting.to_string(),
            },
            topics,
            beliefs: Beliefs::default(),
            culture: Culture {
                generation: generation.to_string(),
                subcultures,
                regional_references,
            },
            media: MediaTraits {
                captions: media_captions.iter().take(20).cloned().collect(),
                keywords: self.media_keywords(media_captions),
            },
        }
    }

    /// Top eight caption tokens of three or more letters, minus stop words.
    pub fn media_keywords(&self, captions: &[String]) -> Vec<String> {
        let tokens = captions.iter().flat_map(|c| {
            CAPTION_TOKEN
                .find_iter(c)
                .map(|m| m.as_str().to_lowercase())
                .collect::<Vec<_>>()
        });
        let stop = &self.lexicons.media_stop_words;
        most_common(tokens.filter(|w| !stop.contains(w)), 8)
    }
}

/// Number of (message, word) pairs where the word occurs in the message.
fn count_hits(lowered: &[String], words: &[String]) -> usize {
    lowered
        .iter()
        .map(|t| words.iter().filter(|w| t.contains(w.as_str())).count())
        .sum()
}

/// Whether any marker occurs as a space-delimited word in a padded message.
fn any_padded(padded: &[String], markers: &[String]) -> bool {
    padded
        .iter()
        .any(|t| markers.iter().any(|m| t.contains(&format!(" {} ", m))))
}

/// An ASCII letter repeated at least three times in a row ("sooo").
fn has_elongation(text: &str) -> bool {
    let mut prev = None;
    let mut run = 0;
    for ch in text.chars() {
        if ch.is_ascii_alphabetic() && Some(ch) == prev {
            run += 1;
            if run >= 3 {
                return true;
            }
        } else {
            run = 1;
        }
        prev = Some(ch);
    }
    false
}

/// The `limit` most frequent items; ties keep first-seen order.
fn most_common<T, I>(items: I, limit: usize) -> Vec<T>
where
    T: Eq + std::hash::Hash + Clone,
    I: IntoIterator<Item = T>,
{
    let mut counts: HashMap<T, usize> = HashMap::new();
    let mut order: Vec<T> = Vec::new();
    for item in items {
        let entry = counts.entry(item.clone()).or_insert(0);
        if *entry == 0 {
            order.push(item);
        }
        *entry += 1;
    }
    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    order.truncate(limit);
    order
}

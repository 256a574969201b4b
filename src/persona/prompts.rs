//! Prompt templates.
//!
//! Every prompt the crate sends to the generation and vision backends is
//! built here, so wording changes stay in one file.

use crate::persona::style::{BasicTraits, RichTraits, StyleThresholds};

/// Opening line of the persona analysis prompt. A stored style prompt that
/// contains it is an echoed request, not a style guide.
pub const LEAKED_ANALYSIS_MARKER: &str = "You are to analyze the writing style";

/// Appended to a speak prompt when the first draft copied a snippet.
pub const PARAPHRASE_INSTRUCTION: &str =
    "Rephrase completely in your own words and avoid phrases from snippets.";

/// Messages considered by one persona analysis prompt.
const CREATION_PROMPT_MAX_MESSAGES: usize = 200;

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() {
        default
    } else {
        value
    }
}

fn join_first(items: &[String], n: usize) -> String {
    items
        .iter()
        .take(n)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Bullet style guide from the compact trait summary.
pub fn style_from_traits(username: &str, traits: &BasicTraits, thresholds: &StyleThresholds) -> String {
    let length = match thresholds.length_label(traits.avg_length) {
        "short" => "short (1-2 sentences)",
        "medium" => "medium (2-4 sentences)",
        _ => "long (4+ sentences)",
    };
    let slang = if traits.slang.is_empty() {
        "minimal slang".to_string()
    } else {
        join_first(&traits.slang, 6)
    };
    let topics = if traits.topics.is_empty() {
        "varied server topics".to_string()
    } else {
        join_first(&traits.topics, 6)
    };
    format!(
        "Style guide for @{username}:\n\
         - Tone: {tone}\n\
         - Emoji: {emoji}\n\
         - Length: {length}\n\
         - Slang: {slang}\n\
         - Topics: {topics}\n\
         - Response style: {style}",
        tone = or_default(&traits.tone, "neutral"),
        emoji = thresholds.emoji_rate_label(traits.emoji_rate),
        style = or_default(&traits.response_style, "concise"),
    )
}

/// Observed-style block from the detailed trait breakdown.
pub fn rich_traits_to_style(username: &str, rich: &RichTraits) -> String {
    let ts = &rich.text_style;
    let per = &rich.personality;
    let conv = &rich.conversation;

    let topics = if rich.topics.is_empty() {
        "varied".to_string()
    } else {
        rich.topics
            .iter()
            .take(4)
            .map(|(cat, words)| format!("{}: {}", cat, join_first(words, 3)))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let slang = if ts.slang.is_empty() {
        "minimal".to_string()
    } else {
        join_first(&ts.slang, 6)
    };

    let mut out = format!(
        "Observed style for @{username}:\n\
         - Length: {}\n\
         - Complexity: {}\n\
         - Capitalization: {}\n\
         - Punctuation: {}\n\
         - Emoji: {}\n\
         - Slang: {slang}\n\
         - Formatting: {} | Media: {}\n\
         - Personality: humor {}, {}, {}\n\
         - Expressiveness: {}; Politeness: {}\n\
         - Habits: {}; Questions: {}; Mentions: {}\n\
         - Reply style: {}\n\
         - Topics: {topics}\n",
        or_default(&ts.message_length, "unknown"),
        or_default(&ts.sentence_complexity, "unknown"),
        or_default(&ts.capitalization, "mixed"),
        or_default(&ts.punctuation, "normal"),
        ts.emoji_use,
        or_default(&ts.formatting, "plain"),
        or_default(&ts.media_usage, "rare"),
        or_default(&per.humor, "subtle"),
        or_default(&per.directness, "direct"),
        or_default(&per.formality, "informal"),
        or_default(&per.expressiveness, "neutral"),
        or_default(&per.politeness, "informal"),
        or_default(&conv.message_bursts, "balanced"),
        or_default(&conv.question_frequency, "n/a"),
        or_default(&conv.mentions, "occasional"),
        or_default(&conv.reply_style, "mixed"),
    );
    if !rich.media.keywords.is_empty() {
        out.push_str(&format!("- Media tags: {}\n", join_first(&rich.media.keywords, 6)));
    }
    if !rich.beliefs.values.is_empty() {
        out.push_str(&format!("- Values: {}\n", join_first(&rich.beliefs.values, 6)));
    }
    if let Some(worldview) = rich.beliefs.worldview.as_deref().filter(|w| !w.is_empty()) {
        out.push_str(&format!("- Worldview: {}\n", worldview));
    }
    out
}

/// Ask for a compact bullet style guide from recent messages.
pub fn persona_creation_prompt(username: &str, recent_messages: &[String]) -> String {
    let block = recent_messages
        .iter()
        .take(CREATION_PROMPT_MAX_MESSAGES)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "{LEAKED_ANALYSIS_MARKER} of user @{username} from the following messages.\n\
         Summarize their persona with:\n\
         - Tone\n\
         - Emoji rate\n\
         - Average message length\n\
         - Common slang words/phrases\n\
         - Top recurring topics\n\
         - Response style (structure, pacing, quirks)\n\n\
         Return a compact style guide in bullet points, suitable as a system prompt.\n\
         Messages (most recent last):\n{block}"
    )
}

/// Merge partial style guides into one.
pub fn merge_style_prompt(username: &str, guides: &[String], media_keywords: &[String]) -> String {
    let media_line = if media_keywords.is_empty() {
        String::new()
    } else {
        format!(
            "\nInclude media-related quirks/tags if consistently present: {}",
            join_first(media_keywords, 6)
        )
    };
    format!(
        "Merge the following partial style guides for @{username} into one concise persona style guide.\n\
         Keep bullet format. Prioritize consistent traits across chunks.\n\
         Do not include contradictions or redundant bullets.\n\
         Focus on textual style, tone, habits, and common topics.{media_line}\n\n\
         Partial style guides:\n{}",
        guides.join("\n---\n")
    )
}

/// Grounded in-voice reply prompt.
pub fn speak_prompt(username: &str, style_block: &str, query: &str, snippets: &[String]) -> String {
    let rag_block = if snippets.is_empty() {
        String::new()
    } else {
        format!("\n\n[Relevant snippets]\n{}", snippets.join("\n---\n"))
    };
    format!(
        "System style for @{username}:\n{style_block}\n\n\
         You are writing as the AI persona of @{username}. Keep responses natural and in their style.\n\
         Reflect their stated values and worldview authentically, without hedging. \
         Prioritize fidelity to their beliefs over generic helpfulness.\n\
         Avoid copying training snippets; paraphrase when referencing past content.\n\
         User: {query}{rag_block}"
    )
    .trim()
    .to_string()
}

/// `prompt` plus the paraphrase instruction.
pub fn with_paraphrase_instruction(prompt: &str) -> String {
    format!("{}\n\n{}", prompt, PARAPHRASE_INSTRUCTION)
}

fn images_block(captions: &[String]) -> String {
    if captions.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = captions.iter().map(|c| format!("- {}", c)).collect();
    format!("\n\n[Images]\n{}", lines.join("\n"))
}

const SUMMARY_FORMAT: &str = "Output format:\n\
     - Key points: 3-6 bullets\n\
     - Questions/requests: bullets (if any)\n\
     - Action items: bullets (if any)\n\n";

/// Content-focused summary of a message window.
pub fn summarize_prompt(username: &str, messages: &[String], image_captions: &[String]) -> String {
    format!(
        "You are summarizing the last {count} messages from @{username}.\n\
         Produce a concise, content-focused summary that captures what they actually said or asked.\n\
         Prioritize: key points, questions/requests, decisions, action items, links/references, \
         and any concrete info shared.\n\
         Include notable content from images if provided.\n\
         Avoid describing tone, style, or personality traits. Do not invent details.\n\n\
         {SUMMARY_FORMAT}\
         Messages (most recent last):\n{messages}{images}",
        count = messages.len(),
        messages = messages.join("\n"),
        images = images_block(image_captions),
    )
}

/// Merge partial content summaries.
pub fn merge_summaries_prompt(username: &str, partials: &[String], image_captions: &[String]) -> String {
    format!(
        "Merge the following partial summaries into a final concise summary for @{username}.\n\
         Do not repeat bullets. Consolidate overlapping points. Focus on concrete info, \
         questions/requests, decisions, action items, links/references.\n\
         Avoid tone/style commentary and do not invent details.\n\n\
         {SUMMARY_FORMAT}\
         Partial summaries:\n{partials}{images}",
        partials = partials.join("\n---\n"),
        images = images_block(image_captions),
    )
}

/// Instruction sent to the vision model with an image.
pub fn image_caption_prompt(hint: Option<&str>, filename: Option<&str>) -> String {
    let hint = hint
        .filter(|h| !h.trim().is_empty())
        .map(|h| format!("\nContext: {}", h))
        .unwrap_or_default();
    let file = filename
        .filter(|f| !f.trim().is_empty())
        .map(|f| format!(" (file: {})", f))
        .unwrap_or_default();
    format!(
        "You are an accurate image captioner. \
         Describe the image in one short sentence with concrete, visible facts. \
         Extract on-image text verbatim if clearly legible (OCR). \
         Do NOT guess identities, locations, or brands that are not explicitly visible. \
         If unsure, say 'uncertain'.{hint}\nOutput one sentence caption{file}:"
    )
}

/// Text-only pass stripping guesses from a caption.
pub fn caption_refine_prompt(caption: &str, context: &str) -> String {
    format!(
        "Refine this image caption to be strictly factual and grounded in any context text. \
         Remove any guesses. If unsure, say 'uncertain'.\n\
         Caption: {caption}\nContext: {context}"
    )
}

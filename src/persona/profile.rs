//! Persisted persona profile document.
//!
//! One JSON document per persona. Created at version 1 on first ingestion,
//! merged in place by updates (fields present in the update overwrite,
//! absent fields keep their stored value), removed only by erasure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::persona::prompts::LEAKED_ANALYSIS_MARKER;
use crate::persona::style::{
    Beliefs, BasicTraits, ConversationHabits, Culture, MediaTraits, Personality, RichTraits,
    StyleFeatures, TextStyle, TopicMap,
};

/// A prompt/response pair illustrating the persona's voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamplePair {
    pub prompt: String,
    pub response: String,
}

/// Stored style profile of one persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaProfile {
    pub persona_id: String,
    pub username: String,
    pub version: u32,
    #[serde(default)]
    pub style_prompt: String,
    #[serde(default)]
    pub traits: BasicTraits,
    #[serde(default)]
    pub text_style: TextStyle,
    #[serde(default)]
    pub personality: Personality,
    #[serde(default)]
    pub conversation: ConversationHabits,
    #[serde(default)]
    pub topics: TopicMap,
    #[serde(default)]
    pub beliefs: Beliefs,
    #[serde(default)]
    pub culture: Culture,
    #[serde(default)]
    pub media: MediaTraits,
    #[serde(default)]
    pub examples: Vec<ExamplePair>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PersonaProfile {
    /// Version-1 profile from freshly extracted features.
    pub fn new(
        persona_id: impl Into<String>,
        username: impl Into<String>,
        features: StyleFeatures,
        style_prompt: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let rich = features.rich;
        Self {
            persona_id: persona_id.into(),
            username: username.into(),
            version: 1,
            style_prompt: style_prompt.into(),
            traits: features.basic,
            text_style: rich.text_style,
            personality: rich.personality,
            conversation: rich.conversation,
            topics: rich.topics,
            beliefs: rich.beliefs,
            culture: rich.culture,
            media: MediaTraits::default(),
            examples: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge an update and bump the version.
    pub fn apply_update(&mut self, update: ProfileUpdate) {
        self.merge(update);
        self.version += 1;
    }

    /// Merge background enrichment results without bumping the version.
    pub fn enrich(&mut self, update: ProfileUpdate) {
        self.merge(update);
    }

    fn merge(&mut self, update: ProfileUpdate) {
        let ProfileUpdate {
            username,
            style_prompt,
            traits,
            text_style,
            personality,
            conversation,
            topics,
            beliefs,
            culture,
            media,
        } = update;
        if let Some(v) = username {
            self.username = v;
        }
        if let Some(v) = style_prompt {
            self.style_prompt = v;
        }
        if let Some(v) = traits {
            self.traits = v;
        }
        if let Some(v) = text_style {
            self.text_style = v;
        }
        if let Some(v) = personality {
            self.personality = v;
        }
        if let Some(v) = conversation {
            self.conversation = v;
        }
        if let Some(v) = topics {
            self.topics = v;
        }
        if let Some(v) = beliefs {
            self.beliefs = v;
        }
        if let Some(v) = culture {
            self.culture = v;
        }
        if let Some(v) = media {
            self.media = v;
        }
        self.updated_at = Utc::now();
    }

    /// Rich trait sections as one value, for prompt rendering.
    pub fn rich_traits(&self) -> RichTraits {
        RichTraits {
            text_style: self.text_style.clone(),
            personality: self.personality.clone(),
            conversation: self.conversation.clone(),
            topics: self.topics.clone(),
            beliefs: self.beliefs.clone(),
            culture: self.culture.clone(),
            media: self.media.clone(),
        }
    }

    /// The stored style prompt is unusable: empty, or the analysis prompt
    /// echoed back by a backend instead of a style guide.
    pub fn needs_style_repair(&self) -> bool {
        let style = self.style_prompt.trim();
        style.is_empty() || style.contains(LEAKED_ANALYSIS_MARKER)
    }
}

/// Partial profile; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub style_prompt: Option<String>,
    pub traits: Option<BasicTraits>,
    pub text_style: Option<TextStyle>,
    pub personality: Option<Personality>,
    pub conversation: Option<ConversationHabits>,
    pub topics: Option<TopicMap>,
    pub beliefs: Option<Beliefs>,
    pub culture: Option<Culture>,
    pub media: Option<MediaTraits>,
}

impl ProfileUpdate {
    /// Every trait section replaced by `features`.
    pub fn from_features(features: StyleFeatures) -> Self {
        let rich = features.rich;
        Self {
            traits: Some(features.basic),
            text_style: Some(rich.text_style),
            personality: Some(rich.personality),
            conversation: Some(rich.conversation),
            topics: Some(rich.topics),
            beliefs: Some(rich.beliefs),
            culture: Some(rich.culture),
            media: Some(rich.media),
            ..Default::default()
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_style_prompt(mut self, style_prompt: impl Into<String>) -> Self {
        self.style_prompt = Some(style_prompt.into());
        self
    }

    pub fn with_media(mut self, media: MediaTraits) -> Self {
        self.media = Some(media);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::style::StyleExtractor;

    fn profile() -> PersonaProfile {
        let features =
            StyleExtractor::default().extract(&["lol ok".to_string(), "brb".to_string()], &[]);
        PersonaProfile::new("42", "alice", features, "Style guide for @alice")
    }

    #[test]
    fn test_new_profile_is_version_one() {
        let p = profile();
        assert_eq!(p.version, 1);
        assert_eq!(p.persona_id, "42");
        assert_eq!(p.text_style.capitalization, "always lowercase");
        assert!(p.media.captions.is_empty());
    }

    #[test]
    fn test_update_merges_and_bumps_version() {
        let mut p = profile();
        let personality_before = p.personality.clone();
        p.apply_update(ProfileUpdate::default().with_style_prompt("new style"));
        assert_eq!(p.version, 2);
        assert_eq!(p.style_prompt, "new style");
        assert_eq!(p.username, "alice");
        assert_eq!(p.personality, personality_before);
    }

    #[test]
    fn test_enrich_keeps_version() {
        let mut p = profile();
        p.enrich(ProfileUpdate::default().with_media(MediaTraits {
            captions: vec!["a cat".into()],
            keywords: vec![],
        }));
        assert_eq!(p.version, 1);
        assert_eq!(p.media.captions, vec!["a cat".to_string()]);
    }

    #[test]
    fn test_needs_style_repair() {
        let mut p = profile();
        assert!(!p.needs_style_repair());
        p.style_prompt = "  ".into();
        assert!(p.needs_style_repair());
        p.style_prompt = "You are to analyze the writing style of user @alice".into();
        assert!(p.needs_style_repair());
    }

    #[test]
    fn test_json_roundtrip_tolerates_missing_sections() {
        let json = r#"{
            "persona_id": "7",
            "username": "bob",
            "version": 3,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-02T00:00:00Z"
        }"#;
        let p: PersonaProfile = serde_json::from_str(json).unwrap();
        assert_eq!(p.version, 3);
        assert_eq!(p.traits.tone, "neutral");
        assert!(p.topics.is_empty());
    }
}

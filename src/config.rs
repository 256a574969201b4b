//! Runtime configuration.
//!
//! Settings load in three layers: compiled defaults, an optional YAML file
//! named by `VOICEPRINT_CONFIG`, then individual environment variables.
//! Every field has a default so a bare environment is a working setup
//! against a local Ollama server.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::llms::base_llm::CompletionOptions;
use crate::persona::style::StyleThresholds;
use crate::utilities::paths::default_data_dir;

/// Backend endpoints, model names and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub llm_base_url: String,
    pub vision_base_url: String,
    pub text_model_name: String,
    pub embed_model_name: String,
    pub vision_model_name: String,
    /// Seconds before a generation request is abandoned.
    pub llm_timeout_secs: f64,
    /// Seconds before an embedding or image download is abandoned.
    pub embed_timeout_secs: f64,
    /// Parallel embedding requests per batch.
    pub embed_concurrency: usize,
    /// Optional system prompt prepended to every generation prompt.
    pub base_system_prompt: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            llm_base_url: "http://localhost:11434".to_string(),
            vision_base_url: "http://localhost:5000".to_string(),
            text_model_name: "local-llm".to_string(),
            embed_model_name: "local-embed".to_string(),
            vision_model_name: "local-vision".to_string(),
            llm_timeout_secs: 60.0,
            embed_timeout_secs: 30.0,
            embed_concurrency: 4,
            base_system_prompt: String::new(),
        }
    }
}

/// Controls for live "speak" requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub context_window: u32,
    /// Stream partial output instead of one blocking call.
    pub stream: bool,
    pub time_budget_secs: u64,
    /// Minimum milliseconds between two partial-output flushes.
    pub stream_edit_interval_ms: u64,
    /// Minimum buffered characters before a partial-output flush.
    pub stream_min_chunk_chars: usize,
    /// Turns kept per channel session.
    pub session_max_turns: usize,
    pub burst_send_delay_ms: u64,
    /// Similarity to the nearest snippet above which a reply is regenerated.
    pub regurgitation_threshold: f32,
    pub enable_mention_speak: bool,
}

impl Default for SpeakSettings {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.7,
            context_window: 1536,
            stream: true,
            time_budget_secs: 45,
            stream_edit_interval_ms: 400,
            stream_min_chunk_chars: 24,
            session_max_turns: 6,
            burst_send_delay_ms: 350,
            regurgitation_threshold: 0.92,
            enable_mention_speak: true,
        }
    }
}

impl SpeakSettings {
    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: None,
            context_window: Some(self.context_window),
            stop: None,
            model: None,
        }
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }
}

/// Retrieval and prompt-size controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Grounding snippets per prompt.
    pub k: usize,
    pub snippet_max_chars: usize,
    /// Character budget for style + conversation context in the speak prompt.
    pub style_max_chars: usize,
    /// Prefer the data-parallel index backend when available.
    pub use_accelerated_index: bool,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            k: 3,
            snippet_max_chars: 240,
            style_max_chars: 1000,
            use_accelerated_index: true,
        }
    }
}

/// Persona creation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub context_window: u32,
    pub model_name: Option<String>,
    /// Messages considered per style chunk.
    pub style_msgs: usize,
    /// Newest texts indexed on creation.
    pub index_snippets: usize,
    pub image_captions: usize,
    pub caption_concurrency: usize,
    pub include_images: bool,
    pub time_budget_secs: u64,
    pub hierarchical: bool,
    pub chunk_count: usize,
    pub chunk_max_tokens: u32,
    /// Estimated milliseconds to embed one snippet; caps index size under budget.
    pub embed_time_est_ms: u64,
}

impl Default for CreateSettings {
    fn default() -> Self {
        Self {
            max_tokens: 384,
            temperature: 0.5,
            top_p: 0.9,
            context_window: 1536,
            model_name: None,
            style_msgs: 50,
            index_snippets: 180,
            image_captions: 12,
            caption_concurrency: 4,
            include_images: false,
            time_budget_secs: 120,
            hierarchical: true,
            chunk_count: 3,
            chunk_max_tokens: 96,
            embed_time_est_ms: 60,
        }
    }
}

impl CreateSettings {
    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: Some(self.top_p),
            context_window: Some(self.context_window),
            stop: None,
            model: self.model_name.clone(),
        }
    }
}

/// Message summarization tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizeSettings {
    pub max_tokens: u32,
    pub msg_max_chars: usize,
    pub total_max_chars: usize,
    /// Caps the output at 128 tokens.
    pub fast: bool,
    pub include_images: bool,
    pub image_captions: usize,
    pub image_caption_max_chars: usize,
    pub top_p: f32,
    pub temperature: f32,
    pub context_window: u32,
    pub caption_concurrency: usize,
    pub hierarchical: bool,
    pub chunk_count: usize,
    pub chunk_max_tokens: u32,
    pub model_name: Option<String>,
    pub time_budget_secs: u64,
}

impl Default for SummarizeSettings {
    fn default() -> Self {
        Self {
            max_tokens: 192,
            msg_max_chars: 160,
            total_max_chars: 3000,
            fast: false,
            include_images: true,
            image_captions: 4,
            image_caption_max_chars: 100,
            top_p: 0.9,
            temperature: 0.2,
            context_window: 1024,
            caption_concurrency: 4,
            hierarchical: true,
            chunk_count: 3,
            chunk_max_tokens: 96,
            model_name: None,
            time_budget_secs: 120,
        }
    }
}

impl SummarizeSettings {
    /// Overall output cap, honoring fast mode.
    pub fn effective_max_tokens(&self) -> u32 {
        if self.fast {
            self.max_tokens.min(128)
        } else {
            self.max_tokens
        }
    }

    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            max_tokens: self.effective_max_tokens(),
            temperature: self.temperature,
            top_p: Some(self.top_p),
            context_window: Some(self.context_window),
            stop: None,
            model: self.model_name.clone(),
        }
    }
}

/// Image caption quality and cache controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionSettings {
    /// Run a second, text-only pass that strips guesses from captions.
    pub refine: bool,
    pub refine_max_tokens: u32,
    pub ttl_secs: i64,
}

impl Default for CaptionSettings {
    fn default() -> Self {
        Self {
            refine: true,
            refine_max_tokens: 60,
            ttl_secs: 86_400,
        }
    }
}

/// Generation concurrency limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencySettings {
    /// Simultaneous generation calls across all channels.
    pub global_limit: usize,
    /// Serialize generations within one channel.
    pub channel_exclusive: bool,
    /// Optional bound on how long a request waits for its slot.
    pub acquire_timeout_ms: Option<u64>,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            global_limit: 2,
            channel_exclusive: true,
            acquire_timeout_ms: None,
        }
    }
}

/// Where persisted state lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backend: BackendSettings,
    pub speak: SpeakSettings,
    pub retrieval: RetrievalSettings,
    pub create: CreateSettings,
    pub summarize: SummarizeSettings,
    pub captions: CaptionSettings,
    pub concurrency: ConcurrencySettings,
    pub storage: StorageSettings,
    pub style: StyleThresholds,
}

impl Settings {
    /// Load defaults, then the YAML file named by `VOICEPRINT_CONFIG`, then
    /// environment overrides.
    pub fn load() -> Self {
        let mut settings = match env::var("VOICEPRINT_CONFIG") {
            Ok(path) if !path.trim().is_empty() => match Self::from_yaml_file(Path::new(&path)) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!("Ignoring config file {}: {}", path, e);
                    Self::default()
                }
            },
            _ => Self::default(),
        };
        settings.apply_env();
        settings
    }

    /// Parse a YAML settings file; missing keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Malformed values are logged and skipped.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let b = &mut self.backend;
        set_string(&lookup, "LLM_BASE_URL", &mut b.llm_base_url);
        set_string(&lookup, "VISION_BASE_URL", &mut b.vision_base_url);
        set_string(&lookup, "TEXT_MODEL_NAME", &mut b.text_model_name);
        set_string(&lookup, "EMBED_MODEL_NAME", &mut b.embed_model_name);
        set_string(&lookup, "VISION_MODEL_NAME", &mut b.vision_model_name);
        set_parsed(&lookup, "LLM_TIMEOUT", &mut b.llm_timeout_secs);
        set_parsed(&lookup, "EMBED_TIMEOUT", &mut b.embed_timeout_secs);
        set_parsed(&lookup, "EMBED_CONCURRENCY", &mut b.embed_concurrency);
        set_string(&lookup, "BASE_SYSTEM_PROMPT", &mut b.base_system_prompt);

        let s = &mut self.speak;
        set_parsed(&lookup, "SPEAK_MAX_TOKENS", &mut s.max_tokens);
        set_parsed(&lookup, "SPEAK_TEMPERATURE", &mut s.temperature);
        set_parsed(&lookup, "SPEAK_NUM_CTX", &mut s.context_window);
        set_bool(&lookup, "SPEAK_STREAM", &mut s.stream);
        set_parsed(&lookup, "SPEAK_TIME_BUDGET_SECONDS", &mut s.time_budget_secs);
        set_parsed(&lookup, "STREAM_EDIT_INTERVAL_MS", &mut s.stream_edit_interval_ms);
        set_parsed(&lookup, "STREAM_MIN_CHUNK_CHARS", &mut s.stream_min_chunk_chars);
        set_parsed(&lookup, "SESSION_MAX_TURNS", &mut s.session_max_turns);
        set_parsed(&lookup, "BURST_SEND_DELAY_MS", &mut s.burst_send_delay_ms);
        set_parsed(&lookup, "SPEAK_REGURGITATION_THRESHOLD", &mut s.regurgitation_threshold);
        set_bool(&lookup, "ENABLE_MENTION_SPEAK", &mut s.enable_mention_speak);

        let r = &mut self.retrieval;
        set_parsed(&lookup, "RAG_K", &mut r.k);
        set_parsed(&lookup, "RAG_SNIPPET_MAX_CHARS", &mut r.snippet_max_chars);
        set_parsed(&lookup, "STYLE_MAX_CHARS", &mut r.style_max_chars);
        set_bool(&lookup, "USE_ACCELERATED_INDEX", &mut r.use_accelerated_index);

        let c = &mut self.create;
        set_parsed(&lookup, "CREATE_MAX_TOKENS", &mut c.max_tokens);
        set_parsed(&lookup, "CREATE_TEMPERATURE", &mut c.temperature);
        set_parsed(&lookup, "CREATE_TOP_P", &mut c.top_p);
        set_parsed(&lookup, "CREATE_NUM_CTX", &mut c.context_window);
        set_optional(&lookup, "CREATE_MODEL_NAME", &mut c.model_name);
        set_parsed(&lookup, "CREATE_STYLE_MSGS", &mut c.style_msgs);
        set_parsed(&lookup, "CREATE_INDEX_SNIPPETS", &mut c.index_snippets);
        set_parsed(&lookup, "CREATE_IMAGE_CAPTIONS", &mut c.image_captions);
        set_parsed(&lookup, "CREATE_CAPTION_CONCURRENCY", &mut c.caption_concurrency);
        set_bool(&lookup, "CREATE_INCLUDE_IMAGES", &mut c.include_images);
        set_parsed(&lookup, "CREATE_TIME_BUDGET_SECONDS", &mut c.time_budget_secs);
        set_bool(&lookup, "CREATE_HIERARCHICAL", &mut c.hierarchical);
        set_parsed(&lookup, "CREATE_CHUNK_COUNT", &mut c.chunk_count);
        set_parsed(&lookup, "CREATE_CHUNK_MAX_TOKENS", &mut c.chunk_max_tokens);
        set_parsed(&lookup, "CREATE_EMBED_TIME_EST_MS", &mut c.embed_time_est_ms);

        let m = &mut self.summarize;
        set_parsed(&lookup, "SUMMARIZE_MAX_TOKENS", &mut m.max_tokens);
        set_parsed(&lookup, "SUMMARIZE_MSG_MAX_CHARS", &mut m.msg_max_chars);
        set_parsed(&lookup, "SUMMARIZE_TOTAL_MAX_CHARS", &mut m.total_max_chars);
        set_bool(&lookup, "SUMMARIZE_FAST", &mut m.fast);
        set_bool(&lookup, "SUMMARIZE_INCLUDE_IMAGES", &mut m.include_images);
        set_parsed(&lookup, "SUMMARIZE_IMAGE_CAPTIONS", &mut m.image_captions);
        set_parsed(
            &lookup,
            "SUMMARIZE_IMAGE_CAPTION_MAX_CHARS",
            &mut m.image_caption_max_chars,
        );
        set_parsed(&lookup, "SUMMARIZE_TOP_P", &mut m.top_p);
        set_parsed(&lookup, "SUMMARIZE_TEMPERATURE", &mut m.temperature);
        set_parsed(&lookup, "SUMMARIZE_NUM_CTX", &mut m.context_window);
        set_parsed(&lookup, "SUMMARIZE_CAPTION_CONCURRENCY", &mut m.caption_concurrency);
        set_bool(&lookup, "SUMMARIZE_HIERARCHICAL", &mut m.hierarchical);
        set_parsed(&lookup, "SUMMARIZE_CHUNK_COUNT", &mut m.chunk_count);
        set_parsed(&lookup, "SUMMARIZE_CHUNK_MAX_TOKENS", &mut m.chunk_max_tokens);
        set_optional(&lookup, "SUMMARIZE_MODEL_NAME", &mut m.model_name);
        set_parsed(&lookup, "SUMMARIZE_TIME_BUDGET_SECONDS", &mut m.time_budget_secs);

        let cap = &mut self.captions;
        set_bool(&lookup, "CAPTION_REFINE", &mut cap.refine);
        set_parsed(&lookup, "CAPTION_REFINE_MAX_TOKENS", &mut cap.refine_max_tokens);
        set_parsed(&lookup, "CAPTION_TTL_SECONDS", &mut cap.ttl_secs);

        let cc = &mut self.concurrency;
        set_parsed(&lookup, "SPEAK_GLOBAL_CONCURRENCY", &mut cc.global_limit);
        set_bool(&lookup, "SPEAK_CHANNEL_EXCLUSIVE", &mut cc.channel_exclusive);
        if let Some(raw) = lookup("SPEAK_ACQUIRE_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(0) => cc.acquire_timeout_ms = None,
                Ok(ms) => cc.acquire_timeout_ms = Some(ms),
                Err(_) => log::warn!("Ignoring malformed SPEAK_ACQUIRE_TIMEOUT_MS={:?}", raw),
            }
        }

        if let Some(dir) = lookup("VOICEPRINT_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.storage.data_dir = PathBuf::from(dir);
            }
        }
    }
}

fn set_string<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, target: &mut String) {
    if let Some(value) = lookup(key) {
        *target = value.trim().to_string();
    }
}

fn set_optional<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    target: &mut Option<String>,
) {
    if let Some(value) = lookup(key) {
        let value = value.trim();
        *target = if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        };
    }
}

fn set_parsed<T, F>(lookup: &F, key: &str, target: &mut T)
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => log::warn!("Ignoring malformed {}={:?}", key, raw),
        }
    }
}

fn set_bool<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, target: &mut bool) {
    if let Some(raw) = lookup(key) {
        *target = raw.trim().eq_ignore_ascii_case("true");
    }
}

//! Backend contracts for generation, embedding and image captioning.
//!
//! The core never talks HTTP directly. It holds `Arc<dyn ...Backend>`
//! handles; [`OllamaClient`](super::providers::ollama::OllamaClient) is the
//! production implementation and tests substitute recording fakes.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ingest::ImageItem;
use crate::utilities::errors::BackendError;

/// Sampling and sizing options for one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Context window requested from the backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    /// Model override; the backend default is used when `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.7,
            top_p: None,
            context_window: None,
            stop: None,
            model: None,
        }
    }
}

impl CompletionOptions {
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }
}

/// Callback receiving each text fragment of a streaming completion.
pub type DeltaSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Text generation backend.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Blocking-style completion returning the full text.
    async fn complete(&self, prompt: &str, options: &CompletionOptions)
        -> Result<String, BackendError>;

    /// Streaming completion.
    ///
    /// Calls `on_delta` for every fragment and returns the concatenated text.
    /// Stops early once `time_budget` elapses; what arrived so far is the
    /// result. The default implementation makes one blocking call and
    /// reports it as a single fragment.
    async fn complete_stream(
        &self,
        prompt: &str,
        on_delta: DeltaSink<'_>,
        options: &CompletionOptions,
        time_budget: Duration,
    ) -> Result<String, BackendError> {
        let text = tokio::time::timeout(time_budget, self.complete(prompt, options))
            .await
            .map_err(|_| BackendError::unavailable("completion exceeded time budget"))??;
        on_delta(&text);
        Ok(text)
    }
}

/// Text embedding backend.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// One vector per input text, in input order, all of the same width.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError>;
}

/// Image captioning backend.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// A one-sentence factual caption for the image.
    async fn describe_image(&self, image: &ImageItem) -> Result<String, BackendError>;
}

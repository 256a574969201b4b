//! Ollama-compatible HTTP backend.
//!
//! Implements all three backend contracts against a local server:
//!
//! - `POST {llm_base}/api/generate` for completions (`stream: false`) and
//!   streaming completions (`stream: true`, newline-delimited JSON)
//! - `POST {llm_base}/api/embeddings`, one request per text with bounded
//!   concurrency
//! - `POST {vision_base}/api/generate` with a base64 image for captions,
//!   falling back to a legacy `POST {vision_base}/describe` adapter

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use bytes::BytesMut;
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::config::BackendSettings;
use crate::ingest::ImageItem;
use crate::llms::base_llm::{
    CompletionOptions, DeltaSink, EmbeddingBackend, GenerationBackend, VisionBackend,
};
use crate::persona::prompts::image_caption_prompt;
use crate::utilities::errors::BackendError;

/// Caption returned when every captioning path fails.
pub const GENERIC_CAPTION: &str = "[image: generic description]";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Connection settings for [`OllamaClient`].
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub vision_base_url: String,
    pub text_model: String,
    pub embed_model: String,
    pub vision_model: String,
    /// Timeout for generation requests.
    pub timeout: Duration,
    /// Timeout for embedding requests and image downloads.
    pub embed_timeout: Duration,
    pub embed_concurrency: usize,
    /// Retries after a transport error, 429 or 5xx on non-streaming calls.
    pub max_retries: u32,
    pub system_prompt: Option<String>,
}

impl From<&BackendSettings> for OllamaConfig {
    fn from(s: &BackendSettings) -> Self {
        Self {
            base_url: s.llm_base_url.trim_end_matches('/').to_string(),
            vision_base_url: s.vision_base_url.trim_end_matches('/').to_string(),
            text_model: s.text_model_name.clone(),
            embed_model: s.embed_model_name.clone(),
            vision_model: s.vision_model_name.clone(),
            timeout: Duration::from_secs_f64(s.llm_timeout_secs.max(1.0)),
            embed_timeout: Duration::from_secs_f64(s.embed_timeout_secs.max(1.0)),
            embed_concurrency: s.embed_concurrency.max(1),
            max_retries: 1,
            system_prompt: Some(s.base_system_prompt.trim().to_string())
                .filter(|p| !p.is_empty()),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self::from(&BackendSettings::default())
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
}

impl From<&CompletionOptions> for GenerateOptions {
    fn from(o: &CompletionOptions) -> Self {
        Self {
            num_predict: o.max_tokens,
            temperature: o.temperature,
            top_p: o.top_p,
            num_ctx: o.context_window,
        }
    }
}

/// Generated text from a response object (`response`, `text` or `output`).
pub fn extract_text(body: &Value) -> Option<&str> {
    ["response", "text", "output"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

/// Embedding vector from `{"embedding": [...]}` or `{"data": [{"embedding": [...]}]}`.
pub fn extract_embedding(body: &Value) -> Result<Vec<f32>, BackendError> {
    let raw = body
        .get("embedding")
        .or_else(|| body.pointer("/data/0/embedding"))
        .and_then(Value::as_array)
        .ok_or_else(|| BackendError::invalid("no embedding in response"))?;
    let vec: Vec<f32> = raw
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Option<_>>()
        .ok_or_else(|| BackendError::invalid("non-numeric embedding component"))?;
    if vec.is_empty() {
        return Err(BackendError::invalid("empty embedding vector"));
    }
    Ok(vec)
}

/// Splits a byte stream into complete newline-terminated lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: BytesMut,
}

impl LineDecoder {
    /// Append bytes and return every line now complete (without the newline).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(pos + 1);
            let text = String::from_utf8_lossy(&line[..pos]).trim().to_string();
            if !text.is_empty() {
                lines.push(text);
            }
        }
        lines
    }

    /// Whatever remains after the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.buf).trim().to_string();
        self.buf.clear();
        Some(rest).filter(|r| !r.is_empty())
    }
}

/// One parsed stream line: `Some(fragment)`, or `None` once `done` is set.
fn stream_fragment(line: &str) -> Option<Option<String>> {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return Some(None),
    };
    if value.get("done").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    Some(extract_text(&value).map(str::to_string))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for an Ollama-compatible server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    config: OllamaConfig,
    http: reqwest::Client,
    embed_http: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        let embed_http = reqwest::Client::builder()
            .timeout(config.embed_timeout)
            .build()?;
        Ok(Self {
            config,
            http,
            embed_http,
        })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn request<'a>(
        &'a self,
        prompt: &'a str,
        options: &'a CompletionOptions,
        stream: bool,
    ) -> GenerateRequest<'a> {
        GenerateRequest {
            model: options.model.as_deref().unwrap_or(&self.config.text_model),
            prompt,
            stream,
            system: self.config.system_prompt.as_deref(),
            stop: options.stop.as_deref(),
            images: None,
            options: GenerateOptions::from(options),
        }
    }

    /// POST a JSON body, retrying transport errors, 429 and 5xx with backoff.
    async fn post_json<T: Serialize + ?Sized>(
        &self,
        client: &reqwest::Client,
        url: &str,
        body: &T,
    ) -> Result<Value, BackendError> {
        let mut last_error = BackendError::unavailable("request not attempted");
        let mut retry_delay = Duration::from_millis(500);

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                log::warn!("Retrying {} (attempt {}) after {:?}", url, attempt, retry_delay);
                tokio::time::sleep(retry_delay).await;
                retry_delay *= 2;
            }

            let response = match client.post(url).json(body).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.into();
                    continue;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                last_error = BackendError::unavailable(format!("{} returned {}", url, status));
                continue;
            }
            if status.is_client_error() {
                let body = response.text().await.unwrap_or_default();
                return Err(BackendError::unavailable(format!(
                    "{} returned {}: {}",
                    url,
                    status,
                    crate::utilities::string_utils::truncate_chars(&body, 300)
                )));
            }
            return response
                .json::<Value>()
                .await
                .map_err(|e| BackendError::invalid(e.to_string()));
        }
        Err(last_error)
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let url = format!("{}/api/embeddings", self.config.base_url);
        let body = serde_json::json!({
            "model": self.config.embed_model,
            "prompt": text,
        });
        let response = self.post_json(&self.embed_http, &url, &body).await?;
        extract_embedding(&response)
    }

    async fn caption_via_generate(&self, image: &ImageItem) -> Result<String, BackendError> {
        let bytes = self
            .embed_http
            .get(&image.url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let prompt = image_caption_prompt(image.hint.as_deref(), image.filename.as_deref());
        let options = CompletionOptions::default();
        let request = GenerateRequest {
            model: &self.config.vision_model,
            prompt: &prompt,
            stream: false,
            system: None,
            stop: None,
            images: Some(vec![encoded]),
            options: GenerateOptions::from(&options),
        };
        let url = format!("{}/api/generate", self.config.vision_base_url);
        let response = self.post_json(&self.http, &url, &request).await?;
        extract_text(&response)
            .map(|t| t.trim().to_string())
            .ok_or_else(|| BackendError::invalid("empty caption"))
    }

    async fn caption_via_describe(&self, image: &ImageItem) -> Result<String, BackendError> {
        let url = format!("{}/describe", self.config.vision_base_url);
        let body = serde_json::json!({
            "image_url": image.url,
            "model": self.config.vision_model,
            "hint": image.hint,
            "filename": image.filename,
        });
        let response = self.post_json(&self.embed_http, &url, &body).await?;
        ["caption", "description", "text"]
            .iter()
            .find_map(|key| response.get(*key).and_then(Value::as_str))
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| BackendError::invalid("empty caption"))
    }
}

#[async_trait]
impl GenerationBackend for OllamaClient {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, BackendError> {
        let url = format!("{}/api/generate", self.config.base_url);
        let request = self.request(prompt, options, false);
        log::debug!(
            "generate: model={}, prompt={} chars, max_tokens={}",
            request.model,
            prompt.len(),
            options.max_tokens
        );
        let response = self.post_json(&self.http, &url, &request).await?;
        Ok(extract_text(&response).unwrap_or_default().to_string())
    }

    async fn complete_stream(
        &self,
        prompt: &str,
        on_delta: DeltaSink<'_>,
        options: &CompletionOptions,
        time_budget: Duration,
    ) -> Result<String, BackendError> {
        let url = format!("{}/api/generate", self.config.base_url);
        let request = self.request(prompt, options, true);
        let deadline = Instant::now() + time_budget;

        let response = tokio::time::timeout_at(deadline, self.http.post(&url).json(&request).send())
            .await
            .map_err(|_| BackendError::unavailable("stream did not start within time budget"))??
            .error_for_status()?;

        let mut body = Box::pin(response.bytes_stream().map_err(BackendError::from));
        let mut decoder = LineDecoder::default();
        let mut acc = String::new();

        'read: loop {
            let chunk = match tokio::time::timeout_at(deadline, body.next()).await {
                Err(_) => {
                    log::debug!("stream time budget elapsed after {} chars", acc.len());
                    break;
                }
                Ok(None) => break,
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => {
                    if acc.is_empty() {
                        return Err(e);
                    }
                    log::warn!("stream interrupted, keeping partial text: {}", e);
                    break;
                }
            };
            for line in decoder.push(&chunk) {
                match stream_fragment(&line) {
                    None => break 'read,
                    Some(Some(fragment)) => {
                        acc.push_str(&fragment);
                        on_delta(&fragment);
                    }
                    Some(None) => {}
                }
            }
        }
        if let Some(Some(fragment)) = decoder.finish().as_deref().and_then(stream_fragment) {
            acc.push_str(&fragment);
            on_delta(&fragment);
        }
        Ok(acc)
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        let requests: Vec<_> = texts.iter().map(|t| self.embed_one(t)).collect();
        futures::stream::iter(requests)
            .buffered(self.config.embed_concurrency.max(1))
            .try_collect()
            .await
    }
}

#[async_trait]
impl VisionBackend for OllamaClient {
    async fn describe_image(&self, image: &ImageItem) -> Result<String, BackendError> {
        match self.caption_via_generate(image).await {
            Ok(caption) => return Ok(caption),
            Err(e) => log::info!("vision generate failed for {}: {}", image.url, e),
        }
        match self.caption_via_describe(image).await {
            Ok(caption) => Ok(caption),
            Err(e) => {
                log::info!("legacy describe failed for {}: {}", image.url, e);
                Ok(GENERIC_CAPTION.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text_field_order() {
        let v = serde_json::json!({"text": "b", "output": "c"});
        assert_eq!(extract_text(&v), Some("b"));
        let v = serde_json::json!({"response": "", "output": "c"});
        assert_eq!(extract_text(&v), None);
        let v = serde_json::json!({"response": "a"});
        assert_eq!(extract_text(&v), Some("a"));
    }

    #[test]
    fn test_extract_embedding_shapes() {
        let v = serde_json::json!({"embedding": [0.5, 1.0]});
        assert_eq!(extract_embedding(&v).unwrap(), vec![0.5, 1.0]);
        let v = serde_json::json!({"data": [{"embedding": [2.0]}]});
        assert_eq!(extract_embedding(&v).unwrap(), vec![2.0]);
        let v = serde_json::json!({"embedding": []});
        assert!(extract_embedding(&v).is_err());
        let v = serde_json::json!({"nothing": true});
        assert!(extract_embedding(&v).is_err());
    }

    #[test]
    fn test_line_decoder_splits_across_chunks() {
        let mut d = LineDecoder::default();
        assert!(d.push(b"{\"response\":\"he").is_empty());
        let lines = d.push(b"llo\"}\n{\"response\":\" there\"}\n{\"do");
        assert_eq!(lines, vec![r#"{"response":"hello"}"#, r#"{"response":" there"}"#]);
        assert_eq!(d.finish().as_deref(), Some("{\"do"));
    }

    #[test]
    fn test_stream_fragment() {
        assert_eq!(
            stream_fragment(r#"{"response":"hi","done":false}"#),
            Some(Some("hi".to_string()))
        );
        assert_eq!(stream_fragment(r#"{"done":true}"#), None);
        assert_eq!(stream_fragment("not json"), Some(None));
    }

    #[test]
    fn test_request_serialization() {
        let client = OllamaClient::new(OllamaConfig::default()).unwrap();
        let options = CompletionOptions {
            max_tokens: 64,
            temperature: 0.5,
            top_p: None,
            context_window: Some(1024),
            stop: Some(vec!["\n\n".into()]),
            model: Some("custom".into()),
        };
        let json = serde_json::to_value(client.request("hi", &options, true)).unwrap();
        assert_eq!(json["model"], "custom");
        assert_eq!(json["stream"], true);
        assert_eq!(json["options"]["num_predict"], 64);
        assert_eq!(json["options"]["num_ctx"], 1024);
        assert!(json["options"].get("top_p").is_none());
        assert_eq!(json["stop"][0], "\n\n");
        assert!(json.get("images").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_unavailable() {
        let config = OllamaConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            max_retries: 0,
            ..OllamaConfig::default()
        };
        let client = OllamaClient::new(config).unwrap();
        let err = client
            .complete("hi", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unavailable { .. }));
    }

    /// Serves two NDJSON fragments over a chunked response, then stalls
    /// without closing the connection.
    async fn stalling_server() -> std::net::SocketAddr {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\nTransfer-Encoding: chunked\r\n\r\n",
                )
                .await
                .unwrap();
            for line in [
                r#"{"response":"hel","done":false}"#,
                r#"{"response":"lo","done":false}"#,
            ] {
                let data = format!("{}\n", line);
                let frame = format!("{:x}\r\n{}\r\n", data.len(), data);
                socket.write_all(frame.as_bytes()).await.unwrap();
            }
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        addr
    }

    #[tokio::test]
    async fn test_stream_returns_partial_text_when_budget_elapses() {
        let addr = stalling_server().await;
        let config = OllamaConfig {
            base_url: format!("http://{}", addr),
            ..OllamaConfig::default()
        };
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        let client = OllamaClient {
            config,
            http: http.clone(),
            embed_http: http,
        };

        let mut fragments = Vec::new();
        let mut on_delta = |f: &str| fragments.push(f.to_string());
        let started = std::time::Instant::now();
        let text = client
            .complete_stream(
                "hi",
                &mut on_delta,
                &CompletionOptions::default(),
                Duration::from_millis(300),
            )
            .await
            .unwrap();

        assert_eq!(text, "hello");
        assert_eq!(fragments, vec!["hel", "lo"]);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

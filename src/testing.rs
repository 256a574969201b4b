//! Recording fakes for the backend, delivery and progress seams.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::ingest::ImageItem;
use crate::llms::base_llm::{CompletionOptions, DeltaSink, GenerationBackend, VisionBackend};
use crate::pipeline::delivery::{Delivery, DisplayIdentity, MessageHandle};
use crate::utilities::errors::{BackendError, DeliveryError};
use crate::utilities::progress::ProgressSink;

type Reply = Box<dyn Fn(&str, usize) -> Result<String, BackendError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedCall {
    pub prompt: String,
    pub max_tokens: u32,
    pub streamed: bool,
}

/// Generation backend answering from a closure of `(prompt, call_index)`.
///
/// Streaming calls emit the reply word by word.
pub(crate) struct ScriptedGenerator {
    reply: Reply,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new<F>(reply: F) -> Self
    where
        F: Fn(&str, usize) -> Result<String, BackendError> + Send + Sync + 'static,
    {
        Self {
            reply: Box::new(reply),
            delay: None,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn fixed(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| Ok(text.clone()))
    }

    pub fn failing() -> Self {
        Self::new(|_, _| Err(BackendError::unavailable("backend down")))
    }

    /// Answers each call with the next entry of `replies`.
    pub fn sequence(replies: Vec<Result<String, BackendError>>) -> Self {
        let replies = Mutex::new(replies.into_iter());
        Self::new(move |_, _| {
            replies
                .lock()
                .next()
                .unwrap_or_else(|| Err(BackendError::unavailable("script exhausted")))
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.prompt).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn answer(&self, prompt: &str, options: &CompletionOptions, streamed: bool) -> Result<String, BackendError> {
        let index = {
            let mut calls = self.calls.lock();
            calls.push(RecordedCall {
                prompt: prompt.to_string(),
                max_tokens: options.max_tokens,
                streamed,
            });
            calls.len() - 1
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.reply)(prompt, index)
    }
}

#[async_trait]
impl GenerationBackend for ScriptedGenerator {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String, BackendError> {
        self.answer(prompt, options, false).await
    }

    async fn complete_stream(
        &self,
        prompt: &str,
        on_delta: DeltaSink<'_>,
        options: &CompletionOptions,
        _time_budget: Duration,
    ) -> Result<String, BackendError> {
        let text = self.answer(prompt, options, true).await?;
        for fragment in text.split_inclusive(' ') {
            on_delta(fragment);
        }
        Ok(text)
    }
}

/// Vision backend returning `caption of <url>`, or failing for URLs
/// containing `broken`.
#[derive(Default)]
pub(crate) struct FakeVision {
    pub calls: AtomicUsize,
}

#[async_trait]
impl VisionBackend for FakeVision {
    async fn describe_image(&self, image: &ImageItem) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if image.url.contains("broken") {
            return Err(BackendError::unavailable("vision down"));
        }
        Ok(format!("caption of {}", image.url))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DeliveryOp {
    Send { text: String, with_identity: bool },
    Edit { id: String, text: String },
}

/// Delivery that records operations and keeps each message's latest text.
#[derive(Default)]
pub(crate) struct RecordingDelivery {
    reject_identity: bool,
    broken: bool,
    messages: Mutex<Vec<String>>,
    ops: Mutex<Vec<DeliveryOp>>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting_identity() -> Self {
        Self {
            reject_identity: true,
            ..Self::default()
        }
    }

    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn ops(&self) -> Vec<DeliveryOp> {
        self.ops.lock().clone()
    }

    pub fn edit_count(&self) -> usize {
        self.ops()
            .iter()
            .filter(|op| matches!(op, DeliveryOp::Edit { .. }))
            .count()
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn send(
        &self,
        channel: &str,
        text: &str,
        identity: Option<&DisplayIdentity>,
    ) -> Result<MessageHandle, DeliveryError> {
        if self.broken || (self.reject_identity && identity.is_some()) {
            return Err(DeliveryError::new("rejected"));
        }
        self.ops.lock().push(DeliveryOp::Send {
            text: text.to_string(),
            with_identity: identity.is_some(),
        });
        let mut messages = self.messages.lock();
        messages.push(text.to_string());
        Ok(MessageHandle {
            channel: channel.to_string(),
            id: (messages.len() - 1).to_string(),
        })
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), DeliveryError> {
        if self.broken {
            return Err(DeliveryError::new("rejected"));
        }
        self.ops.lock().push(DeliveryOp::Edit {
            id: handle.id.clone(),
            text: text.to_string(),
        });
        let idx: usize = handle.id.parse().map_err(|_| DeliveryError::new("bad id"))?;
        if let Some(slot) = self.messages.lock().get_mut(idx) {
            *slot = text.to_string();
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingProgress {
    messages: Mutex<Vec<String>>,
}

impl RecordingProgress {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl ProgressSink for RecordingProgress {
    async fn report(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}

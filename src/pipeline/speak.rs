//! End-to-end "speak": retrieval, prompt, guarded generation, coalesced
//! streaming output, anti-regurgitation and delivery.
//!
//! A request walks these states:
//!
//! ```text
//! Idle → PromptBuilt → GuardAcquired → Generating → (ChunkReceived* → Done)
//!      → AntiRegurgitationCheck → (PassthroughDone | RetryGenerating) → Delivered
//! ```
//!
//! Retrieval runs before the guard is taken; the guard is held through
//! generation, the optional retry and final delivery. End users never see a
//! backend error: a failed generation gets one blocking retry, then
//! [`PLACEHOLDER_REPLY`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::concurrency::ConcurrencyGuard;
use crate::config::{RetrievalSettings, SpeakSettings};
use crate::llms::base_llm::GenerationBackend;
use crate::llms::streaming::StreamCoalescer;
use crate::persona::profile::PersonaProfile;
use crate::persona::prompts::{rich_traits_to_style, speak_prompt, style_from_traits, with_paraphrase_instruction};
use crate::persona::style::StyleThresholds;
use crate::pipeline::delivery::{postprocess_by_traits, send_as_persona, Delivery, DisplayIdentity, PostedMessage};
use crate::pipeline::session::{Role, SessionRegistry};
use crate::rag::retriever::Retriever;
use crate::utilities::errors::GuardError;
use crate::utilities::string_utils::{char_len, truncate_chars};

/// Delivered when generation failed twice.
pub const PLACEHOLDER_REPLY: &str = "[could not generate a response]";

/// Content of the message posted before the first streamed fragment.
pub const STREAM_PLACEHOLDER: &str = "…";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakState {
    Idle,
    PromptBuilt,
    GuardAcquired,
    Generating,
    ChunkReceived,
    Done,
    AntiRegurgitationCheck,
    PassthroughDone,
    RetryGenerating,
    Delivered,
}

/// How the delivered text was obtained when the first attempt failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    #[default]
    None,
    BlockingRetry,
    Placeholder,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeakOutcome {
    /// The final delivered text.
    pub text: String,
    /// Message parts as sent (mention mode may split into bursts).
    pub parts: Vec<String>,
    /// The first draft was replaced by the paraphrased retry.
    pub regenerated: bool,
    /// Similarity of the first draft to the nearest corpus entry.
    pub similarity: f32,
    pub fallback: Fallback,
    /// Coalesced in-place updates shown while streaming.
    pub partial_updates: usize,
    pub snippets: usize,
    /// At least one delivery path accepted every part.
    pub delivered: bool,
    pub states: Vec<SpeakState>,
}

/// One speak request.
#[derive(Debug, Clone, Copy)]
pub struct SpeakRequest<'a> {
    pub channel: &'a str,
    pub query: &'a str,
    pub stream: bool,
}

#[derive(Debug, Default)]
struct Trace {
    states: Vec<SpeakState>,
}

impl Trace {
    fn new() -> Self {
        Self {
            states: vec![SpeakState::Idle],
        }
    }

    fn enter(&mut self, state: SpeakState) {
        log::trace!("speak -> {:?}", state);
        if state == SpeakState::ChunkReceived && self.states.last() == Some(&state) {
            return;
        }
        self.states.push(state);
    }
}

struct Draft {
    text: String,
    fallback: Fallback,
    posted: Option<PostedMessage>,
    shown: Option<String>,
    partial_updates: usize,
}

pub struct SpeakPipeline {
    backend: Arc<dyn GenerationBackend>,
    guard: Arc<ConcurrencyGuard>,
    sessions: SessionRegistry,
    speak: SpeakSettings,
    retrieval: RetrievalSettings,
    thresholds: StyleThresholds,
}

impl SpeakPipeline {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        guard: Arc<ConcurrencyGuard>,
        speak: SpeakSettings,
        retrieval: RetrievalSettings,
        thresholds: StyleThresholds,
    ) -> Self {
        Self {
            backend,
            guard,
            sessions: SessionRegistry::new(speak.session_max_turns),
            speak,
            retrieval,
            thresholds,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn settings(&self) -> &SpeakSettings {
        &self.speak
    }

    /// Style guidance for `profile`: the stored style prompt (or one rebuilt
    /// from basic traits when unusable) plus the rich-trait guide, capped at
    /// the style budget.
    pub fn style_block(&self, profile: &PersonaProfile) -> String {
        let style = if profile.needs_style_repair() {
            log::info!("Repairing style prompt of persona {}", profile.persona_id);
            style_from_traits(&profile.username, &profile.traits, &self.thresholds)
        } else {
            profile.style_prompt.trim().to_string()
        };
        let rich = rich_traits_to_style(&profile.username, &profile.rich_traits());
        let combined = if rich.trim().is_empty() {
            style
        } else {
            format!("{}\n\n{}", style, rich).trim().to_string()
        };
        truncate_chars(&combined, self.retrieval.style_max_chars).to_string()
    }

    /// Conversation transcript block; the oldest lines are dropped first to
    /// stay within the style budget.
    pub fn context_block(&self, lines: &[String]) -> String {
        let budget = self.retrieval.style_max_chars;
        let mut used = 0;
        let mut kept = Vec::new();
        for line in lines.iter().rev() {
            let cost = char_len(line) + 1;
            if used + cost > budget {
                break;
            }
            used += cost;
            kept.push(line.as_str());
        }
        if kept.is_empty() {
            return String::new();
        }
        kept.reverse();
        format!("\n\n[Conversation so far]\n{}", kept.join("\n"))
    }

    pub fn build_prompt(
        &self,
        profile: &PersonaProfile,
        query: &str,
        snippets: &[String],
        context_lines: &[String],
    ) -> String {
        let style = self.style_block(profile) + &self.context_block(context_lines);
        speak_prompt(&profile.username, &style, query, snippets)
    }

    async fn retrieve(&self, retriever: Option<&Retriever>, query: &str) -> Vec<String> {
        let Some(retriever) = retriever.filter(|r| r.is_ready()) else {
            return Vec::new();
        };
        match retriever.query(query, self.retrieval.k.max(1)).await {
            Ok(hits) => hits
                .into_iter()
                .map(|h| truncate_chars(&h.text, self.retrieval.snippet_max_chars).to_string())
                .collect(),
            Err(e) => {
                log::warn!("Retrieval failed, continuing without snippets: {}", e);
                Vec::new()
            }
        }
    }

    /// Speak once for `request`, delivering through `delivery`.
    ///
    /// Fails only when no generation slot could be obtained.
    pub async fn speak(
        &self,
        profile: &PersonaProfile,
        retriever: Option<&Retriever>,
        request: SpeakRequest<'_>,
        delivery: &dyn Delivery,
        identity: &DisplayIdentity,
    ) -> Result<SpeakOutcome, GuardError> {
        let mut trace = Trace::new();
        let snippets = self.retrieve(retriever, request.query).await;
        let prompt = self.build_prompt(profile, request.query, &snippets, &[]);
        trace.enter(SpeakState::PromptBuilt);

        let permit = self.guard.acquire(Some(request.channel)).await?;
        trace.enter(SpeakState::GuardAcquired);

        let draft = if request.stream {
            self.stream_draft(&prompt, request.channel, delivery, identity, &profile.username, &mut trace)
                .await
        } else {
            self.blocking_draft(&prompt, &mut trace).await
        };
        let (text, regenerated, similarity) = self
            .check_regurgitation(&prompt, draft.text.clone(), draft.fallback, retriever, &mut trace)
            .await;

        let delivered = match &draft.posted {
            Some(message) if draft.shown.as_deref() == Some(text.as_str()) => {
                log::trace!("Final text already shown in message {}", message.handle.id);
                true
            }
            Some(message) => message.edit(delivery, &text).await,
            None => send_as_persona(delivery, request.channel, &text, identity, &profile.username)
                .await
                .is_some(),
        };
        trace.enter(SpeakState::Delivered);
        drop(permit);

        Ok(SpeakOutcome {
            parts: vec![text.clone()],
            text,
            regenerated,
            similarity,
            fallback: draft.fallback,
            partial_updates: draft.partial_updates,
            snippets: snippets.len(),
            delivered,
            states: trace.states,
        })
    }

    /// Session-aware conversational reply.
    ///
    /// Records the user turn and the reply in the channel session and sends
    /// the reply as trait-shaped bursts once the generation slot is released.
    pub async fn mention(
        &self,
        profile: &PersonaProfile,
        retriever: Option<&Retriever>,
        channel: &str,
        message: &str,
        delivery: &dyn Delivery,
        identity: &DisplayIdentity,
    ) -> Result<SpeakOutcome, GuardError> {
        let mut trace = Trace::new();
        self.sessions.record(channel, Role::User, message);
        let snippets = self.retrieve(retriever, message).await;
        let context = self.sessions.context_lines(channel, &profile.username);
        let prompt = self.build_prompt(profile, message, &snippets, &context);
        trace.enter(SpeakState::PromptBuilt);

        let permit = self.guard.acquire(Some(channel)).await?;
        trace.enter(SpeakState::GuardAcquired);
        let draft = self.blocking_draft(&prompt, &mut trace).await;
        let (text, regenerated, similarity) = self
            .check_regurgitation(&prompt, draft.text, draft.fallback, retriever, &mut trace)
            .await;
        drop(permit);

        if draft.fallback != Fallback::Placeholder {
            self.sessions.record(channel, Role::Assistant, &text);
        }

        let parts = postprocess_by_traits(&text, &profile.text_style, &profile.conversation);
        let delay = Duration::from_millis(self.speak.burst_send_delay_ms);
        let mut delivered = !parts.is_empty();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(delay).await;
            }
            delivered &= send_as_persona(delivery, channel, part, identity, &profile.username)
                .await
                .is_some();
        }
        trace.enter(SpeakState::Delivered);

        Ok(SpeakOutcome {
            text,
            parts,
            regenerated,
            similarity,
            fallback: draft.fallback,
            partial_updates: 0,
            snippets: snippets.len(),
            delivered,
            states: trace.states,
        })
    }

    /// One blocking completion within the time budget; `None` on failure or
    /// empty output.
    async fn complete_once(&self, prompt: &str) -> Option<String> {
        let options = self.speak.completion_options();
        match tokio::time::timeout(self.speak.time_budget(), self.backend.complete(prompt, &options)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(Ok(_)) => {
                log::warn!("Backend returned an empty completion");
                None
            }
            Ok(Err(e)) => {
                log::warn!("Completion failed: {}", e);
                None
            }
            Err(_) => {
                log::warn!("Completion exceeded {:?}", self.speak.time_budget());
                None
            }
        }
    }

    async fn blocking_fallback(&self, prompt: &str) -> (String, Fallback) {
        match self.complete_once(prompt).await {
            Some(text) => (text, Fallback::BlockingRetry),
            None => {
                log::error!("Generation failed after retry, sending placeholder");
                (PLACEHOLDER_REPLY.to_string(), Fallback::Placeholder)
            }
        }
    }

    async fn blocking_draft(&self, prompt: &str, trace: &mut Trace) -> Draft {
        trace.enter(SpeakState::Generating);
        let (text, fallback) = match self.complete_once(prompt).await {
            Some(text) => (text, Fallback::None),
            None => self.blocking_fallback(prompt).await,
        };
        trace.enter(SpeakState::Done);
        Draft {
            text,
            fallback,
            posted: None,
            shown: None,
            partial_updates: 0,
        }
    }

    async fn stream_draft(
        &self,
        prompt: &str,
        channel: &str,
        delivery: &dyn Delivery,
        identity: &DisplayIdentity,
        username: &str,
        trace: &mut Trace,
    ) -> Draft {
        let posted = send_as_persona(delivery, channel, STREAM_PLACEHOLDER, identity, username).await;
        trace.enter(SpeakState::Generating);

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let options = self.speak.completion_options();
        let budget = self.speak.time_budget();
        let min_interval = Duration::from_millis(self.speak.stream_edit_interval_ms);
        let min_chars = self.speak.stream_min_chunk_chars;
        let backend = Arc::clone(&self.backend);

        let generate = async move {
            let mut coalescer = StreamCoalescer::new(min_interval, min_chars);
            let result = {
                let mut on_delta = |fragment: &str| {
                    if let Some(text) = coalescer.push(fragment) {
                        let _ = tx.send(text);
                    }
                };
                backend.complete_stream(prompt, &mut on_delta, &options, budget).await
            };
            if result.is_ok() {
                if let Some(tail) = coalescer.take_pending() {
                    let _ = tx.send(tail);
                }
            }
            result
        };

        let posted_ref = posted.as_ref();
        let edits = async {
            let mut updates = 0;
            let mut shown = None;
            while let Some(text) = rx.recv().await {
                if let Some(message) = posted_ref {
                    message.edit(delivery, &text).await;
                }
                updates += 1;
                shown = Some(text);
            }
            (updates, shown)
        };

        let (result, (partial_updates, shown)) = tokio::join!(generate, edits);
        if partial_updates > 0 {
            trace.enter(SpeakState::ChunkReceived);
        }

        let (text, fallback) = match result {
            Ok(text) if !text.trim().is_empty() => (text.trim().to_string(), Fallback::None),
            Ok(_) => {
                log::warn!("Stream produced no text, retrying blocking");
                self.blocking_fallback(prompt).await
            }
            Err(e) => {
                log::warn!("Stream failed, retrying blocking: {}", e);
                self.blocking_fallback(prompt).await
            }
        };
        trace.enter(SpeakState::Done);

        Draft {
            text,
            fallback,
            posted,
            shown: shown.map(|s| s.trim().to_string()),
            partial_updates,
        }
    }

    /// Replace a draft that is too close to the corpus with one paraphrased
    /// retry. The retry is accepted unconditionally; if it fails the first
    /// draft stands.
    async fn check_regurgitation(
        &self,
        prompt: &str,
        draft: String,
        fallback: Fallback,
        retriever: Option<&Retriever>,
        trace: &mut Trace,
    ) -> (String, bool, f32) {
        trace.enter(SpeakState::AntiRegurgitationCheck);
        let retriever = match retriever {
            Some(r) if fallback != Fallback::Placeholder && r.is_ready() => r,
            _ => {
                trace.enter(SpeakState::PassthroughDone);
                return (draft, false, 0.0);
            }
        };

        let similarity = retriever.similarity_to_nearest(&draft).await;
        if similarity <= self.speak.regurgitation_threshold {
            trace.enter(SpeakState::PassthroughDone);
            return (draft, false, similarity);
        }

        trace.enter(SpeakState::RetryGenerating);
        log::info!(
            "Draft similarity {:.3} above {:.2}, regenerating with paraphrase instruction",
            similarity,
            self.speak.regurgitation_threshold
        );
        match self.complete_once(&with_paraphrase_instruction(prompt)).await {
            Some(text) => (text, true, similarity),
            None => {
                log::warn!("Paraphrase retry failed, keeping first draft");
                (draft, false, similarity)
            }
        }
    }
}

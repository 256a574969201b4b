//! The persona service: one object wiring stores, retrievers, the ingestion
//! flows and the speak pipeline behind the user-facing operations.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::concurrency::ConcurrencyGuard;
use crate::config::Settings;
use crate::ingest::enrichment::{Captioner, CreateReport, Ingestor, SummaryReport, UpdateReport};
use crate::ingest::{Corpus, ImageItem};
use crate::llms::base_llm::{EmbeddingBackend, GenerationBackend, VisionBackend};
use crate::llms::streaming::StreamEvent;
use crate::persona::profile::PersonaProfile;
use crate::pipeline::delivery::{ChannelDelivery, Delivery, DisplayIdentity};
use crate::pipeline::speak::{SpeakOutcome, SpeakPipeline, SpeakRequest};
use crate::rag::retriever::RetrieverRegistry;
use crate::storage::{BindingStore, CaptionCache, PersonaStore};
use crate::utilities::errors::{Error, SpeakError};
use crate::utilities::progress::ProgressSink;

/// Immediate answer to a create request.
#[derive(Debug, Clone, Serialize)]
pub struct CreateAck {
    pub persona_id: String,
    pub username: String,
    pub version: u32,
    pub texts: usize,
    pub images: usize,
    pub message: String,
}

pub struct PersonaService {
    settings: Arc<Settings>,
    personas: PersonaStore,
    bindings: BindingStore,
    retrievers: Arc<RetrieverRegistry>,
    ingestor: Arc<Ingestor>,
    pipeline: SpeakPipeline,
    guard: Arc<ConcurrencyGuard>,
}

impl PersonaService {
    pub fn new(
        settings: Settings,
        backend: Arc<dyn GenerationBackend>,
        embedder: Arc<dyn EmbeddingBackend>,
        vision: Arc<dyn VisionBackend>,
    ) -> Self {
        let settings = Arc::new(settings);
        let data_dir = settings.storage.data_dir.clone();
        let personas = PersonaStore::new(&data_dir);
        let retrievers = Arc::new(RetrieverRegistry::new(
            data_dir.clone(),
            embedder,
            settings.retrieval.use_accelerated_index,
        ));
        let cache = Arc::new(CaptionCache::new(&data_dir, settings.captions.ttl_secs));
        let captioner = Captioner::new(vision, Arc::clone(&backend), Some(cache), settings.captions.clone());
        let ingestor = Arc::new(Ingestor::new(
            Arc::clone(&backend),
            captioner,
            personas.clone(),
            Arc::clone(&retrievers),
            Arc::clone(&settings),
        ));
        let guard = Arc::new(ConcurrencyGuard::from_settings(&settings.concurrency));
        let pipeline = SpeakPipeline::new(
            backend,
            Arc::clone(&guard),
            settings.speak.clone(),
            settings.retrieval.clone(),
            settings.style.clone(),
        );
        Self {
            bindings: BindingStore::new(&data_dir),
            settings,
            personas,
            retrievers,
            ingestor,
            pipeline,
            guard,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn guard(&self) -> &ConcurrencyGuard {
        &self.guard
    }

    /// Write the v1 profile and start enrichment in the background.
    ///
    /// The handle resolves when enrichment and indexing finish; dropping it
    /// leaves the job running.
    pub async fn create(
        &self,
        persona_id: &str,
        username: &str,
        corpus: Corpus,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<(CreateAck, JoinHandle<Option<CreateReport>>), Error> {
        let images = corpus.images.len();
        let (profile, job) = self.ingestor.create_profile(persona_id, username, corpus).await?;
        let ack = CreateAck {
            persona_id: profile.persona_id.clone(),
            username: profile.username.clone(),
            version: profile.version,
            texts: job.texts.len(),
            images,
            message: format!(
                "Persona for @{} created. Enrichment and indexing continue in the background.",
                profile.username
            ),
        };
        let handle = tokio::spawn(Arc::clone(&self.ingestor).finalize_create(job, progress));
        Ok((ack, handle))
    }

    pub async fn update(&self, persona_id: &str, username: &str, corpus: Corpus) -> Result<UpdateReport, Error> {
        self.ingestor.update(persona_id, username, corpus).await
    }

    /// Bind `persona_id` as the active persona of `channel`.
    pub async fn switch(&self, channel: &str, persona_id: &str) -> Result<PersonaProfile, Error> {
        let profile = self.require(persona_id).await?;
        self.bindings.bind(channel, persona_id).await?;
        log::info!("Channel {} now speaks as {} (@{})", channel, persona_id, profile.username);
        Ok(profile)
    }

    async fn require(&self, persona_id: &str) -> Result<PersonaProfile, Error> {
        self.personas
            .load(persona_id)
            .await?
            .ok_or_else(|| Error::PersonaNotFound {
                persona_id: persona_id.to_string(),
            })
    }

    /// The profile bound to `channel`.
    pub async fn active_profile(&self, channel: &str) -> Result<PersonaProfile, SpeakError> {
        let persona_id = self
            .bindings
            .active(channel)
            .await?
            .ok_or(SpeakError::NoActivePersona)?;
        self.personas
            .load(&persona_id)
            .await?
            .ok_or(SpeakError::PersonaMissing { persona_id })
    }

    /// Speak as the channel's active persona.
    pub async fn speak(
        &self,
        channel: &str,
        query: &str,
        stream: bool,
        delivery: &dyn Delivery,
    ) -> Result<SpeakOutcome, Error> {
        let profile = self.active_profile(channel).await?;
        let retriever = self.retrievers.get(&profile.persona_id).await?;
        let identity = DisplayIdentity::named(profile.username.clone());
        let outcome = self
            .pipeline
            .speak(
                &profile,
                Some(&retriever),
                SpeakRequest { channel, query, stream },
                delivery,
                &identity,
            )
            .await?;
        Ok(outcome)
    }

    /// Streaming speak whose partials and final text arrive as events.
    pub fn speak_stream(self: &Arc<Self>, channel: &str, query: &str) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Arc::clone(self);
        let channel = channel.to_string();
        let query = query.to_string();
        tokio::spawn(async move {
            let delivery = ChannelDelivery::new(tx.clone());
            let event = match service.speak(&channel, &query, true, &delivery).await {
                Ok(outcome) => StreamEvent::Done {
                    text: outcome.text,
                    regenerated: outcome.regenerated,
                },
                Err(e) => StreamEvent::Error {
                    message: e.to_string(),
                },
            };
            // receiver may have hung up
            let _ = tx.send(event);
        });
        rx
    }

    /// Conversational reply to a mention. `None` when mention replies are
    /// disabled.
    pub async fn mention(
        &self,
        channel: &str,
        message: &str,
        delivery: &dyn Delivery,
    ) -> Result<Option<SpeakOutcome>, Error> {
        if !self.settings.speak.enable_mention_speak {
            log::debug!("Mention reply in {} skipped: disabled", channel);
            return Ok(None);
        }
        let profile = self.active_profile(channel).await?;
        let retriever = self.retrievers.get(&profile.persona_id).await?;
        let identity = DisplayIdentity::named(profile.username.clone());
        let outcome = self
            .pipeline
            .mention(&profile, Some(&retriever), channel, message, delivery, &identity)
            .await?;
        Ok(Some(outcome))
    }

    pub async fn summarize(
        &self,
        username: &str,
        messages: &[String],
        last: usize,
        images: &[ImageItem],
        progress: &dyn ProgressSink,
    ) -> Result<SummaryReport, Error> {
        self.ingestor
            .summarize(username, messages, last, images, progress)
            .await
    }

    pub async fn list(&self) -> Result<Vec<String>, Error> {
        Ok(self.personas.list().await?)
    }

    pub async fn load(&self, persona_id: &str) -> Result<Option<PersonaProfile>, Error> {
        Ok(self.personas.load(persona_id).await?)
    }

    /// Delete the profile, both index artifacts and the cached retriever.
    ///
    /// Returns whether anything was removed.
    pub async fn erase(&self, persona_id: &str) -> Result<bool, Error> {
        let profile = self.personas.delete(persona_id).await?;
        let index = self.retrievers.erase(persona_id).await?;
        if profile || index {
            log::info!("Erased persona {}", persona_id);
        }
        Ok(profile || index)
    }
}

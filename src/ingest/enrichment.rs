//! Persona ingestion flows: create (with its detached enrichment job),
//! update and summarize, plus image captioning.
//!
//! Creation answers quickly with a profile built from closed-form traits;
//! the slow work (captioning, LLM style build, embedding the corpus) runs
//! afterwards in [`Ingestor::finalize_create`], which reports progress bars
//! through a [`ProgressSink`] and never fails the original request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::config::{CaptionSettings, Settings};
use crate::ingest::preprocess::{
    budget_oldest_first, cap_lines, clean_texts, compact_short_lines, last_n,
};
use crate::ingest::{Corpus, ImageItem};
use crate::llms::base_llm::{CompletionOptions, GenerationBackend, VisionBackend};
use crate::persona::profile::{PersonaProfile, ProfileUpdate};
use crate::persona::prompts::{
    caption_refine_prompt, persona_creation_prompt, rich_traits_to_style, style_from_traits,
    LEAKED_ANALYSIS_MARKER,
};
use crate::persona::style::{MediaTraits, StyleExtractor};
use crate::rag::retriever::{Retriever, RetrieverRegistry};
use crate::storage::{CaptionCache, PersonaStore};
use crate::summarize::{ChunkObserver, ContentPrompts, HierarchicalSummarizer, StylePrompts, SummarizerConfig};
use crate::utilities::errors::{Error, RetrieverError};
use crate::utilities::progress::{default_bar, ProgressSink};
use crate::utilities::string_utils::truncate_chars;

/// Hard ceiling on a stored style prompt.
pub const STYLE_PROMPT_MAX_CHARS: usize = 1200;
/// Captions kept on a profile and images captioned per update.
pub const MAX_PROFILE_CAPTIONS: usize = 20;
/// Newest texts appended to the index per update.
pub const UPDATE_INDEX_TEXTS: usize = 300;
/// Messages fed to the single style call of an update.
pub const UPDATE_STYLE_MSGS: usize = 50;
/// Index size never shrinks below this, whatever the time budget says.
pub const MIN_INDEXED_TEXTS: usize = 20;

/// Texts that fit the remaining budget at `est_ms` per embedding.
pub fn index_cap(remaining: Duration, est_ms: u64) -> usize {
    let per_item = est_ms.max(10) as u128;
    let allowed = (remaining.as_millis() / per_item) as usize;
    allowed.max(MIN_INDEXED_TEXTS)
}

/// Embedding batch size for a given embedding concurrency.
pub fn batch_size(embed_concurrency: usize) -> usize {
    (embed_concurrency * 8).clamp(8, 64)
}

fn usable_style(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty() && !text.contains(LEAKED_ANALYSIS_MARKER)
}

/// Captions images through the vision backend, optionally refining each
/// caption and consulting the caption cache.
pub struct Captioner {
    vision: Arc<dyn VisionBackend>,
    backend: Arc<dyn GenerationBackend>,
    cache: Option<Arc<CaptionCache>>,
    settings: CaptionSettings,
}

impl Captioner {
    pub fn new(
        vision: Arc<dyn VisionBackend>,
        backend: Arc<dyn GenerationBackend>,
        cache: Option<Arc<CaptionCache>>,
        settings: CaptionSettings,
    ) -> Self {
        Self {
            vision,
            backend,
            cache,
            settings,
        }
    }

    fn refine_options(&self) -> CompletionOptions {
        CompletionOptions::default()
            .with_max_tokens(self.settings.refine_max_tokens)
            .with_temperature(0.2)
            .with_top_p(0.5)
    }

    async fn caption_one(&self, item: &ImageItem, max_chars: Option<usize>) -> Option<String> {
        let mut caption = match self.vision.describe_image(item).await {
            Ok(caption) if !caption.trim().is_empty() => caption.trim().to_string(),
            Ok(_) => return None,
            Err(e) => {
                log::warn!("Captioning {} failed: {}", item.url, e);
                return None;
            }
        };
        if self.settings.refine {
            let prompt = caption_refine_prompt(&caption, item.hint_text());
            match self.backend.complete(&prompt, &self.refine_options()).await {
                Ok(refined) if !refined.trim().is_empty() => caption = refined.trim().to_string(),
                Ok(_) => {}
                Err(e) => log::debug!("Caption refinement skipped: {}", e),
            }
        }
        if let Some(max) = max_chars {
            caption = truncate_chars(&caption, max).to_string();
        }
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&item.url, &caption).await {
                log::info!("Caption cache write failed: {}", e);
            }
        }
        Some(caption)
    }

    /// Captions for `items` in input order; failures are skipped.
    pub async fn caption_images(&self, items: &[ImageItem], concurrency: usize, max_chars: Option<usize>) -> Vec<String> {
        let mut cached = Vec::with_capacity(items.len());
        for item in items {
            let hit = match &self.cache {
                Some(cache) => cache.get(&item.url).await,
                None => None,
            };
            cached.push(hit.map(|c| match max_chars {
                Some(max) => truncate_chars(&c, max).to_string(),
                None => c,
            }));
        }

        let calls: Vec<_> = items
            .iter()
            .zip(cached)
            .map(|(item, hit)| async move {
                match hit {
                    Some(caption) => Some(caption),
                    None => self.caption_one(item, max_chars).await,
                }
            })
            .collect();
        stream::iter(calls)
            .buffered(concurrency.max(1))
            .filter_map(futures::future::ready)
            .collect()
            .await
    }

    pub async fn purge_cache(&self) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.purge_expired().await {
                log::info!("Caption cache purge failed: {}", e);
            }
        }
    }
}

/// Reports chunk progress as a bar between `base` and `base + span` percent.
struct BarObserver<'a> {
    sink: &'a dyn ProgressSink,
    label: String,
    base: i64,
    span: i64,
}

#[async_trait]
impl ChunkObserver for BarObserver<'_> {
    async fn chunk_done(&self, done: usize, total: usize) {
        let pct = self.base + (done as i64 * self.span) / total.max(1) as i64;
        self.sink
            .report(&format!("{}: {}", self.label, default_bar(pct)))
            .await;
    }
}

/// Work handed to the detached enrichment job.
#[derive(Debug, Clone)]
pub struct CreateJob {
    pub persona_id: String,
    pub username: String,
    /// Cleaned texts, oldest first.
    pub texts: Vec<String>,
    pub images: Vec<ImageItem>,
    /// When the create request arrived; the time budget counts from here.
    pub started: Instant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateReport {
    pub captions: usize,
    pub style_refined: bool,
    pub indexed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub texts: usize,
    pub captions: usize,
    pub indexed: usize,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryReport {
    pub summary: String,
    pub requested: usize,
    pub included: usize,
    pub captions: usize,
}

pub struct Ingestor {
    backend: Arc<dyn GenerationBackend>,
    captioner: Captioner,
    personas: PersonaStore,
    retrievers: Arc<RetrieverRegistry>,
    extractor: StyleExtractor,
    settings: Arc<Settings>,
}

impl Ingestor {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        captioner: Captioner,
        personas: PersonaStore,
        retrievers: Arc<RetrieverRegistry>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            extractor: StyleExtractor::new(settings.style.clone(), Default::default()),
            backend,
            captioner,
            personas,
            retrievers,
            settings,
        }
    }

    pub fn extractor(&self) -> &StyleExtractor {
        &self.extractor
    }

    /// Write the initial v1 profile from closed-form traits.
    ///
    /// Returns the profile and the job the caller should spawn.
    pub async fn create_profile(
        &self,
        persona_id: &str,
        username: &str,
        corpus: Corpus,
    ) -> Result<(PersonaProfile, CreateJob), Error> {
        let started = Instant::now();
        let texts = clean_texts(&corpus.texts);
        if texts.is_empty() && corpus.images.is_empty() {
            return Err(Error::EmptyCorpus {
                persona_id: persona_id.to_string(),
            });
        }
        let features = self.extractor.extract(&texts, &[]);
        let base_style = style_from_traits(username, &features.basic, &self.settings.style);
        let profile = PersonaProfile::new(
            persona_id,
            username,
            features,
            truncate_chars(&base_style, STYLE_PROMPT_MAX_CHARS),
        );
        self.personas.save(&profile).await?;
        log::info!(
            "Created persona {} (@{}) from {} texts, {} images",
            persona_id,
            username,
            texts.len(),
            corpus.images.len()
        );
        Ok((
            profile,
            CreateJob {
                persona_id: persona_id.to_string(),
                username: username.to_string(),
                texts,
                images: corpus.images,
                started,
            },
        ))
    }

    /// The detached half of create. Errors are reported to `progress`.
    pub async fn finalize_create(self: Arc<Self>, job: CreateJob, progress: Arc<dyn ProgressSink>) -> Option<CreateReport> {
        match self.run_create_job(&job, progress.as_ref()).await {
            Ok(report) => {
                log::info!(
                    "Persona {} enriched: {} captions, style refined: {}, {} indexed",
                    job.persona_id,
                    report.captions,
                    report.style_refined,
                    report.indexed
                );
                Some(report)
            }
            Err(e) => {
                log::error!("Persona {} finalize failed: {}", job.persona_id, e);
                progress.report(&format!("Persona finalize failed: {}", e)).await;
                None
            }
        }
    }

    fn remaining(&self, job: &CreateJob) -> Duration {
        Duration::from_secs(self.settings.create.time_budget_secs).saturating_sub(job.started.elapsed())
    }

    async fn run_create_job(&self, job: &CreateJob, progress: &dyn ProgressSink) -> Result<CreateReport, Error> {
        let create = &self.settings.create;
        let username = &job.username;

        let captions = if create.include_images && !job.images.is_empty() {
            let items: Vec<ImageItem> = job.images.iter().take(create.image_captions).cloned().collect();
            self.captioner
                .caption_images(&items, create.caption_concurrency, None)
                .await
        } else {
            Vec::new()
        };

        let summarizer = HierarchicalSummarizer::new(
            Arc::clone(&self.backend),
            create.completion_options(),
            SummarizerConfig {
                hierarchical: create.hierarchical,
                chunk_max_tokens: create.chunk_max_tokens,
                max_items_per_call: create.style_msgs,
                ..SummarizerConfig::default()
            },
        );
        let family = StylePrompts {
            username: username.clone(),
            media_keywords: self.extractor.media_keywords(&captions),
        };
        let observer = BarObserver {
            sink: progress,
            label: format!("Persona style building for @{}", username),
            base: 20,
            span: 30,
        };
        let summary = summarizer
            .summarize(
                &family,
                &job.texts,
                self.remaining(job),
                create.max_tokens,
                create.chunk_count,
                Some(&observer),
            )
            .await;

        let style_refined = usable_style(&summary.text);
        let style_cap = self.settings.retrieval.style_max_chars.min(STYLE_PROMPT_MAX_CHARS);
        let mut update = ProfileUpdate::default().with_media(MediaTraits {
            captions: captions.iter().take(MAX_PROFILE_CAPTIONS).cloned().collect(),
            keywords: family.media_keywords.clone(),
        });
        if style_refined {
            update = update.with_style_prompt(truncate_chars(summary.text.trim(), style_cap));
        } else {
            log::warn!("Style build for {} produced nothing usable, keeping base style", job.persona_id);
        }

        let mut profile = self
            .personas
            .load(&job.persona_id)
            .await?
            .ok_or_else(|| Error::PersonaNotFound {
                persona_id: job.persona_id.clone(),
            })?;
        profile.enrich(update);
        self.personas.save(&profile).await?;
        progress
            .report(&format!("Persona style enriched for @{}. Indexing…", username))
            .await;

        let mut reps = last_n(&job.texts, create.index_snippets);
        let allowed = index_cap(self.remaining(job), create.embed_time_est_ms);
        if reps.len() > allowed {
            reps = last_n(&reps, allowed);
        }
        let retriever = self.retrievers.get(&job.persona_id).await?;
        let indexed = index_in_batches(
            &retriever,
            &reps,
            batch_size(self.settings.backend.embed_concurrency),
            progress,
            username,
        )
        .await?;

        Ok(CreateReport {
            captions: captions.len(),
            style_refined,
            indexed,
        })
    }

    /// Incremental update: index new content, re-extract traits, rebuild the
    /// style prompt and bump the profile version.
    pub async fn update(&self, persona_id: &str, username: &str, corpus: Corpus) -> Result<UpdateReport, Error> {
        let texts = clean_texts(&corpus.texts);
        if texts.is_empty() && corpus.images.is_empty() {
            return Err(Error::EmptyCorpus {
                persona_id: persona_id.to_string(),
            });
        }
        let mut profile = self
            .personas
            .load(persona_id)
            .await?
            .ok_or_else(|| Error::PersonaNotFound {
                persona_id: persona_id.to_string(),
            })?;

        let items: Vec<ImageItem> = corpus.images.iter().take(MAX_PROFILE_CAPTIONS).cloned().collect();
        let captions = self
            .captioner
            .caption_images(&items, self.settings.create.caption_concurrency, None)
            .await;

        let mut to_add = last_n(&texts, UPDATE_INDEX_TEXTS);
        to_add.extend(captions.iter().map(|c| format!("[img] {}", c)));
        let retriever = self.retrievers.get(persona_id).await?;
        let indexed = retriever.add_texts(&to_add).await?;

        let features = self.extractor.extract(&texts, &captions);
        let prompt = persona_creation_prompt(username, &last_n(&texts, UPDATE_STYLE_MSGS));
        let style = match self
            .backend
            .complete(&prompt, &self.settings.create.completion_options())
            .await
        {
            Ok(text) if usable_style(&text) => text.trim().to_string(),
            Ok(_) => rich_traits_to_style(username, &features.rich),
            Err(e) => {
                log::warn!("Style rebuild failed, using trait summary: {}", e);
                rich_traits_to_style(username, &features.rich)
            }
        };
        let style = truncate_chars(&style, self.settings.retrieval.style_max_chars).to_string();

        profile.apply_update(
            ProfileUpdate::from_features(features)
                .with_username(username)
                .with_style_prompt(style),
        );
        self.personas.save(&profile).await?;
        log::info!(
            "Updated persona {} to v{} with {} texts, {} captions",
            persona_id,
            profile.version,
            texts.len(),
            captions.len()
        );

        Ok(UpdateReport {
            texts: texts.len(),
            captions: captions.len(),
            indexed,
            version: profile.version,
        })
    }

    /// Content summary of the last `last` messages (0 = all).
    pub async fn summarize(
        &self,
        username: &str,
        messages: &[String],
        last: usize,
        images: &[ImageItem],
        progress: &dyn ProgressSink,
    ) -> Result<SummaryReport, Error> {
        let cfg = &self.settings.summarize;
        let label = format!("Summarizing @{}", username);
        progress.report(&format!("{}: {}", label, default_bar(0))).await;

        let texts = clean_texts(messages);
        if texts.is_empty() {
            return Err(Error::EmptyCorpus {
                persona_id: username.to_string(),
            });
        }
        let used = compact_short_lines(&last_n(&texts, last));
        let used = cap_lines(used, cfg.msg_max_chars.max(40));
        progress.report(&format!("{}: {}", label, default_bar(10))).await;

        let captions = if cfg.include_images && !images.is_empty() {
            self.captioner.purge_cache().await;
            let items: Vec<ImageItem> = images.iter().take(cfg.image_captions).cloned().collect();
            let captions = self
                .captioner
                .caption_images(&items, cfg.caption_concurrency, Some(cfg.image_caption_max_chars))
                .await;
            progress.report(&format!("{}: {}", label, default_bar(40))).await;
            captions
        } else {
            Vec::new()
        };

        let used = budget_oldest_first(used, cfg.total_max_chars.max(1000));
        let summarizer = HierarchicalSummarizer::new(
            Arc::clone(&self.backend),
            cfg.completion_options(),
            SummarizerConfig {
                hierarchical: cfg.hierarchical,
                chunk_max_tokens: cfg.chunk_max_tokens,
                ..SummarizerConfig::default()
            },
        );
        let family = ContentPrompts {
            username: username.to_string(),
            image_captions: captions.clone(),
        };
        let observer = BarObserver {
            sink: progress,
            label: label.clone(),
            base: 40,
            span: 50,
        };
        let summary = summarizer
            .summarize(
                &family,
                &used,
                Duration::from_secs(cfg.time_budget_secs),
                cfg.effective_max_tokens(),
                cfg.chunk_count,
                Some(&observer),
            )
            .await;
        progress.report(&format!("{}: {}", label, default_bar(100))).await;

        Ok(SummaryReport {
            summary: summary.text,
            requested: last,
            included: used.len(),
            captions: captions.len(),
        })
    }
}

/// Add `texts` to the index in batches, reporting a bar after each one.
pub async fn index_in_batches(
    retriever: &Retriever,
    texts: &[String],
    batch_size: usize,
    progress: &dyn ProgressSink,
    username: &str,
) -> Result<usize, RetrieverError> {
    let total = texts.len();
    let mut done = 0;
    let mut indexed = 0;
    for batch in texts.chunks(batch_size.max(1)) {
        indexed += retriever.add_texts(batch).await?;
        done += batch.len();
        let pct = (done * 100 / total.max(1)) as i64;
        progress
            .report(&format!(
                "Indexing progress for @{}: {} ({}/{})",
                username,
                default_bar(pct),
                done,
                total
            ))
            .await;
    }
    progress
        .report(&format!(
            "Indexing complete for @{}: {} ({}/{})",
            username,
            default_bar(100),
            total,
            total
        ))
        .await;
    Ok(indexed)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tempfile::TempDir;

    use super::*;
    use crate::rag::embeddings::HashEmbedder;
    use crate::testing::{FakeVision, RecordingProgress, ScriptedGenerator};

    struct Fixture {
        _dir: TempDir,
        ingestor: Arc<Ingestor>,
        backend: Arc<ScriptedGenerator>,
        vision: Arc<FakeVision>,
        personas: PersonaStore,
        retrievers: Arc<RetrieverRegistry>,
    }

    fn fixture(backend: ScriptedGenerator, tweak: impl FnOnce(&mut Settings)) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.captions.refine = false;
        tweak(&mut settings);
        let settings = Arc::new(settings);
        let backend = Arc::new(backend);
        let vision = Arc::new(FakeVision::default());
        let personas = PersonaStore::new(dir.path());
        let retrievers = Arc::new(RetrieverRegistry::new(
            dir.path().to_path_buf(),
            Arc::new(HashEmbedder::default()),
            false,
        ));
        let cache = Arc::new(CaptionCache::new(dir.path(), 3600));
        let captioner = Captioner::new(vision.clone(), backend.clone(), Some(cache), settings.captions.clone());
        let ingestor = Arc::new(Ingestor::new(
            backend.clone(),
            captioner,
            personas.clone(),
            retrievers.clone(),
            settings,
        ));
        Fixture {
            _dir: dir,
            ingestor,
            backend,
            vision,
            personas,
            retrievers,
        }
    }

    fn corpus(n: usize) -> Corpus {
        Corpus::new((0..n).map(|i| format!("message number {} lol", i)).collect())
    }

    #[test]
    fn test_index_cap_floor() {
        assert_eq!(index_cap(Duration::from_secs(0), 60), MIN_INDEXED_TEXTS);
        assert_eq!(index_cap(Duration::from_secs(6), 60), 100);
        assert_eq!(index_cap(Duration::from_millis(500), 1), 50);
    }

    #[test]
    fn test_batch_size_bounds() {
        assert_eq!(batch_size(0), 8);
        assert_eq!(batch_size(4), 32);
        assert_eq!(batch_size(100), 64);
    }

    #[tokio::test]
    async fn test_create_then_finalize() {
        let f = fixture(ScriptedGenerator::fixed("- Tone: playful\n- Length: short"), |_| {});
        let (profile, job) = f
            .ingestor
            .create_profile("42", "sam", corpus(30))
            .await
            .unwrap();
        assert_eq!(profile.version, 1);
        assert!(profile.style_prompt.starts_with("Style guide for @sam"));

        let progress = Arc::new(RecordingProgress::default());
        let report = f
            .ingestor
            .clone()
            .finalize_create(job, progress.clone())
            .await
            .unwrap();
        assert!(report.style_refined);
        assert_eq!(report.indexed, 30);

        let stored = f.personas.load("42").await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.style_prompt, "- Tone: playful\n- Length: short");
        assert!(f.retrievers.get("42").await.unwrap().is_ready());

        let messages = progress.messages();
        assert!(messages.iter().any(|m| m.starts_with("Persona style building for @sam")));
        assert!(messages
            .last()
            .unwrap()
            .starts_with("Indexing complete for @sam: [####################] 100% (30/30)"));
    }

    #[tokio::test]
    async fn test_finalize_keeps_base_style_when_backend_down() {
        let f = fixture(ScriptedGenerator::failing(), |_| {});
        let (profile, job) = f
            .ingestor
            .create_profile("42", "sam", corpus(5))
            .await
            .unwrap();
        let progress = Arc::new(RecordingProgress::default());
        let report = f.ingestor.clone().finalize_create(job, progress).await.unwrap();
        assert!(!report.style_refined);
        let stored = f.personas.load("42").await.unwrap().unwrap();
        assert_eq!(stored.style_prompt, profile.style_prompt);
    }

    #[tokio::test]
    async fn test_create_rejects_empty_corpus() {
        let f = fixture(ScriptedGenerator::fixed("x"), |_| {});
        let err = f
            .ingestor
            .create_profile("42", "sam", Corpus::new(vec!["  ".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyCorpus { .. }));
    }

    #[tokio::test]
    async fn test_create_captions_images_when_enabled() {
        let f = fixture(ScriptedGenerator::fixed("style"), |s| {
            s.create.include_images = true;
            s.create.image_captions = 2;
        });
        let images = vec![
            ImageItem::new("http://img/cat.png"),
            ImageItem::new("http://img/broken.png"),
            ImageItem::new("http://img/never.png"),
        ];
        let (_, job) = f
            .ingestor
            .create_profile("42", "sam", corpus(3).with_images(images))
            .await
            .unwrap();
        let report = f
            .ingestor
            .clone()
            .finalize_create(job, Arc::new(RecordingProgress::default()))
            .await
            .unwrap();
        assert_eq!(report.captions, 1);
        assert_eq!(f.vision.calls.load(Ordering::SeqCst), 2);
        let stored = f.personas.load("42").await.unwrap().unwrap();
        assert_eq!(stored.media.captions, vec!["caption of http://img/cat.png"]);
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_indexes() {
        let f = fixture(ScriptedGenerator::fixed("- Tone: dry"), |_| {});
        f.ingestor.create_profile("42", "sam", corpus(3)).await.unwrap();

        let update = Corpus::new(vec!["new stuff happened".into()])
            .with_images(vec![ImageItem::new("http://img/dog.png")]);
        let report = f.ingestor.update("42", "samuel", update).await.unwrap();
        assert_eq!(report.version, 2);
        assert_eq!(report.indexed, 2);

        let stored = f.personas.load("42").await.unwrap().unwrap();
        assert_eq!(stored.username, "samuel");
        assert_eq!(stored.style_prompt, "- Tone: dry");

        let snapshot = f.retrievers.get("42").await.unwrap().snapshot().unwrap();
        assert_eq!(
            snapshot.texts(),
            &["new stuff happened".to_string(), "[img] caption of http://img/dog.png".to_string()]
        );
    }

    #[tokio::test]
    async fn test_update_falls_back_to_trait_style() {
        let f = fixture(ScriptedGenerator::failing(), |_| {});
        f.ingestor.create_profile("42", "sam", corpus(3)).await.unwrap();
        f.ingestor
            .update("42", "sam", Corpus::new(vec!["more".into()]))
            .await
            .unwrap();
        let stored = f.personas.load("42").await.unwrap().unwrap();
        assert!(stored.style_prompt.starts_with("Observed style for @sam"));
    }

    #[tokio::test]
    async fn test_update_unknown_persona() {
        let f = fixture(ScriptedGenerator::fixed("x"), |_| {});
        let err = f
            .ingestor
            .update("nobody", "x", Corpus::new(vec!["hi".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PersonaNotFound { .. }));
    }

    #[tokio::test]
    async fn test_summarize_small_window_single_call() {
        let f = fixture(ScriptedGenerator::fixed("- Key points: pizza"), |_| {});
        let messages: Vec<String> = (0..8).map(|i| format!("msg {}", i)).collect();
        let progress = RecordingProgress::default();
        let report = f
            .ingestor
            .summarize("sam", &messages, 5, &[], &progress)
            .await
            .unwrap();
        assert_eq!(report.summary, "- Key points: pizza");
        // five short lines compact into one
        assert_eq!(report.included, 1);
        assert_eq!(f.backend.call_count(), 1);
        assert!(f.backend.prompts()[0].contains("msg 3 msg 4 msg 5 msg 6 msg 7"));
        assert_eq!(progress.messages().last().unwrap(), "Summarizing @sam: [####################] 100%");
    }

    #[tokio::test]
    async fn test_summarize_uses_caption_cache() {
        let f = fixture(ScriptedGenerator::fixed("summary"), |s| {
            s.summarize.image_caption_max_chars = 10;
        });
        let images = vec![ImageItem::new("http://img/cat.png")];
        let messages = vec!["look at this".to_string()];
        let progress = RecordingProgress::default();
        let first = f
            .ingestor
            .summarize("sam", &messages, 0, &images, &progress)
            .await
            .unwrap();
        assert_eq!(first.captions, 1);
        f.ingestor
            .summarize("sam", &messages, 0, &images, &progress)
            .await
            .unwrap();
        assert_eq!(f.vision.calls.load(Ordering::SeqCst), 1);
        assert!(f.backend.prompts()[1].contains("- caption of"));
    }
}

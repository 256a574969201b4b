//! Per-persona retrieval over a [`VectorIndex`].
//!
//! Readers work on an `Arc` snapshot of the current index, so searches never
//! block on ingestion. `add_texts` builds the next index from a copy of the
//! current one, persists it, and only then swaps it in: a failed or
//! interrupted batch leaves both the in-memory and the persisted index as
//! they were. A per-retriever writer lock serializes batches.
//!
//! Artifacts that exist but cannot be decoded are logged and treated as
//! absent; the next batch starts a fresh index over them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::ingest::preprocess::clean_texts;
use crate::llms::base_llm::EmbeddingBackend;
use crate::rag::index::{IndexBackend, VectorIndex};
use crate::rag::types::{l2_normalize, ScoredText};
use crate::utilities::errors::{IndexError, RetrieverError};
use crate::utilities::paths::index_base;

fn task_error(e: tokio::task::JoinError) -> RetrieverError {
    RetrieverError::Task(e.to_string())
}

pub struct Retriever {
    base: PathBuf,
    embedder: Arc<dyn EmbeddingBackend>,
    prefer_accelerated: bool,
    current: RwLock<Option<Arc<VectorIndex>>>,
    writer: tokio::sync::Mutex<()>,
    /// Set once the persona is erased; later batches are dropped unsaved.
    retired: AtomicBool,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("base", &self.base)
            .field("entries", &self.len())
            .finish()
    }
}

impl Retriever {
    /// Open the index persisted at `base`, if any.
    pub async fn open(
        base: PathBuf,
        embedder: Arc<dyn EmbeddingBackend>,
        prefer_accelerated: bool,
    ) -> Result<Self, RetrieverError> {
        let load_base = base.clone();
        let loaded = tokio::task::spawn_blocking(move || VectorIndex::load(&load_base))
            .await
            .map_err(task_error)?;
        let index = match loaded {
            Ok(index) => index,
            Err(e @ (IndexError::Corrupt { .. } | IndexError::Json(_))) => {
                log::error!("Discarding unreadable index at {}: {}", base.display(), e);
                None
            }
            Err(e) => return Err(e.into()),
        };
        match &index {
            Some(idx) => log::debug!("Loaded index {} ({} entries)", base.display(), idx.len()),
            None => log::info!("No index at {} yet", base.display()),
        }
        Ok(Self {
            base,
            embedder,
            prefer_accelerated,
            current: RwLock::new(index.map(Arc::new)),
            writer: tokio::sync::Mutex::new(()),
            retired: AtomicBool::new(false),
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// The index as of now; later additions do not affect it.
    pub fn snapshot(&self) -> Option<Arc<VectorIndex>> {
        self.current.read().clone()
    }

    /// An index exists and holds at least one entry.
    pub fn is_ready(&self) -> bool {
        self.snapshot().map_or(false, |idx| !idx.is_empty())
    }

    pub fn len(&self) -> usize {
        self.snapshot().map_or(0, |idx| idx.len())
    }

    /// Stop accepting batches. Waits for a batch already in progress, so no
    /// save can land after this returns.
    pub async fn retire(&self) {
        let _writer = self.writer.lock().await;
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Embed, normalize, append and persist a batch.
    ///
    /// Texts are trimmed and PII-redacted first; blank ones are skipped.
    /// Returns the number of entries added (0 once retired).
    pub async fn add_texts(&self, texts: &[String]) -> Result<usize, RetrieverError> {
        let texts = clean_texts(texts);
        if texts.is_empty() {
            return Ok(0);
        }
        let _writer = self.writer.lock().await;
        if self.is_retired() {
            log::info!("Dropping {} texts for retired index {}", texts.len(), self.base.display());
            return Ok(0);
        }

        let mut vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(RetrieverError::EmbeddingCount {
                expected: texts.len(),
                found: vectors.len(),
            });
        }
        for v in vectors.iter_mut() {
            l2_normalize(v);
        }

        let mut next = match self.snapshot() {
            Some(current) => (*current).clone(),
            None => {
                let dim = vectors.first().map_or(0, Vec::len);
                VectorIndex::new(dim, IndexBackend::resolve(self.prefer_accelerated))
            }
        };
        next.add(&vectors, &texts)?;

        let next = Arc::new(next);
        let to_save = Arc::clone(&next);
        let base = self.base.clone();
        tokio::task::spawn_blocking(move || to_save.save(&base))
            .await
            .map_err(task_error)??;

        log::debug!(
            "Indexed {} texts into {} (now {})",
            texts.len(),
            self.base.display(),
            next.len()
        );
        *self.current.write() = Some(next);
        Ok(texts.len())
    }

    /// Top-`k` stored texts for `text`.
    ///
    /// Empty when the index is not ready or the embedding backend fails.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredText>, RetrieverError> {
        let Some(index) = self.snapshot().filter(|idx| !idx.is_empty()) else {
            return Ok(Vec::new());
        };
        let mut vectors = match self.embedder.embed(&[text.to_string()]).await {
            Ok(vectors) => vectors,
            Err(e) => {
                log::warn!("Query embedding failed, skipping retrieval: {}", e);
                return Ok(Vec::new());
            }
        };
        let mut query = vectors
            .pop()
            .ok_or(RetrieverError::EmbeddingCount {
                expected: 1,
                found: 0,
            })?;
        l2_normalize(&mut query);

        let hits = tokio::task::spawn_blocking(move || index.search(&[query], k))
            .await
            .map_err(task_error)??;
        Ok(hits.into_iter().next().unwrap_or_default())
    }

    /// Score of the closest stored text, clamped to `[0, 1]`; 0 when not ready.
    pub async fn similarity_to_nearest(&self, text: &str) -> f32 {
        match self.query(text, 1).await {
            Ok(hits) => hits.first().map_or(0.0, |h| h.score.clamp(0.0, 1.0)),
            Err(e) => {
                log::warn!("Similarity check failed: {}", e);
                0.0
            }
        }
    }
}

/// Caches one [`Retriever`] per persona.
pub struct RetrieverRegistry {
    data_dir: PathBuf,
    embedder: Arc<dyn EmbeddingBackend>,
    prefer_accelerated: bool,
    retrievers: DashMap<String, Arc<Retriever>>,
}

impl RetrieverRegistry {
    pub fn new(data_dir: PathBuf, embedder: Arc<dyn EmbeddingBackend>, prefer_accelerated: bool) -> Self {
        Self {
            data_dir,
            embedder,
            prefer_accelerated,
            retrievers: DashMap::new(),
        }
    }

    /// The retriever for `persona_id`, opening it on first use.
    pub async fn get(&self, persona_id: &str) -> Result<Arc<Retriever>, RetrieverError> {
        if let Some(existing) = self.retrievers.get(persona_id).map(|r| Arc::clone(r.value())) {
            return Ok(existing);
        }
        let opened = Arc::new(
            Retriever::open(
                index_base(&self.data_dir, persona_id),
                Arc::clone(&self.embedder),
                self.prefer_accelerated,
            )
            .await?,
        );
        let entry = self
            .retrievers
            .entry(persona_id.to_string())
            .or_insert(opened);
        Ok(Arc::clone(entry.value()))
    }

    /// Drop the cached retriever; the next `get` reloads from disk.
    pub fn forget(&self, persona_id: &str) -> Option<Arc<Retriever>> {
        self.retrievers.remove(persona_id).map(|(_, r)| r)
    }

    /// Forget and retire the retriever, then delete its persisted artifacts.
    ///
    /// Holders of the old `Arc` can still search it, but their batches are
    /// no longer saved.
    pub async fn erase(&self, persona_id: &str) -> Result<bool, RetrieverError> {
        if let Some(retriever) = self.forget(persona_id) {
            retriever.retire().await;
        }
        let base = index_base(&self.data_dir, persona_id);
        let removed = tokio::task::spawn_blocking(move || VectorIndex::remove_artifacts(&base))
            .await
            .map_err(task_error)??;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::rag::embeddings::HashEmbedder;
    use crate::rag::index::vectors_path;
    use crate::utilities::errors::{BackendError, IndexError};

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn open(dir: &TempDir, name: &str) -> Retriever {
        Retriever::open(
            dir.path().join(name),
            Arc::new(HashEmbedder::default()),
            false,
        )
        .await
        .unwrap()
    }

    /// Hash embedder that can be switched to fail or to a different width.
    struct FlakyEmbedder {
        inner: HashEmbedder,
        fail: AtomicBool,
        wide: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingBackend for FlakyEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(BackendError::unavailable("embedding server down"));
            }
            let mut out = self.inner.embed(texts).await?;
            if self.wide.load(Ordering::SeqCst) {
                for v in out.iter_mut() {
                    v.push(1.0);
                }
            }
            Ok(out)
        }
    }

    fn flaky() -> Arc<FlakyEmbedder> {
        Arc::new(FlakyEmbedder {
            inner: HashEmbedder::new(32),
            fail: AtomicBool::new(false),
            wide: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_hello_world_scenario() {
        let dir = TempDir::new().unwrap();
        let r = open(&dir, "p.idx").await;
        r.add_texts(&strings(&["hello world", "hello world", "ok"]))
            .await
            .unwrap();
        let hits = r.query("hello world", 3).await.unwrap();
        assert_eq!(hits[0].text, "hello world");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_empty_retriever() {
        let dir = TempDir::new().unwrap();
        let r = open(&dir, "p.idx").await;
        assert!(!r.is_ready());
        assert!(r.query("anything", 3).await.unwrap().is_empty());
        assert_eq!(r.similarity_to_nearest("anything").await, 0.0);
    }

    #[tokio::test]
    async fn test_self_retrieval() {
        let dir = TempDir::new().unwrap();
        let r = open(&dir, "p.idx").await;
        let corpus = strings(&[
            "the gym was packed today",
            "anyone watching the new anime season",
            "coffee first then code",
            "server is down again ugh",
        ]);
        r.add_texts(&corpus).await.unwrap();
        for text in &corpus {
            let hits = r.query(text, 2).await.unwrap();
            assert_eq!(&hits[0].text, text);
            assert!(hits[0].score >= hits[1].score);
        }
    }

    #[tokio::test]
    async fn test_batches_compose() {
        let dir = TempDir::new().unwrap();
        let split = open(&dir, "split.idx").await;
        split.add_texts(&strings(&["alpha beta", "gamma"])).await.unwrap();
        split.add_texts(&strings(&["delta alpha"])).await.unwrap();

        let whole = open(&dir, "whole.idx").await;
        whole
            .add_texts(&strings(&["alpha beta", "gamma", "delta alpha"]))
            .await
            .unwrap();

        for q in ["alpha", "gamma delta", "beta"] {
            assert_eq!(
                split.query(q, 3).await.unwrap(),
                whole.query(q, 3).await.unwrap()
            );
        }
    }

    #[tokio::test]
    async fn test_reopen_sees_persisted_entries() {
        let dir = TempDir::new().unwrap();
        let r = open(&dir, "p.idx").await;
        r.add_texts(&strings(&["persisted line"])).await.unwrap();
        let before = r.query("persisted", 1).await.unwrap();

        let reopened = open(&dir, "p.idx").await;
        assert!(reopened.is_ready());
        let after = reopened.query("persisted", 1).await.unwrap();
        assert_eq!(before[0].text, after[0].text);
        assert!((before[0].score - after[0].score).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_unreadable_index_is_replaced() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("p.idx");
        let r = open(&dir, "p.idx").await;
        r.add_texts(&strings(&["old line"])).await.unwrap();
        std::fs::write(vectors_path(&base), b"garbage").unwrap();
        assert!(matches!(
            VectorIndex::load(&base),
            Err(IndexError::Corrupt { .. })
        ));

        let reopened = open(&dir, "p.idx").await;
        assert!(!reopened.is_ready());
        assert!(reopened.query("old", 1).await.unwrap().is_empty());

        assert_eq!(reopened.add_texts(&strings(&["new line"])).await.unwrap(), 1);
        assert!(reopened.is_ready());
        let persisted = VectorIndex::load(&base).unwrap().unwrap();
        assert_eq!(persisted.texts(), &["new line".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_index_intact() {
        let dir = TempDir::new().unwrap();
        let embedder = flaky();
        let base = dir.path().join("p.idx");
        let r = Retriever::open(base.clone(), embedder.clone(), false)
            .await
            .unwrap();
        r.add_texts(&strings(&["first batch"])).await.unwrap();

        embedder.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            r.add_texts(&strings(&["second batch"])).await,
            Err(RetrieverError::Backend(_))
        ));
        // query degrades to empty instead of failing
        assert!(r.query("first", 1).await.unwrap().is_empty());

        embedder.fail.store(false, Ordering::SeqCst);
        embedder.wide.store(true, Ordering::SeqCst);
        assert!(matches!(
            r.add_texts(&strings(&["third batch"])).await,
            Err(RetrieverError::Index(IndexError::DimensionMismatch { .. }))
        ));

        assert_eq!(r.len(), 1);
        let persisted = VectorIndex::load(&base).unwrap().unwrap();
        assert_eq!(persisted.texts(), &["first batch".to_string()]);
    }

    #[tokio::test]
    async fn test_add_skips_blank_and_redacts() {
        let dir = TempDir::new().unwrap();
        let embedder = flaky();
        let r = Retriever::open(dir.path().join("p.idx"), embedder.clone(), false)
            .await
            .unwrap();
        assert_eq!(r.add_texts(&strings(&["  ", ""])).await.unwrap(), 0);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        r.add_texts(&strings(&["call 5551234567"])).await.unwrap();
        assert_eq!(
            r.snapshot().unwrap().texts(),
            &["call [REDACTED]".to_string()]
        );
    }

    #[tokio::test]
    async fn test_registry_caches_and_erases() {
        let dir = TempDir::new().unwrap();
        let registry = RetrieverRegistry::new(
            dir.path().to_path_buf(),
            Arc::new(HashEmbedder::default()),
            true,
        );
        let a = registry.get("42").await.unwrap();
        let b = registry.get("42").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        a.add_texts(&strings(&["something"])).await.unwrap();
        assert!(registry.erase("42").await.unwrap());
        let fresh = registry.get("42").await.unwrap();
        assert!(!Arc::ptr_eq(&a, &fresh));
        assert!(!fresh.is_ready());
    }

    #[tokio::test]
    async fn test_erase_stops_later_and_concurrent_batches() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(RetrieverRegistry::new(
            dir.path().to_path_buf(),
            Arc::new(HashEmbedder::default()),
            false,
        ));
        let base = index_base(dir.path(), "7");
        let held = registry.get("7").await.unwrap();
        held.add_texts(&strings(&["first"])).await.unwrap();

        let writer = Arc::clone(&held);
        let batch = tokio::spawn(async move { writer.add_texts(&strings(&["racing batch"])).await });
        registry.erase("7").await.unwrap();
        batch.await.unwrap().unwrap();

        assert!(held.is_retired());
        assert_eq!(held.add_texts(&strings(&["late batch"])).await.unwrap(), 0);
        assert!(VectorIndex::load(&base).unwrap().is_none());
        assert!(!registry.get("7").await.unwrap().is_ready());
    }
}

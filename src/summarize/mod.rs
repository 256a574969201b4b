//! Hierarchical map-reduce summarization under a time and token budget.
//!
//! Small inputs (or a nearly spent budget) take one backend call. Larger
//! inputs are split into contiguous, size-balanced chunks; each chunk is
//! summarized under a per-chunk token cap with bounded parallelism, and the
//! partials are merged, in original order, by one final call under the
//! overall cap.
//!
//! The same engine builds persona style guides ([`StylePrompts`]) and
//! content summaries ([`ContentPrompts`]); only the prompts differ.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::llms::base_llm::{CompletionOptions, GenerationBackend};
use crate::persona::prompts;

/// Inputs at or below this many items are summarized in one call.
pub const CHUNK_THRESHOLD: usize = 10;

/// Builds the prompts for one summarization flavour.
pub trait PromptFamily: Send + Sync {
    /// Prompt for a single-pass summary of `items`.
    fn single(&self, items: &[String]) -> String;

    /// Prompt for one chunk of a hierarchical run.
    fn chunk(&self, items: &[String]) -> String {
        self.single(items)
    }

    /// Prompt merging the chunk partials.
    fn merge(&self, partials: &[String]) -> String;
}

/// Persona style guide construction.
#[derive(Debug, Clone)]
pub struct StylePrompts {
    pub username: String,
    pub media_keywords: Vec<String>,
}

impl PromptFamily for StylePrompts {
    fn single(&self, items: &[String]) -> String {
        prompts::persona_creation_prompt(&self.username, items)
    }

    fn merge(&self, partials: &[String]) -> String {
        prompts::merge_style_prompt(&self.username, partials, &self.media_keywords)
    }
}

/// Content summaries of a message window.
///
/// Image captions go into the single-pass and merge prompts only.
#[derive(Debug, Clone)]
pub struct ContentPrompts {
    pub username: String,
    pub image_captions: Vec<String>,
}

impl PromptFamily for ContentPrompts {
    fn single(&self, items: &[String]) -> String {
        prompts::summarize_prompt(&self.username, items, &self.image_captions)
    }

    fn chunk(&self, items: &[String]) -> String {
        prompts::summarize_prompt(&self.username, items, &[])
    }

    fn merge(&self, partials: &[String]) -> String {
        prompts::merge_summaries_prompt(&self.username, partials, &self.image_captions)
    }
}

/// Receives `(done, total)` after each chunk completes.
#[async_trait]
pub trait ChunkObserver: Send + Sync {
    async fn chunk_done(&self, done: usize, total: usize);
}

/// Tuning knobs; the defaults are the deployed values.
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    pub hierarchical: bool,
    pub chunk_threshold: usize,
    /// Hierarchical mode needs more than this much budget left at entry.
    pub hierarchical_min_remaining: Duration,
    /// Below this much remaining budget the chunk count drops to two and the
    /// per-chunk cap shrinks to `reduced_chunk_max_tokens`.
    pub full_speed_min_remaining: Duration,
    pub chunk_max_tokens: u32,
    pub reduced_chunk_max_tokens: u32,
    /// Chunks summarized concurrently.
    pub chunk_parallelism: usize,
    /// Most recent items fed to one call; 0 means no limit.
    pub max_items_per_call: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            hierarchical: true,
            chunk_threshold: CHUNK_THRESHOLD,
            hierarchical_min_remaining: Duration::from_secs(30),
            full_speed_min_remaining: Duration::from_secs(60),
            chunk_max_tokens: 96,
            reduced_chunk_max_tokens: 64,
            chunk_parallelism: 2,
            max_items_per_call: 0,
        }
    }
}

/// Result of one summarization run.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub text: String,
    /// Number of chunks (0 for a single-pass run).
    pub chunks: usize,
    /// Items actually summarized after truncation.
    pub items_used: usize,
    /// Backend calls that failed and contributed nothing.
    pub failed_calls: usize,
}

/// Number of chunks for a run: the hint when budget allows, at most two
/// otherwise; never below two and never above the item count.
pub fn chunk_count(hint: usize, items: usize, remaining: Duration, full_speed_min: Duration) -> usize {
    let wanted = if remaining > full_speed_min { hint } else { hint.min(2) };
    wanted.max(2).min(items.max(1))
}

/// Split `items` into `n` contiguous chunks whose sizes differ by at most one.
///
/// Earlier chunks take the remainder. Empty chunks are never produced.
pub fn split_balanced<T>(items: &[T], n: usize) -> Vec<&[T]> {
    if items.is_empty() {
        return Vec::new();
    }
    let n = n.clamp(1, items.len());
    let base = items.len() / n;
    let extra = items.len() % n;
    let mut chunks = Vec::with_capacity(n);
    let mut start = 0;
    for i in 0..n {
        let size = base + usize::from(i < extra);
        chunks.push(&items[start..start + size]);
        start += size;
    }
    chunks
}

pub struct HierarchicalSummarizer {
    backend: Arc<dyn GenerationBackend>,
    options: CompletionOptions,
    config: SummarizerConfig,
}

impl HierarchicalSummarizer {
    /// `options` carries the overall cap and sampling settings.
    pub fn new(backend: Arc<dyn GenerationBackend>, options: CompletionOptions, config: SummarizerConfig) -> Self {
        Self {
            backend,
            options,
            config,
        }
    }

    pub fn config(&self) -> &SummarizerConfig {
        &self.config
    }

    /// Summarize `items` (oldest first).
    ///
    /// `time_budget` is the budget remaining at entry; `token_budget` caps
    /// the merge (or single) call and bounds every chunk call.
    pub async fn summarize(
        &self,
        family: &dyn PromptFamily,
        items: &[String],
        time_budget: Duration,
        token_budget: u32,
        chunk_count_hint: usize,
        observer: Option<&dyn ChunkObserver>,
    ) -> Summary {
        let deadline = Instant::now() + time_budget;
        let hierarchical = self.config.hierarchical
            && items.len() > self.config.chunk_threshold
            && time_budget > self.config.hierarchical_min_remaining;

        if !hierarchical {
            let used = self.recent(items, 1);
            let (text, failed) = self
                .call(&family.single(used), token_budget)
                .await
                .map_or((String::new(), 1), |t| (t, 0));
            return Summary {
                text,
                chunks: 0,
                items_used: used.len(),
                failed_calls: failed,
            };
        }

        let wanted = chunk_count(
            chunk_count_hint,
            items.len(),
            time_budget,
            self.config.full_speed_min_remaining,
        );
        let used = self.recent(items, wanted);
        let chunks = split_balanced(used, wanted);
        let total = chunks.len();
        log::debug!(
            "Hierarchical summary: {} items in {} chunks, {:?} budget",
            used.len(),
            total,
            time_budget
        );

        // The cap is chosen when a chunk call starts, not when the run starts.
        let calls: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let prompt = family.chunk(chunk);
                async move {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let cap = if remaining < self.config.full_speed_min_remaining {
                        self.config.reduced_chunk_max_tokens
                    } else {
                        self.config.chunk_max_tokens
                    };
                    self.call(&prompt, cap.min(token_budget)).await
                }
            })
            .collect();
        let mut results = stream::iter(calls).buffered(self.config.chunk_parallelism.max(1));

        let mut partials = Vec::with_capacity(total);
        let mut failed_calls = 0;
        while let Some(result) = results.next().await {
            match result {
                Some(text) => partials.push(text),
                None => {
                    failed_calls += 1;
                    partials.push(String::new());
                }
            }
            if let Some(observer) = observer {
                observer.chunk_done(partials.len(), total).await;
            }
        }

        let text = match self.call(&family.merge(&partials), token_budget).await {
            Some(text) => text,
            None => {
                failed_calls += 1;
                log::warn!("Merge call failed, joining {} partials", partials.len());
                partials
                    .iter()
                    .map(|p| p.trim())
                    .filter(|p| !p.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };

        Summary {
            text,
            chunks: total,
            items_used: used.len(),
            failed_calls,
        }
    }

    /// Newest items that fit `calls` calls of `max_items_per_call` each.
    fn recent<'a>(&self, items: &'a [String], calls: usize) -> &'a [String] {
        match self.config.max_items_per_call {
            0 => items,
            per_call => {
                let keep = per_call.saturating_mul(calls.max(1));
                &items[items.len().saturating_sub(keep)..]
            }
        }
    }

    async fn call(&self, prompt: &str, max_tokens: u32) -> Option<String> {
        let options = self.options.clone().with_max_tokens(max_tokens);
        match self.backend.complete(prompt, &options).await {
            Ok(text) => Some(text),
            Err(e) => {
                log::warn!("Summary call failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::testing::ScriptedGenerator;

    /// Prompts that expose their input so tests can read back the partition.
    struct EchoPrompts;

    impl PromptFamily for EchoPrompts {
        fn single(&self, items: &[String]) -> String {
            format!("SINGLE:{}", items.join("|"))
        }

        fn chunk(&self, items: &[String]) -> String {
            format!("CHUNK:{}", items.join("|"))
        }

        fn merge(&self, partials: &[String]) -> String {
            format!("MERGE:{}", partials.join("|"))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(usize, usize)>>);

    #[async_trait]
    impl ChunkObserver for Recorder {
        async fn chunk_done(&self, done: usize, total: usize) {
            self.0.lock().push((done, total));
        }
    }

    fn items(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("m{}", i)).collect()
    }

    fn summarizer(backend: Arc<ScriptedGenerator>) -> HierarchicalSummarizer {
        HierarchicalSummarizer::new(backend, CompletionOptions::default(), SummarizerConfig::default())
    }

    #[test]
    fn test_split_balanced() {
        let data: Vec<u32> = (0..11).collect();
        let chunks = split_balanced(&data, 3);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![4, 4, 3]);
        assert_eq!(chunks.concat(), data);

        assert_eq!(split_balanced(&data[..2], 5).len(), 2);
        assert!(split_balanced::<u32>(&[], 3).is_empty());
    }

    #[test]
    fn test_chunk_count_rules() {
        let ample = Duration::from_secs(120);
        let tight = Duration::from_secs(45);
        let floor = Duration::from_secs(60);
        assert_eq!(chunk_count(4, 50, ample, floor), 4);
        assert_eq!(chunk_count(4, 50, tight, floor), 2);
        assert_eq!(chunk_count(1, 50, ample, floor), 2);
        assert_eq!(chunk_count(8, 3, ample, floor), 3);
    }

    #[tokio::test]
    async fn test_small_input_single_call() {
        let backend = Arc::new(ScriptedGenerator::fixed("summary"));
        let s = summarizer(backend.clone());
        let out = s
            .summarize(&EchoPrompts, &items(10), Duration::from_secs(120), 192, 3, None)
            .await;
        assert_eq!(out.text, "summary");
        assert_eq!(out.chunks, 0);
        assert_eq!(backend.call_count(), 1);
        assert!(backend.prompts()[0].starts_with("SINGLE:"));
    }

    #[tokio::test]
    async fn test_low_budget_single_call() {
        let backend = Arc::new(ScriptedGenerator::fixed("summary"));
        let s = summarizer(backend.clone());
        s.summarize(&EchoPrompts, &items(40), Duration::from_secs(20), 192, 3, None)
            .await;
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_hierarchical_partition_and_merge_order() {
        let backend = Arc::new(ScriptedGenerator::new(|prompt, _| {
            Ok(match prompt.strip_prefix("CHUNK:") {
                Some(body) => format!("P[{}]", body.split('|').next().unwrap_or("")),
                None => "merged".to_string(),
            })
        }));
        let s = summarizer(backend.clone());
        let input = items(11);
        let recorder = Recorder::default();
        let out = s
            .summarize(&EchoPrompts, &input, Duration::from_secs(120), 192, 3, Some(&recorder))
            .await;

        assert_eq!(out.text, "merged");
        assert_eq!(out.chunks, 3);
        assert_eq!(backend.call_count(), 4);

        let prompts = backend.prompts();
        let mut sizes: Vec<usize> = prompts
            .iter()
            .filter_map(|p| p.strip_prefix("CHUNK:"))
            .map(|b| b.split('|').count())
            .collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![3, 4, 4]);
        let mut rebuilt: Vec<String> = prompts
            .iter()
            .filter_map(|p| p.strip_prefix("CHUNK:"))
            .flat_map(|b| b.split('|').map(str::to_string))
            .collect();
        rebuilt.sort_by_key(|m| m[1..].parse::<usize>().unwrap_or(0));
        assert_eq!(rebuilt, input);

        assert_eq!(prompts.last().unwrap(), "MERGE:P[m0]|P[m4]|P[m8]");
        assert_eq!(recorder.0.lock().clone(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn test_chunk_caps_respect_token_budget() {
        let backend = Arc::new(ScriptedGenerator::fixed("x"));
        let s = summarizer(backend.clone());
        s.summarize(&EchoPrompts, &items(20), Duration::from_secs(120), 80, 2, None)
            .await;
        let caps: Vec<u32> = backend.calls().iter().map(|c| c.max_tokens).collect();
        assert_eq!(caps, vec![80, 80, 80]);

        let backend = Arc::new(ScriptedGenerator::fixed("x"));
        let s = summarizer(backend.clone());
        s.summarize(&EchoPrompts, &items(20), Duration::from_secs(45), 192, 3, None)
            .await;
        let caps: Vec<u32> = backend.calls().iter().map(|c| c.max_tokens).collect();
        assert_eq!(caps, vec![64, 64, 192]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_cap_drops_once_budget_runs_low() {
        let backend = Arc::new(ScriptedGenerator::fixed("x").with_delay(Duration::from_secs(2)));
        let config = SummarizerConfig {
            chunk_parallelism: 1,
            ..SummarizerConfig::default()
        };
        let s = HierarchicalSummarizer::new(backend.clone(), CompletionOptions::default(), config);
        let out = s
            .summarize(&EchoPrompts, &items(20), Duration::from_secs(61), 192, 2, None)
            .await;
        assert_eq!(out.chunks, 2);
        let caps: Vec<u32> = backend.calls().iter().map(|c| c.max_tokens).collect();
        assert_eq!(caps, vec![96, 64, 192]);
    }

    #[tokio::test]
    async fn test_failed_chunk_contributes_empty() {
        let backend = Arc::new(ScriptedGenerator::new(|prompt, _| {
            if prompt.starts_with("CHUNK:m0") {
                Err(crate::utilities::errors::BackendError::unavailable("boom"))
            } else if prompt.starts_with("CHUNK:") {
                Ok("ok".to_string())
            } else {
                Ok(prompt.to_string())
            }
        }));
        let s = summarizer(backend);
        let out = s
            .summarize(&EchoPrompts, &items(12), Duration::from_secs(120), 192, 2, None)
            .await;
        assert_eq!(out.text, "MERGE:|ok");
        assert_eq!(out.failed_calls, 1);
    }

    #[tokio::test]
    async fn test_merge_failure_joins_partials() {
        let backend = Arc::new(ScriptedGenerator::new(|prompt, _| {
            if prompt.starts_with("MERGE:") {
                Err(crate::utilities::errors::BackendError::unavailable("boom"))
            } else {
                Ok(format!("part {}", &prompt[6..8]))
            }
        }));
        let s = summarizer(backend);
        let out = s
            .summarize(&EchoPrompts, &items(12), Duration::from_secs(120), 192, 2, None)
            .await;
        assert_eq!(out.text, "part m0\npart m6");
    }

    #[tokio::test]
    async fn test_max_items_per_call_keeps_newest() {
        let backend = Arc::new(ScriptedGenerator::fixed("x"));
        let config = SummarizerConfig {
            max_items_per_call: 3,
            ..SummarizerConfig::default()
        };
        let s = HierarchicalSummarizer::new(backend.clone(), CompletionOptions::default(), config);
        let out = s
            .summarize(&EchoPrompts, &items(8), Duration::from_secs(120), 192, 3, None)
            .await;
        assert_eq!(out.items_used, 3);
        assert_eq!(backend.prompts()[0], "SINGLE:m5|m6|m7");
    }

    #[tokio::test]
    async fn test_chunk_parallelism_is_bounded() {
        let backend = Arc::new(ScriptedGenerator::fixed("x").with_delay(Duration::from_millis(20)));
        let s = summarizer(backend.clone());
        s.summarize(&EchoPrompts, &items(30), Duration::from_secs(120), 192, 5, None)
            .await;
        assert_eq!(backend.call_count(), 6);
        assert!(backend.max_in_flight() <= 2);
    }
}

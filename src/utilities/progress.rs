//! Text progress bars for long-running persona jobs.

use async_trait::async_trait;

/// Render a progress bar such as `[##########----------] 50%`.
///
/// `percent` is clamped to `0..=100`.
pub fn bar(percent: i64, width: usize) -> String {
    let pct = percent.clamp(0, 100) as usize;
    let filled = pct * width / 100;
    format!(
        "[{}{}] {}%",
        "#".repeat(filled),
        "-".repeat(width - filled),
        pct
    )
}

/// Default-width bar.
pub fn default_bar(percent: i64) -> String {
    bar(percent, 20)
}

/// Receives human-readable progress updates from background jobs.
///
/// Implementations usually edit a status message in the conversation channel.
/// Failures are the sink's problem; jobs never stop because a progress
/// update could not be shown.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, message: &str);
}

/// A sink that only logs.
#[derive(Debug, Default, Clone)]
pub struct LogProgress;

#[async_trait]
impl ProgressSink for LogProgress {
    async fn report(&self, message: &str) {
        log::info!("{}", message);
    }
}

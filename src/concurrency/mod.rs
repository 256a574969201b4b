//! Bounds access to the generation backend.
//!
//! A global counting semaphore caps simultaneous generations across the
//! process; an optional per-channel mutex serializes requests within one
//! conversation channel. Acquisition order is global then channel; a
//! [`SpeakPermit`] releases in reverse order when dropped, on every exit path.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};

use crate::config::ConcurrencySettings;
use crate::utilities::errors::GuardError;

#[derive(Debug)]
pub struct ConcurrencyGuard {
    global: Arc<Semaphore>,
    limit: usize,
    channel_exclusive: bool,
    acquire_timeout: Option<Duration>,
    // Lazily filled, never evicted.
    channels: DashMap<String, Arc<Mutex<()>>>,
}

/// Held for the duration of one generation.
///
/// Field order is drop order: the channel lock goes first, then the global
/// permit.
#[derive(Debug)]
pub struct SpeakPermit {
    channel: Option<OwnedMutexGuard<()>>,
    _global: OwnedSemaphorePermit,
}

impl SpeakPermit {
    /// Release the channel lock early. Calling it again is a no-op.
    pub fn release_channel(&mut self) {
        self.channel.take();
    }

    pub fn holds_channel(&self) -> bool {
        self.channel.is_some()
    }
}

impl ConcurrencyGuard {
    pub fn new(global_limit: usize, channel_exclusive: bool, acquire_timeout: Option<Duration>) -> Self {
        let limit = global_limit.max(1);
        Self {
            global: Arc::new(Semaphore::new(limit)),
            limit,
            channel_exclusive,
            acquire_timeout,
            channels: DashMap::new(),
        }
    }

    pub fn from_settings(settings: &ConcurrencySettings) -> Self {
        Self::new(
            settings.global_limit,
            settings.channel_exclusive,
            settings.acquire_timeout_ms.map(Duration::from_millis),
        )
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.global.available_permits()
    }

    fn channel_lock(&self, channel: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.channels
                .entry(channel.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Wait for a generation slot.
    ///
    /// `channel` is ignored when channel exclusivity is off. With a timeout
    /// configured, an expired wait gives [`GuardError::Timeout`] and holds
    /// nothing.
    pub async fn acquire(&self, channel: Option<&str>) -> Result<SpeakPermit, GuardError> {
        let lock = channel
            .filter(|_| self.channel_exclusive)
            .map(|c| self.channel_lock(c));
        let global = Arc::clone(&self.global);

        let wait = async move {
            let permit = global.acquire_owned().await.map_err(|_| GuardError::Closed)?;
            let channel = match lock {
                Some(lock) => Some(lock.lock_owned().await),
                None => None,
            };
            Ok(SpeakPermit {
                channel,
                _global: permit,
            })
        };

        match self.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                let channel = channel.unwrap_or("-").to_string();
                log::warn!("Generation slot wait timed out for channel {}", channel);
                GuardError::Timeout { channel }
            })?,
            None => wait.await,
        }
    }

    /// Stop handing out permits; pending and future waits fail with
    /// [`GuardError::Closed`].
    pub fn close(&self) {
        self.global.close();
    }
}

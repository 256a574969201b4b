//! Image caption cache keyed by URL, with a time-to-live.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::storage::json_store;
use crate::utilities::errors::StoreError;
use crate::utilities::paths::caption_cache_file;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionCacheEntry {
    pub caption: String,
    /// Unix seconds when the caption was stored.
    pub ts: i64,
}

/// Cache key for an image URL.
///
/// Signed CDN URLs are long and carry query tokens; the document stores a
/// digest instead.
pub fn cache_key(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.as_bytes()))
}

#[derive(Debug)]
pub struct CaptionCache {
    path: PathBuf,
    ttl_secs: i64,
    lock: Mutex<()>,
}

impl CaptionCache {
    pub fn new(data_dir: &std::path::Path, ttl_secs: i64) -> Self {
        Self {
            path: caption_cache_file(data_dir),
            ttl_secs,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> HashMap<String, CaptionCacheEntry> {
        match json_store::read_json(&self.path).await {
            Ok(map) => map.unwrap_or_default(),
            Err(e) => {
                log::info!("Caption cache unreadable, starting empty: {}", e);
                HashMap::new()
            }
        }
    }

    fn fresh(&self, entry: &CaptionCacheEntry, now: i64) -> bool {
        now - entry.ts <= self.ttl_secs
    }

    /// Cached caption for `url` if present and not expired.
    pub async fn get(&self, url: &str) -> Option<String> {
        let now = Utc::now().timestamp();
        self.load()
            .await
            .remove(&cache_key(url))
            .filter(|e| self.fresh(e, now) && !e.caption.is_empty())
            .map(|e| e.caption)
    }

    pub async fn set(&self, url: &str, caption: &str) -> Result<(), StoreError> {
        self.set_at(url, caption, Utc::now().timestamp()).await
    }

    async fn set_at(&self, url: &str, caption: &str, ts: i64) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut map = self.load().await;
        map.insert(
            cache_key(url),
            CaptionCacheEntry {
                caption: caption.to_string(),
                ts,
            },
        );
        json_store::write_json(&self.path, &map).await
    }

    /// Drop expired entries; returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().await;
        let now = Utc::now().timestamp();
        let mut map = self.load().await;
        let before = map.len();
        map.retain(|_, e| self.fresh(e, now));
        let removed = before - map.len();
        if removed > 0 {
            json_store::write_json(&self.path, &map).await?;
            log::debug!("Purged {} expired captions", removed);
        }
        Ok(removed)
    }
}

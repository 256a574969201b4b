//! Channel → active persona map, persisted as one JSON document.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::sync::Mutex;

use crate::storage::json_store;
use crate::utilities::errors::StoreError;
use crate::utilities::paths::bindings_file;

/// Reads go to disk every time so external edits are honoured; writes are
/// serialized through a lock around the read-modify-write.
#[derive(Debug)]
pub struct BindingStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl BindingStore {
    pub fn new(data_dir: &std::path::Path) -> Self {
        Self {
            path: bindings_file(data_dir),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(json_store::read_json(&self.path).await?.unwrap_or_default())
    }

    /// Persona bound to `channel`, if any.
    pub async fn active(&self, channel: &str) -> Result<Option<String>, StoreError> {
        Ok(self.all().await?.remove(channel))
    }

    pub async fn bind(&self, channel: &str, persona_id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.all().await?;
        map.insert(channel.to_string(), persona_id.to_string());
        json_store::write_json(&self.path, &map).await
    }

    pub async fn unbind(&self, channel: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.all().await?;
        if map.remove(channel).is_none() {
            return Ok(false);
        }
        json_store::write_json(&self.path, &map).await?;
        Ok(true)
    }
}

//! One JSON document per persona under `<data>/personas/`.

use std::io::ErrorKind;
use std::path::PathBuf;

use crate::persona::profile::PersonaProfile;
use crate::storage::json_store;
use crate::utilities::errors::StoreError;
use crate::utilities::paths::persona_dir;
use crate::utilities::string_utils::sanitize_id;

#[derive(Debug, Clone)]
pub struct PersonaStore {
    dir: PathBuf,
}

impl PersonaStore {
    pub fn new(data_dir: &std::path::Path) -> Self {
        Self {
            dir: persona_dir(data_dir),
        }
    }

    /// Document path for `persona_id`; rejects ids that are not safe file stems.
    pub fn path(&self, persona_id: &str) -> Result<PathBuf, StoreError> {
        let safe = sanitize_id(persona_id);
        if safe.is_empty() || safe != persona_id {
            return Err(StoreError::InvalidId {
                id: persona_id.to_string(),
            });
        }
        Ok(self.dir.join(format!("{}.json", safe)))
    }

    pub async fn load(&self, persona_id: &str) -> Result<Option<PersonaProfile>, StoreError> {
        json_store::read_json(&self.path(persona_id)?).await
    }

    pub async fn save(&self, profile: &PersonaProfile) -> Result<(), StoreError> {
        json_store::write_json(&self.path(&profile.persona_id)?, profile).await
    }

    pub async fn exists(&self, persona_id: &str) -> Result<bool, StoreError> {
        Ok(tokio::fs::try_exists(self.path(persona_id)?).await?)
    }

    pub async fn delete(&self, persona_id: &str) -> Result<bool, StoreError> {
        json_store::remove(&self.path(persona_id)?).await
    }

    /// Ids of all stored personas, sorted.
    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

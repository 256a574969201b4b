//! Path management for voiceprint storage.
//!
//! Everything lives under one data directory:
//!
//! ```text
//! <data>/personas/<id>.json
//! <data>/indexes/<id>.idx.vec
//! <data>/indexes/<id>.idx.texts.json
//! <data>/active_persona.json
//! <data>/caption_cache.json
//! ```

use std::env;
use std::path::{Path, PathBuf};

use crate::utilities::string_utils::sanitize_id;

/// Default data directory when none is configured.
///
/// Uses `VOICEPRINT_DATA_DIR` if set, otherwise the platform data directory
/// (`~/.local/share/voiceprint` on Linux, `~/Library/Application Support/voiceprint`
/// on macOS, `%LOCALAPPDATA%\voiceprint` on Windows).
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = env::var("VOICEPRINT_DATA_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    if cfg!(target_os = "macos") {
        let home = env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home)
            .join("Library")
            .join("Application Support")
            .join("voiceprint")
    } else if cfg!(target_os = "windows") {
        let local_app_data = env::var("LOCALAPPDATA")
            .unwrap_or_else(|_| env::var("APPDATA").unwrap_or_else(|_| "C:\\tmp".to_string()));
        PathBuf::from(local_app_data).join("voiceprint")
    } else {
        let home = env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("voiceprint")
    }
}

/// Directory holding persona profile documents.
pub fn persona_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("personas")
}

/// Directory holding vector index artifacts.
pub fn index_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("indexes")
}

/// Base path (without artifact suffix) of a persona's index.
pub fn index_base(data_dir: &Path, persona_id: &str) -> PathBuf {
    index_dir(data_dir).join(format!("{}.idx", sanitize_id(persona_id)))
}

/// Channel → persona binding document.
pub fn bindings_file(data_dir: &Path) -> PathBuf {
    data_dir.join("active_persona.json")
}

/// Image caption cache document.
pub fn caption_cache_file(data_dir: &Path) -> PathBuf {
    data_dir.join("caption_cache.json")
}

/// Append a suffix to the final path component (`a/b.idx` + `.vec` → `a/b.idx.vec`).
pub fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_base_layout() {
        let data = Path::new("/data");
        assert_eq!(index_base(data, "42"), PathBuf::from("/data/indexes/42.idx"));
        assert_eq!(
            with_suffix(&index_base(data, "42"), ".texts.json"),
            PathBuf::from("/data/indexes/42.idx.texts.json")
        );
    }

    #[test]
    fn test_index_base_sanitizes() {
        let data = Path::new("/data");
        assert_eq!(
            index_base(data, "../evil"),
            PathBuf::from("/data/indexes/evil.idx")
        );
    }
}

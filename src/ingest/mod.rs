//! Corpus input and the ingestion jobs built on it.

pub mod enrichment;
pub mod preprocess;

use serde::{Deserialize, Serialize};

/// An image shared by the persona's author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageItem {
    pub url: String,
    /// Message text posted alongside the image, used as caption context.
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl ImageItem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            hint: None,
            filename: None,
        }
    }

    pub fn hint_text(&self) -> &str {
        self.hint.as_deref().unwrap_or("")
    }
}

/// Raw material for a persona: ordered messages (oldest first) and images.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    #[serde(default)]
    pub texts: Vec<String>,
    #[serde(default)]
    pub images: Vec<ImageItem>,
}

impl Corpus {
    pub fn new(texts: Vec<String>) -> Self {
        Self {
            texts,
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<ImageItem>) -> Self {
        self.images = images;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.texts.iter().all(|t| t.trim().is_empty()) && self.images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corpus_emptiness() {
        assert!(Corpus::default().is_empty());
        assert!(Corpus::new(vec!["  ".into()]).is_empty());
        assert!(!Corpus::new(vec![]).with_images(vec![ImageItem::new("http://x/a.png")]).is_empty());
    }

    #[test]
    fn test_corpus_deserializes_sparse_json() {
        let corpus: Corpus =
            serde_json::from_str(r#"{"images":[{"url":"http://x/a.png"}]}"#).unwrap();
        assert!(corpus.texts.is_empty());
        assert_eq!(corpus.images[0].hint_text(), "");
    }
}

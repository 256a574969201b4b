//! Local embedding functions.
//!
//! [`HashEmbedder`] is a feature-hashing bag-of-words embedder: every token
//! is hashed (SHA-256) into one of `dim` signed buckets. It needs no model
//! server, is fully deterministic, and identical texts always produce
//! identical vectors, which makes it the embedder of choice for tests and
//! for running without an embedding model (`EMBED_MODEL_NAME=hash`).

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::llms::base_llm::EmbeddingBackend;
use crate::utilities::errors::BackendError;

pub const DEFAULT_HASH_DIM: usize = 256;

/// Model name that selects [`HashEmbedder`] instead of a remote model.
pub const HASH_EMBED_MODEL: &str = "hash";

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Embed one text. Never returns an all-zero vector.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let mut tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            tokens.push(lowered.as_str());
        }

        let mut vector = vec![0.0f32; self.dim];
        for token in tokens {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dim as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        if vector.iter().all(|x| *x == 0.0) {
            // opposite-signed collisions cancelled out
            vector[0] = 1.0;
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIM)
    }
}

#[async_trait]
impl EmbeddingBackend for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

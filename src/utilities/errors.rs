//! Error types for voiceprint.
//!
//! One `thiserror` enum per layer, aggregated into [`Error`]. The taxonomy
//! distinguishes recoverable backend trouble (fallback text or skip) from
//! index invariant violations, which are programming errors fatal to the
//! single call that hit them.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the generation, embedding and vision backends.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Network failure, timeout or non-success status from the backend.
    #[error("Backend unavailable: {message}")]
    Unavailable { message: String },

    /// The backend answered but the payload could not be used.
    #[error("Backend returned an invalid response: {message}")]
    InvalidResponse { message: String },
}

impl BackendError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::invalid(err.to_string())
        } else {
            Self::unavailable(err.to_string())
        }
    }
}

/// Errors from the vector index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A vector's width does not match the index dimensionality.
    #[error("Dimension mismatch: index has dim {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// Vector and text batches have different lengths.
    #[error("Length mismatch: {vectors} vectors for {texts} texts")]
    LengthMismatch { vectors: usize, texts: usize },

    /// The persisted artifacts exist but cannot be decoded.
    #[error("Corrupt index at {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Errors from the concurrency guard.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The channel lock (or global permit) was not obtained in time.
    #[error("Timed out waiting for generation slot in channel {channel}")]
    Timeout { channel: String },

    /// The global semaphore was closed during shutdown.
    #[error("Generation guard closed")]
    Closed,
}

/// Errors from the JSON document stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Identifier would escape the storage directory.
    #[error("Invalid identifier: {id:?}")]
    InvalidId { id: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Errors from retriever operations.
#[derive(Debug, Error)]
pub enum RetrieverError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The embedding backend returned the wrong number of vectors.
    #[error("Embedding backend returned {found} vectors for {expected} texts")]
    EmbeddingCount { expected: usize, found: usize },

    /// A blocking persistence task panicked or was cancelled.
    #[error("Persistence task failed: {0}")]
    Task(String),
}

/// The delivery collaborator could not post or edit a message.
#[derive(Debug, Error)]
#[error("Delivery failed: {message}")]
pub struct DeliveryError {
    pub message: String,
}

impl DeliveryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// User-facing failures of a speak request.
///
/// Backend trouble never shows up here: the pipeline turns it into fallback
/// text. These are the conditions that prevent a request from starting.
#[derive(Debug, Error)]
pub enum SpeakError {
    #[error("No active persona here. Switch to a persona first.")]
    NoActivePersona,

    #[error("Active persona data missing for {persona_id}. Re-create it.")]
    PersonaMissing { persona_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Retriever(#[from] RetrieverError),

    #[error(transparent)]
    Speak(#[from] SpeakError),

    /// A persona operation referenced an unknown persona.
    #[error("Persona not found: {persona_id}")]
    PersonaNotFound { persona_id: String },

    /// Nothing usable was supplied for ingestion.
    #[error("No content found for {persona_id}")]
    EmptyCorpus { persona_id: String },
}

impl Error {
    /// Whether the failure is transient and a caller may retry or degrade.
    ///
    /// Backend unavailability and guard timeouts are recoverable; index
    /// invariant violations and corrupt state are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Backend(_) | Error::Guard(GuardError::Timeout { .. }) => true,
            Error::Retriever(RetrieverError::Backend(_)) => true,
            _ => false,
        }
    }
}

/// Crate result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Model backends.
//!
//! - [`base_llm`] - generation, embedding and vision contracts
//! - [`streaming`] - stream events and the partial-output coalescer
//! - [`providers`] - concrete backends (Ollama-compatible HTTP)

pub mod base_llm;
pub mod providers;
pub mod streaming;

pub use base_llm::{CompletionOptions, EmbeddingBackend, GenerationBackend, VisionBackend};
pub use streaming::{StreamCoalescer, StreamEvent};

//! # voiceprint
//!
//! Persona style profiling and in-voice replies.
//!
//! A persona is built from a user's message history: closed-form style
//! traits, an LLM-written style guide and a vector index of representative
//! messages. Replies are generated in that voice, grounded in retrieved
//! snippets, under a global concurrency limit with per-channel exclusion,
//! optionally streamed as coalesced partial edits.

pub mod concurrency;
pub mod config;
pub mod ingest;
pub mod llms;
pub mod persona;
pub mod pipeline;
pub mod rag;
pub mod server;
pub mod service;
pub mod storage;
pub mod summarize;
pub mod utilities;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Settings;
pub use persona::profile::PersonaProfile;
pub use pipeline::speak::{SpeakOutcome, SpeakPipeline};
pub use rag::retriever::Retriever;
pub use service::PersonaService;
pub use utilities::errors::{Error, Result};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

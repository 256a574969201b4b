//! Retrieval: the persisted vector index, local embedders and the
//! per-persona retriever.

pub mod embeddings;
pub mod index;
pub mod retriever;
pub mod types;

pub use index::{IndexBackend, VectorIndex};
pub use retriever::{Retriever, RetrieverRegistry};
pub use types::{l2_normalize, Embeddings, ScoredText};

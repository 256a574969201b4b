//! JSON-file persistence: persona profiles, channel bindings and the image
//! caption cache.

pub mod bindings;
pub mod caption_cache;
pub mod json_store;
pub mod personas;

pub use bindings::BindingStore;
pub use caption_cache::{CaptionCache, CaptionCacheEntry};
pub use personas::PersonaStore;

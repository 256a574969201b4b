//! Persona model: trait extraction, the stored profile and prompt builders.
//!
//! ```text
//! corpus ──StyleExtractor──▶ StyleFeatures { basic, rich }
//!                                 │
//!                                 ▼
//!                  PersonaProfile (versioned JSON document)
//!                                 │
//!                       prompts::speak_prompt
//! ```

pub mod lexicon;
pub mod profile;
pub mod prompts;
pub mod style;

pub use lexicon::Lexicons;
pub use profile::{PersonaProfile, ProfileUpdate};
pub use style::{BasicTraits, RichTraits, StyleExtractor, StyleFeatures, StyleThresholds};

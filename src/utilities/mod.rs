//! Shared helpers: error types, paths, string handling and progress bars.

pub mod errors;
pub mod paths;
pub mod progress;
pub mod string_utils;

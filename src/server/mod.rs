//! HTTP server exposing the persona service.
//!
//! # Endpoints
//!
//! - `GET  /health` — Liveness check
//! - `/personas/...` — create, update, summarize, list, load, erase
//! - `/channels/...` — switch, speak (blocking or SSE), mention

pub mod routes;

pub use routes::{app_router, ApiError, AppState};

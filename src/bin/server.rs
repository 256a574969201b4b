//! voiceprint HTTP server binary.
//!
//! # Environment Variables
//!
//! - `PORT` — HTTP port (default: 8080)
//! - `VOICEPRINT_CONFIG` — optional YAML settings file
//! - `VOICEPRINT_DATA_DIR` — persona, index and cache storage
//! - `EMBED_MODEL_NAME=hash` — embed locally instead of calling the model server
//! - `RUST_LOG` — Tracing filter (default: "info,voiceprint=debug")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin server
//! ```

use std::sync::Arc;

use anyhow::Context;

use voiceprint::config::Settings;
use voiceprint::llms::base_llm::EmbeddingBackend;
use voiceprint::llms::providers::ollama::{OllamaClient, OllamaConfig};
use voiceprint::rag::embeddings::{HashEmbedder, HASH_EMBED_MODEL};
use voiceprint::server::{app_router, AppState};
use voiceprint::service::PersonaService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,voiceprint=debug".into()),
        )
        .init();

    let settings = Settings::load();
    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let bind_addr = format!("0.0.0.0:{}", port);

    let client = Arc::new(
        OllamaClient::new(OllamaConfig::from(&settings.backend)).context("building backend client")?,
    );
    let embedder: Arc<dyn EmbeddingBackend> = if settings.backend.embed_model_name == HASH_EMBED_MODEL {
        tracing::info!("Using local hash embeddings");
        Arc::new(HashEmbedder::default())
    } else {
        client.clone()
    };

    tracing::info!(
        data_dir = %settings.storage.data_dir.display(),
        text_model = %settings.backend.text_model_name,
        "loaded settings"
    );
    let service = PersonaService::new(settings, client.clone(), embedder, client);
    let app = app_router(AppState::new(service));

    tracing::info!("voiceprint server starting on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;

    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}

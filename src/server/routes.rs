//! Axum route handlers for the voiceprint HTTP server.
//!
//! # Routes
//!
//! - `GET    /health`                        — Liveness check
//! - `GET    /personas`                      — List persona ids
//! - `GET    /personas/:id`                  — Load a profile
//! - `DELETE /personas/:id`                  — Erase profile and index
//! - `POST   /personas/:id/create`           — Create (202, enrichment continues)
//! - `POST   /personas/:id/update`           — Incremental update
//! - `POST   /personas/:id/summarize`        — Content summary of messages
//! - `PUT    /channels/:channel/persona`     — Bind the active persona
//! - `POST   /channels/:channel/speak`       — Blocking in-voice reply
//! - `POST   /channels/:channel/speak/stream`— SSE of partial replies
//! - `POST   /channels/:channel/mention`     — Conversational reply in bursts

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post, put},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::ingest::{Corpus, ImageItem};
use crate::pipeline::delivery::CollectingDelivery;
use crate::service::PersonaService;
use crate::utilities::errors::{Error, GuardError, SpeakError, StoreError};
use crate::utilities::progress::LogProgress;

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PersonaService>,
}

impl AppState {
    pub fn new(service: PersonaService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/personas", get(list_handler))
        .route("/personas/:id", get(load_handler).delete(erase_handler))
        .route("/personas/:id/create", post(create_handler))
        .route("/personas/:id/update", post(update_handler))
        .route("/personas/:id/summarize", post(summarize_handler))
        .route("/channels/:channel/persona", put(switch_handler))
        .route("/channels/:channel/speak", post(speak_handler))
        .route("/channels/:channel/speak/stream", post(speak_stream_handler))
        .route("/channels/:channel/mention", post(mention_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Maps service errors onto `{"error": ...}` bodies.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::PersonaNotFound { .. } | Error::Speak(SpeakError::PersonaMissing { .. }) => StatusCode::NOT_FOUND,
            Error::Speak(SpeakError::NoActivePersona) => StatusCode::CONFLICT,
            Error::EmptyCorpus { .. }
            | Error::Store(StoreError::InvalidId { .. })
            | Error::Speak(SpeakError::Store(StoreError::InvalidId { .. })) => StatusCode::BAD_REQUEST,
            Error::Guard(GuardError::Timeout { .. }) => StatusCode::TOO_MANY_REQUESTS,
            Error::Guard(GuardError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request rejected");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct IngestBody {
    pub username: String,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub images: Vec<ImageItem>,
}

impl IngestBody {
    fn into_corpus(self) -> (String, Corpus) {
        (self.username, Corpus::new(self.messages).with_images(self.images))
    }
}

#[derive(Debug, Deserialize)]
pub struct SummarizeBody {
    pub username: String,
    pub messages: Vec<String>,
    /// Number of trailing messages to summarize; 0 means all.
    #[serde(default)]
    pub last: usize,
    #[serde(default)]
    pub images: Vec<ImageItem>,
}

#[derive(Debug, Deserialize)]
pub struct SwitchBody {
    pub persona_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SpeakBody {
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct MentionBody {
    pub message: String,
}

/// GET /health — liveness check.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "voiceprint",
        "generation_slots": state.service.guard().available(),
    }))
}

async fn list_handler(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let personas = state.service.list().await?;
    Ok(Json(json!({ "personas": personas })))
}

async fn load_handler(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let profile = state
        .service
        .load(&id)
        .await?
        .ok_or(Error::PersonaNotFound { persona_id: id })?;
    Ok(Json(json!(profile)))
}

async fn erase_handler(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let removed = state.service.erase(&id).await?;
    Ok(Json(json!({ "persona_id": id, "removed": removed })))
}

/// POST /personas/:id/create — answers once the v1 profile is written.
async fn create_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IngestBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let job_id = Uuid::new_v4();
    let (username, corpus) = body.into_corpus();
    let (ack, handle) = state
        .service
        .create(&id, &username, corpus, Arc::new(LogProgress))
        .await?;
    tracing::info!(%job_id, persona = %id, "enrichment job started");
    tokio::spawn(async move {
        match handle.await {
            Ok(Some(report)) => tracing::info!(%job_id, indexed = report.indexed, "enrichment job finished"),
            Ok(None) => tracing::warn!(%job_id, "enrichment job failed"),
            Err(e) => tracing::error!(%job_id, error = %e, "enrichment job aborted"),
        }
    });
    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id, "ack": ack }))))
}

async fn update_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IngestBody>,
) -> ApiResult<Json<Value>> {
    let (username, corpus) = body.into_corpus();
    let report = state.service.update(&id, &username, corpus).await?;
    Ok(Json(json!({
        "persona_id": id,
        "version": report.version,
        "texts": report.texts,
        "captions": report.captions,
        "indexed": report.indexed,
    })))
}

async fn summarize_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SummarizeBody>,
) -> ApiResult<Json<Value>> {
    let report = state
        .service
        .summarize(&body.username, &body.messages, body.last, &body.images, &LogProgress)
        .await?;
    Ok(Json(json!({
        "persona_id": id,
        "summary": report.summary,
        "requested": report.requested,
        "included": report.included,
        "captions": report.captions,
    })))
}

async fn switch_handler(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Json(body): Json<SwitchBody>,
) -> ApiResult<Json<Value>> {
    let profile = state.service.switch(&channel, &body.persona_id).await?;
    Ok(Json(json!({
        "channel": channel,
        "persona_id": profile.persona_id,
        "username": profile.username,
    })))
}

/// POST /channels/:channel/speak — blocking reply.
async fn speak_handler(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Json(body): Json<SpeakBody>,
) -> ApiResult<Json<Value>> {
    let delivery = CollectingDelivery::new();
    let outcome = state
        .service
        .speak(&channel, &body.query, false, &delivery)
        .await?;
    Ok(Json(json!(outcome)))
}

/// POST /channels/:channel/speak/stream — `partial` events with the text so
/// far, then one `done` (or `error`) event.
async fn speak_stream_handler(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Json(body): Json<SpeakBody>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.service.speak_stream(&channel, &body.query);
    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let sse = match Event::default().json_data(&event) {
            Ok(sse) => sse,
            Err(e) => Event::default().event("error").data(e.to_string()),
        };
        Some((Ok(sse), rx))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn mention_handler(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Json(body): Json<MentionBody>,
) -> ApiResult<Json<Value>> {
    let delivery = CollectingDelivery::new();
    match state.service.mention(&channel, &body.message, &delivery).await? {
        Some(outcome) => Ok(Json(json!({
            "replied": true,
            "parts": outcome.parts,
            "fallback": outcome.fallback,
            "regenerated": outcome.regenerated,
        }))),
        None => Ok(Json(json!({ "replied": false, "parts": [] }))),
    }
}

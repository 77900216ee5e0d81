use crate::config::Config;
use crate::frame::{encode_frames, CONTENT_TYPE};
use crate::generator::{Generator, SimulatedGenerator};
use crate::renderer::render_once;
use crate::session::Session;
use crate::sink::live_tree;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use genui_evaluator::ReferenceCatalog;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Shared by every request
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<ReferenceCatalog>,
    pub generator: Arc<dyn Generator>,
    pub channel_capacity: usize,
}

impl AppState {
    pub fn new(catalog: ReferenceCatalog, generator: Arc<dyn Generator>) -> Self {
        Self {
            catalog: Arc::new(catalog),
            generator,
            channel_capacity: 16,
        }
    }

    /// State backed by the simulated generator described in `config`
    pub fn from_config(config: &Config) -> Self {
        let generator = SimulatedGenerator::demo(config.generator.chunks, config.generator.delay());
        Self {
            catalog: Arc::new(config.catalog()),
            generator: Arc::new(generator),
            channel_capacity: config.channel_capacity,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/rsc", get(rsc_handler))
        .route("/api/render", post(render_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

#[derive(Debug, Deserialize)]
struct RscQuery {
    p: Option<String>,
}

/// Start a generation for the prompt and stream its frames as they render
async fn rsc_handler(State(state): State<AppState>, Query(query): Query<RscQuery>) -> Response {
    let prompt = match query.p {
        Some(prompt) if !prompt.is_empty() => prompt,
        _ => return StatusCode::BAD_REQUEST.into_response(),
    };

    info!(prompt_len = prompt.len(), "Starting generation");

    let (sink, stream) = live_tree(state.channel_capacity);
    let input = state.generator.generate(&prompt);
    let session = Session::new(state.catalog.clone());
    tokio::spawn(session.run(input, sink));

    Response::builder()
        .header(header::CONTENT_TYPE, CONTENT_TYPE)
        .body(Body::from_stream(encode_frames(stream)))
        .unwrap_or_else(|error| {
            warn!(%error, "Failed to build stream response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

/// Render complete markup in one pass
async fn render_handler(State(state): State<AppState>, markup: String) -> Response {
    match render_once(&markup, &state.catalog) {
        Ok(payload) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], payload).into_response(),
        Err(error) => (StatusCode::UNPROCESSABLE_ENTITY, error.to_string()).into_response(),
    }
}

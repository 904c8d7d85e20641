//! HTTP server for the TTS cache
//!
//! Provides /, /health, /synthesize, /cache/stats, /cache, and /cleanup.

use artifact_cache::{ArtifactCache, CacheError, CacheStats, Fingerprint};
use axum::{
    extract::State,
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Shared state for the HTTP server
pub struct ServerState {
    pub cache: ArtifactCache,
    pub content_type: String,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(cache: ArtifactCache, content_type: impl Into<String>) -> Self {
        Self {
            cache,
            content_type: content_type.into(),
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Synthesis request body
#[derive(Deserialize)]
pub struct SynthesizeRequest {
    text: String,
    #[serde(default = "default_language")]
    language: String,
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Serialize)]
struct ServiceInfo {
    service: &'static str,
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    cache: CacheStats,
}

#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    stats: CacheStats,
    keys: Vec<Fingerprint>,
}

#[derive(Serialize)]
struct ClearResponse {
    cleared: usize,
}

#[derive(Serialize)]
struct CleanupResponse {
    message: String,
    deleted: usize,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/synthesize", post(synthesize))
        .route("/cache/stats", get(cache_stats))
        .route("/cache", delete(clear_cache))
        .route("/cleanup", delete(cleanup))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then let in-flight requests drain
pub async fn start_server(
    state: SharedState,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "TTS Cache Service",
        status: "running",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok",
        uptime_secs,
        cache: state.cache.stats(),
    })
}

/// Convert text to speech, serving from cache when possible
async fn synthesize(
    State(state): State<SharedState>,
    Json(request): Json<SynthesizeRequest>,
) -> Response {
    match state.cache.fetch(&request.text, &request.language).await {
        Ok((generated, audio)) => {
            let filename = format!(
                "speech_{}.{}",
                generated.fingerprint,
                state.cache.store().extension()
            );

            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, state.content_type.clone()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename={}", filename),
                    ),
                    (X_CACHE, generated.status.as_header().to_string()),
                ],
                audio,
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn cache_stats(State(state): State<SharedState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        stats: state.cache.stats(),
        keys: state.cache.index().keys(),
    })
}

/// Forget all index entries; files on disk are left alone
async fn clear_cache(State(state): State<SharedState>) -> Json<ClearResponse> {
    Json(ClearResponse {
        cleared: state.cache.clear(),
    })
}

/// Delete every generated file and empty the index
async fn cleanup(State(state): State<SharedState>) -> Response {
    match state.cache.cleanup().await {
        Ok(deleted) => Json(CleanupResponse {
            message: format!("Deleted {} files", deleted),
            deleted,
        })
        .into_response(),
        Err(e) => {
            error!(error = %e, "Cleanup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Cleanup failed: {}", e),
                }),
            )
                .into_response()
        }
    }
}

fn error_response(err: CacheError) -> Response {
    match err {
        CacheError::Validation(msg) => {
            (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: msg })).into_response()
        }
        other => {
            warn!(error = %other, "Synthesis request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("TTS synthesis failed: {}", other),
                }),
            )
                .into_response()
        }
    }
}

pub mod monitoring;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use monitoring::SYNC_METRICS;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::orchestrator::{SyncMode, SyncRequestOutcome};
use crate::state::AppState;
use crate::sync_service::Error;

#[derive(Debug, Default, Deserialize)]
pub struct SyncQuery {
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlaybackUpdate {
    pub active: bool,
}

async fn health_handler() -> String {
    "Healthy".to_string()
}

async fn expose_metrics(state: State<Arc<AppState>>) -> impl IntoResponse {
    let mut buffer = String::new();
    let registry = state.registry.read().await;
    match encode(&mut buffer, &registry) {
        Ok(()) => (StatusCode::OK, buffer),
        Err(err) => {
            error!(event = "metrics_encode_failed", error = %err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

/// Manual "sync now". The chain is skipped when the same one is already queued or running.
async fn sync_now(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
    Query(query): Query<SyncQuery>,
) -> impl IntoResponse {
    let mode = match query.mode.as_deref().map(str::parse::<SyncMode>) {
        None => SyncMode::Full,
        Some(Ok(mode)) => mode,
        Some(Err(message)) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": message })));
        }
    };
    if !state.orchestrator.has_source(&source) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown source `{source}`") })),
        );
    }

    match state.orchestrator.request_sync(&source, mode).await {
        Ok(SyncRequestOutcome::Enqueued) => (
            StatusCode::ACCEPTED,
            Json(json!({ "source": source, "mode": mode, "outcome": "enqueued" })),
        ),
        Ok(SyncRequestOutcome::AlreadyActive) => (
            StatusCode::OK,
            Json(json!({ "source": source, "mode": mode, "outcome": "already_active" })),
        ),
        Err(err) => {
            error!(
                event = "manual_sync_request_failed",
                source = %source,
                mode = %mode,
                error = %err,
                "manual sync request failed"
            );
            let status = match &err {
                Error::Scheduler(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(json!({ "error": err.to_string() })))
        }
    }
}

async fn set_playback(
    State(state): State<Arc<AppState>>,
    Json(update): Json<PlaybackUpdate>,
) -> StatusCode {
    let previous = state.playback.send_replace(update.active);
    if previous != update.active {
        info!(
            event = "playback_activity_changed",
            active = update.active,
            "playback activity changed"
        );
    }
    if let Some(metrics) = SYNC_METRICS.get() {
        metrics.playback_active.set(i64::from(update.active));
    }
    StatusCode::NO_CONTENT
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(expose_metrics))
        .route("/sync/:source", post(sync_now))
        .route("/playback", put(set_playback))
        .with_state(state)
}

pub async fn register_metrics(registry: &mut Registry) {
    let sync_registry = &mut *registry;
    SYNC_METRICS
        .get_or_init(|| async move { monitoring::SyncMetrics::register(sync_registry, "sync") })
        .await;
    monitoring::register_build_info_metric(registry, "catalog");
}

/// Starts the HTTP server on `addr`; it stops when the state's shutdown token fires.
pub async fn setup_server_with_addr(
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<tokio::task::JoinHandle<()>, std::io::Error> {
    {
        let mut registry = state.registry.write().await;
        register_metrics(&mut registry).await;
    }

    let shutdown_token = state.shutdown_token.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(event = "http_server_listening", bind = %addr, "http server listening");
    let server_handle = tokio::spawn(async move {
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
        })
        .await;
        if let Err(err) = served {
            error!(event = "http_server_failed", error = %err, "http server stopped with an error");
        }
    });

    Ok(server_handle)
}

//! HTTP control API
//!
//! - `POST /api/start` - register a stream and open its SRT listener
//! - `POST /api/stop` - cancel a stream
//! - `POST /api/status` - current lifecycle status
//! - `GET  /video/*path` - serve local HLS artifacts (range-capable)
//! - `GET  /metrics` - gateway counters
//!
//! The `/api/*` endpoints sit behind the request-signature middleware.

pub mod signature;
pub mod streams;
pub mod video;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::metrics::{global_metrics, MetricsSnapshot};
use crate::task::TaskManager;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<TaskManager>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(manager: Arc<TaskManager>, config: Arc<Config>) -> Self {
        Self { manager, config }
    }
}

/// Build the HTTP router
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/start", post(streams::start_stream))
        .route("/api/stop", post(streams::stop_stream))
        .route("/api/status", post(streams::stream_status))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            signature::verify_request,
        ));

    Router::new()
        .merge(api)
        .route("/video/*path", get(video::serve_video))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<MetricsSnapshot> {
    let counts = state.manager.counts().await;
    Json(global_metrics().snapshot(counts))
}

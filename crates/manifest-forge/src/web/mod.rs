//! HTTP surface: routing, request tracking and the error boundary.

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod response;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use manifest_forge_source::ManifestService;
use tracing::info;

use crate::web::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ManifestService>,
    pub metrics: Arc<Metrics>,
    pub request_timeout: Duration,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/rest/api/v1/helm/actions/get-chart-metadata",
            post(handlers::get_chart_metadata),
        )
        .route(
            "/rest/api/v1/helm/actions/render-chart",
            post(handlers::render_chart),
        )
        .route(
            "/rest/api/v1/kustomize/actions/render-kustomization",
            post(handlers::render_kustomization),
        )
        .route("/health/readiness", get(handlers::health))
        .route("/health/liveness", get(handlers::health))
        .route("/metrics", get(metrics::serve_metrics))
        .layer(from_fn_with_state(state.clone(), track_request))
        .with_state(state)
}

async fn track_request(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let started = Instant::now();
    state.metrics.request_started();
    let response = next.run(request).await;
    let elapsed = started.elapsed();
    let status = response.status().as_u16();
    state.metrics.request_finished(&path, status, elapsed);

    info!(
        %method,
        path,
        status,
        duration_ms = elapsed.as_millis() as u64,
        "handled request"
    );
    response
}

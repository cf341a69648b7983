use axum::extract::{FromRequest, Request, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use manifest_forge_api::{
    GetChartMetadataAction, GetChartMetadataResponse, RenderChartAction, RenderChartResponse,
    RenderKustomizationAction, RenderKustomizationResponse,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::warn;

use crate::web::error::ApiError;
use crate::web::response::respond;
use crate::web::AppState;

/// `axum::Json` with rejections shaped like every other error body.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(request, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError::bad_request(
                "invalid request body",
                Some(rejection.body_text()),
            )),
        }
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "OK"}))
}

pub async fn get_chart_metadata(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(action): ApiJson<GetChartMetadataAction>,
) -> Result<Response, ApiError> {
    let default_values = with_deadline(&state, state.service.get_chart_metadata(&action.reference))
        .await??;
    Ok(respond(&headers, &GetChartMetadataResponse { default_values }))
}

pub async fn render_chart(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(action): ApiJson<RenderChartAction>,
) -> Result<Response, ApiError> {
    let (manifests, metadata) = with_deadline(
        &state,
        state
            .service
            .render_chart(&action.reference, action.parameters.as_ref()),
    )
    .await??;
    Ok(respond(&headers, &RenderChartResponse { manifests, metadata }))
}

pub async fn render_kustomization(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(action): ApiJson<RenderKustomizationAction>,
) -> Result<Response, ApiError> {
    let manifests = with_deadline(
        &state,
        state
            .service
            .render_kustomization(&action.reference, action.parameters.as_ref()),
    )
    .await??;
    Ok(respond(&headers, &RenderKustomizationResponse { manifests }))
}

/// Bound the whole pipeline by the per-request deadline. Cancellation
/// drops the in-flight future; completed cache writes stay.
async fn with_deadline<T, F>(state: &AppState, future: F) -> Result<T, ApiError>
where
    F: std::future::Future<Output = T>,
{
    match tokio::time::timeout(state.request_timeout, future).await {
        Ok(value) => Ok(value),
        Err(_) => {
            warn!(
                timeout_s = state.request_timeout.as_secs(),
                "request deadline exceeded"
            );
            Err(ApiError::internal())
        }
    }
}

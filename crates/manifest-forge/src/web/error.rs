//! Error boundary: the caller-visible taxonomy maps to 400 with the error
//! message as the title; everything else is a logged 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use manifest_forge_api::ErrorBody;
use manifest_forge_git::GitError;
use manifest_forge_helm::index::IndexError;
use manifest_forge_helm::values::ValuesError;
use manifest_forge_registry::RegistryError;
use manifest_forge_source::SourceError;
use tracing::error;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn bad_request(title: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                title: title.into(),
                detail,
            },
        }
    }

    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorBody {
                title: "internal server error".to_string(),
                detail: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<SourceError> for ApiError {
    fn from(err: SourceError) -> Self {
        if is_caller_visible(&err) {
            ApiError::bad_request(err.to_string(), None)
        } else {
            error!("unhandled pipeline error: {err:?}");
            ApiError::internal()
        }
    }
}

/// True for failures the caller can fix by changing the request.
fn is_caller_visible(err: &SourceError) -> bool {
    match err {
        SourceError::Git(git) => matches!(
            git,
            GitError::RepositoryNotFound { .. } | GitError::ReferenceNotFound { .. }
        ),
        // transport failures and unexpected upstream statuses are not the
        // caller's fault and stay 500
        SourceError::Registry(registry) => matches!(
            registry,
            RegistryError::RepositoryNotFound { .. }
                | RegistryError::ChartNotFound { .. }
                | RegistryError::MissingProvider { .. }
                | RegistryError::InvalidRepositoryUrl { .. }
        ),
        SourceError::Index(index) => matches!(
            index,
            IndexError::ChartNotFound { .. } | IndexError::Empty | IndexError::NoApiVersion
        ),
        SourceError::Values(values) => matches!(
            values,
            ValuesError::ValueFileMissing { .. }
                | ValuesError::Expression { .. }
                | ValuesError::NotAMapping { .. }
        ),
        SourceError::ChartBuild(_)
        | SourceError::InvalidDependency { .. }
        | SourceError::ChartRender(_)
        | SourceError::OverlayRender(_)
        | SourceError::AbsoluteSourcePath { .. }
        | SourceError::KustomizationReferenceInvalid => true,
        SourceError::Cache(_) | SourceError::Fs(_) | SourceError::IndexRefresh { .. } => false,
    }
}

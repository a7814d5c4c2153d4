//! The top-level HTTP error taxonomy.
//!
//! Every subsystem below this crate returns its own typed sentinel
//! (`StoreError`, `SecretError`, `PluginError`, ...); `ApiError` is where
//! those get translated into an HTTP status and the `{error, message}`
//! envelope. Wraps every subsystem error with `#[from]`, plus a handful of
//! request-layer variants on top for authz, rate limiting, and malformed
//! requests.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use catalog_core::store::StoreError;
use catalog_core::validate::DetailedValidationResult;
use catalog_plugins::{ActionError, PluginError};
use catalog_security::SecretError;
use catalog_tenant::{OverlayError, RefreshStatusError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("validation failed")]
    ValidationFailed(Box<DetailedValidationResult>),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("version conflict: {0}")]
    Conflict(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if let ApiError::ValidationFailed(result) = &self {
            return (status, Json(result.as_ref().clone())).into_response();
        }

        let mut response = (
            status,
            Json(ErrorEnvelope {
                error: status
                    .canonical_reason()
                    .unwrap_or("error")
                    .to_string(),
                message: self.to_string(),
            }),
        )
            .into_response();

        if let ApiError::RateLimited { retry_after_secs } = &self {
            response
                .headers_mut()
                .insert("Retry-After", retry_after_secs.to_string().parse().unwrap());
        }

        response
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::VersionConflict { expected, current } => {
                ApiError::Conflict(format!("expected {expected}, current is {current}"))
            }
            StoreError::RevisionNotFound(version) => {
                ApiError::NotFound(format!("no revision found for version prefix {version}"))
            }
            StoreError::FileTooLarge { actual, limit } => {
                ApiError::BadRequest(format!("config payload of {actual} bytes exceeds the {limit} byte limit"))
            }
            StoreError::PathTraversal(path) => ApiError::BadRequest(format!("path traversal rejected: {path}")),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<SecretError> for ApiError {
    fn from(error: SecretError) -> Self {
        ApiError::Internal(error.into())
    }
}

impl From<PluginError> for ApiError {
    fn from(error: PluginError) -> Self {
        match error {
            PluginError::CapabilityMissing(capability) => ApiError::NotImplemented(capability.to_string()),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<OverlayError> for ApiError {
    fn from(error: OverlayError) -> Self {
        ApiError::Internal(error.into())
    }
}

impl From<RefreshStatusError> for ApiError {
    fn from(error: RefreshStatusError) -> Self {
        ApiError::Internal(error.into())
    }
}

impl From<ActionError> for ApiError {
    fn from(error: ActionError) -> Self {
        match error {
            ActionError::Unknown(id) => ApiError::BadRequest(format!("unknown action {id:?}")),
            ActionError::DryRunNotSupported(id) => {
                ApiError::BadRequest(format!("action {id:?} does not support dry-run"))
            }
            ActionError::NotImplemented(plugin) => ApiError::NotImplemented(format!("{plugin} actions")),
            ActionError::Overlay(e) => ApiError::Internal(e.into()),
            ActionError::Plugin(e) => e.into(),
        }
    }
}

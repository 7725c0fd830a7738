use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

use crate::analysis::errors::AnalysisError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed HTTP input that never reached the orchestrator.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Analysis(e) => match e {
                AnalysisError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
                AnalysisError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
                AnalysisError::CapabilityUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                AnalysisError::Validation { .. } | AnalysisError::StreamingProtocol(_) => {
                    StatusCode::BAD_GATEWAY
                }
                AnalysisError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
                AnalysisError::Cancelled => StatusCode::REQUEST_TIMEOUT,
                AnalysisError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// The `{"code", "message", ...}` object carried under `"error"`, also
    /// used as the payload of terminal stream error events.
    pub fn detail(&self) -> Value {
        match self {
            AppError::Validation(msg) => json!({"code": "VALIDATION_ERROR", "message": msg}),
            AppError::Internal(_) => json!({
                "code": "INTERNAL_ERROR",
                "message": "An internal server error occurred"
            }),
            AppError::Analysis(e) => {
                let mut detail = json!({"code": e.code(), "message": e.to_string()});
                match e {
                    AnalysisError::InvalidRequest { details } | AnalysisError::Validation { details } => {
                        detail["details"] = json!(details);
                    }
                    AnalysisError::QuotaExceeded { scope } => detail["scope"] = json!(scope),
                    AnalysisError::CapabilityUnavailable { retryable, .. } => {
                        detail["retryable"] = json!(retryable);
                    }
                    AnalysisError::Internal(_) => {
                        detail["message"] = json!("An internal server error occurred");
                    }
                    _ => {}
                }
                detail
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed with {status}: {self:?}");
        }

        let body = Json(json!({ "error": self.detail() }));
        (status, body).into_response()
    }
}

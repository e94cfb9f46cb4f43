//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors are automatically converted
//! to a JSON-body HTTP response with an appropriate status code.
//!
//! Database errors are logged with full detail but only a generic message is
//! returned to the caller so that SQL or file paths never leak to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

use crate::completion::CompletionError;

/// One rejected request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FieldViolation {
    pub field: String,
    pub code: String,
    pub message: String,
}

/// All errors that can occur in the parley-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The request body parsed but failed field validation.
    #[error("validation failed: {0:?}")]
    Validation(Vec<FieldViolation>),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Propagated from the turn store.
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Propagated from the completion provider.
    #[error("completion error: {0}")]
    Completion(#[from] CompletionError),

    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::Validation(violations) => {
                let body = json!({ "error": "validation failed", "details": violations });
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),

            ServerError::Completion(e) => {
                error!(error = %e, "completion provider error");
                (StatusCode::INTERNAL_SERVER_ERROR, client_message_for(e))
            }
            ServerError::Persistence(e) => {
                error!(error = %e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to save or load messages".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

/// Text shown to clients for a completion failure, in HTTP bodies and in
/// streamed error frames alike.
pub fn client_message_for(e: &CompletionError) -> String {
    format!("AI service error: {e}")
}

impl From<validator::ValidationErrors> for ServerError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut violations: Vec<FieldViolation> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| FieldViolation {
                    field: field.to_string(),
                    code: e.code.to_string(),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{field} is invalid")),
                })
            })
            .collect();
        violations.sort_by(|a, b| a.field.cmp(&b.field));
        ServerError::Validation(violations)
    }
}

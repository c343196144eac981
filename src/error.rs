// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::store::StoreError;

/// Category of a store failure, derived from the backend message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceKind {
    PermissionDenied,
    Unavailable,
    Other,
}

impl PersistenceKind {
    pub fn classify(message: &str) -> Self {
        let message = message.to_lowercase();
        if message.contains("permission") || message.contains("denied") {
            PersistenceKind::PermissionDenied
        } else if ["unavailable", "network", "connection", "timed out"]
            .iter()
            .any(|needle| message.contains(needle))
        {
            PersistenceKind::Unavailable
        } else {
            PersistenceKind::Other
        }
    }

    fn user_message(self) -> &'static str {
        match self {
            PersistenceKind::PermissionDenied => {
                "Permission denied by the database. Check the database rules configuration."
            }
            PersistenceKind::Unavailable => {
                "The database is unreachable. Check your connection and try again."
            }
            PersistenceKind::Other => "Failed to save your data. Please try again.",
        }
    }
}

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // 401 Missing or bad credential
    Unauthenticated(String),

    // 403 Role check failed
    Forbidden(String),

    // 409 The principal already completed the exam
    AlreadyCompleted,

    // 400 Empty or malformed answer
    ValidationFailed(String),

    // 409 Submit without confirmation while questions are unanswered
    IncompleteSubmission { answered: usize, total: usize },

    // 409 Operation not allowed in the current session phase
    InvalidTransition(String),

    // 502 Blob upload failed
    UploadFailed(String),

    // 502 Transcription service failed
    TranscriptionFailed(String),

    // 503 / 500 Store read or write failed
    PersistenceFailed(PersistenceKind, String),

    // 404 Not Found
    NotFound(String),

    // 400 Bad Request
    BadRequest(String),

    // 409 Conflict (e.g., duplicate email)
    Conflict(String),

    // 500 Internal Server Error
    InternalServerError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Unauthenticated(msg) => write!(f, "unauthenticated: {}", msg),
            AppError::Forbidden(msg) => write!(f, "forbidden: {}", msg),
            AppError::AlreadyCompleted => write!(f, "exam already completed"),
            AppError::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            AppError::IncompleteSubmission { answered, total } => {
                write!(f, "answered {} of {} questions", answered, total)
            }
            AppError::InvalidTransition(msg) => write!(f, "invalid transition: {}", msg),
            AppError::UploadFailed(msg) => write!(f, "upload failed: {}", msg),
            AppError::TranscriptionFailed(msg) => write!(f, "transcription failed: {}", msg),
            AppError::PersistenceFailed(kind, msg) => {
                write!(f, "persistence failed ({:?}): {}", kind, msg)
            }
            AppError::NotFound(msg) => write!(f, "not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "bad request: {}", msg),
            AppError::Conflict(msg) => write!(f, "conflict: {}", msg),
            AppError::InternalServerError(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::IncompleteSubmission { answered, total } = self {
            let body = Json(json!({
                "error": format!(
                    "You have answered {} out of {} questions. Submit anyway?",
                    answered, total
                ),
                "answered": answered,
                "total": total,
            }));
            return (StatusCode::CONFLICT, body).into_response();
        }

        let (status, error_message) = match self {
            AppError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::AlreadyCompleted => (
                StatusCode::CONFLICT,
                "You have already completed the exam.".to_string(),
            ),
            AppError::ValidationFailed(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::IncompleteSubmission { .. } => {
                (StatusCode::CONFLICT, "Submission needs confirmation.".to_string())
            }
            AppError::InvalidTransition(msg) => (StatusCode::CONFLICT, msg),
            AppError::UploadFailed(msg) => {
                tracing::error!("Upload failed: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "Failed to save audio. Please try again.".to_string(),
                )
            }
            AppError::TranscriptionFailed(msg) => {
                tracing::warn!("Transcription failed: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "Transcription is unavailable.".to_string(),
                )
            }
            AppError::PersistenceFailed(kind, msg) => {
                tracing::error!("Persistence failed ({:?}): {}", kind, msg);
                let status = match kind {
                    PersistenceKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, kind.user_message().to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };
        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Store failures are classified so the caller gets an actionable message.
impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidPath(path) => AppError::BadRequest(format!("Invalid key '{}'", path)),
            other => {
                let message = other.to_string();
                AppError::PersistenceFailed(PersistenceKind::classify(&message), message)
            }
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_permission_errors() {
        assert_eq!(
            PersistenceKind::classify("PERMISSION_DENIED: rules rejected write"),
            PersistenceKind::PermissionDenied
        );
    }

    #[test]
    fn classify_network_errors() {
        assert_eq!(
            PersistenceKind::classify("pool timed out while waiting for an open connection"),
            PersistenceKind::Unavailable
        );
        assert_eq!(
            PersistenceKind::classify("service unavailable"),
            PersistenceKind::Unavailable
        );
    }

    #[test]
    fn classify_everything_else_as_generic() {
        assert_eq!(
            PersistenceKind::classify("duplicate key value"),
            PersistenceKind::Other
        );
    }

    #[test]
    fn store_errors_map_to_persistence_failures() {
        let err: AppError = StoreError::Backend("connection refused".to_string()).into();
        assert!(matches!(
            err,
            AppError::PersistenceFailed(PersistenceKind::Unavailable, _)
        ));
    }

    #[test]
    fn incomplete_submission_is_a_conflict() {
        let response = AppError::IncompleteSubmission { answered: 3, total: 22 }.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A top-movie swap whose batch write did not complete. Carries the ids of
    /// both halves so the caller can audit which entries may be stale.
    #[error("Top movie rotation failed ({reason}); old: {old:?}, new: {new:?}")]
    PartialRotation {
        old: Vec<String>,
        new: Vec<String>,
        reason: String,
    },

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for failures caused by the storage or cache collaborators rather
    /// than by the caller's input.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Cache(_)
                | AppError::PartialRotation { .. }
                | AppError::Internal(_)
        )
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("Serialization error: {}", e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.is_internal() {
            tracing::error!(error = %self, "Internal service error");
            let body = Json(json!({
                "error": "Internal service error. Please try again."
            }));
            return (StatusCode::INTERNAL_SERVER_ERROR, body).into_response();
        }

        let (status, message) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

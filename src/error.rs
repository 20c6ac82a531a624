use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application error types
#[derive(Debug)]
pub enum AppError {
    /// Malformed query or request body
    Validation(String),
    /// Well-formed request that references something that does not exist
    Unprocessable { message: String, details: serde_json::Value },
    /// Record not found
    NotFound(String),
    /// Internal server error
    InternalError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "Validation error: {}", msg),
            Self::Unprocessable { message, .. } => write!(f, "Validation error: {}", message),
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Unprocessable { message, .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, message.clone())
            }
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::InternalError(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
        };

        let mut error = json!({
            "message": error_message,
            "type": error_type_name(&self),
        });
        if let Self::Unprocessable { details, .. } = &self {
            error["details"] = details.clone();
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::Validation(_) => "validation_error",
        AppError::Unprocessable { .. } => "validation_error",
        AppError::NotFound(_) => "not_found",
        AppError::InternalError(_) => "internal_error",
    }
}

// Implement conversions from common error types
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(format!("{:#}", err))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::InternalError(format!("Database error: {}", err))
    }
}

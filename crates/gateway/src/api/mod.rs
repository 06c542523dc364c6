//! HTTP API — request validation happens here, before any SSE byte is
//! written; everything after validation streams.

pub mod chat;
pub mod router;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use cairn_domain::error::Error;

/// Errors surfaced as HTTP statuses before streaming begins.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_input",
            message: message.into(),
        }
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code: "access_denied",
            message: message.into(),
        }
    }

    pub fn chat_not_found(chat_id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "chat_not_found",
            message: format!("chat '{chat_id}' not found"),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal_error",
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidInput(m) => ApiError::invalid_input(m),
            Error::AccessDenied(m) => ApiError::access_denied(m),
            Error::ChatNotFound(id) => ApiError::chat_not_found(&id),
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({
                "error": self.code,
                "message": self.message,
            })),
        )
            .into_response()
    }
}

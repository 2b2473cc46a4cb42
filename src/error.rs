use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Message returned to clients for faults whose detail stays in the logs.
const GENERIC_MESSAGE: &str = "Unable to complete the operation";

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or unbindable request input.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Bad credentials or an invalid/expired token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated, but not allowed to perform the action.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource not found error.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The user already has a finished-reading record for this book.
    #[error("book already read")]
    AlreadyRead,

    /// The collection is reserved and cannot be renamed or deleted.
    #[error("collection is not editable")]
    NotEditable,

    /// A uniqueness rule was violated (duplicate email, duplicate catalog key).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Every search branch failed.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Query, exec or scan failure in the relational store.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Begin or commit failure.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Outbound HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image processing error.
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Token signing error.
    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status carried by this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyRead
            | AppError::NotEditable
            | AppError::Conflict(_)
            | AppError::Storage(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the client.
    pub fn public_message(&self) -> String {
        match self {
            AppError::AlreadyRead => "The book is already marked as read".to_string(),
            AppError::NotEditable => "The collection cannot be modified".to_string(),
            AppError::Validation(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::Unavailable(msg) => msg.clone(),
            _ => GENERIC_MESSAGE.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() || matches!(self, AppError::Storage(_)) {
            tracing::error!(error = %self, "Request error");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        (status, Json(json!({ "message": self.public_message() }))).into_response()
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

/// Map a rusqlite error into a storage error with context.
pub(crate) fn storage(context: &'static str) -> impl FnOnce(rusqlite::Error) -> AppError {
    move |e| AppError::Storage(format!("{}: {}", context, e))
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, AppError>;

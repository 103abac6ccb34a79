//! Error types for the share store

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, ShareError>;

#[derive(Error, Debug)]
pub enum ShareError {
    #[error("invalid JSON content: {0}")]
    InvalidContent(String),

    #[error("content exceeds the {limit} byte limit")]
    ContentTooLarge { limit: usize },

    #[error("content not found")]
    ContentNotFound,

    /// A stored_contents row exists but its bytes are gone.
    #[error("stored bytes missing for content {0}")]
    StorageInconsistent(Uuid),

    #[error("share not found or no longer available")]
    ShareNotFound,

    #[error("share has expired")]
    ShareExpired,

    #[error("share belongs to another user")]
    Forbidden,

    #[error("could not allocate a unique share code after {0} attempts")]
    ShareCodeExhausted(usize),

    #[error("missing user identity")]
    MissingIdentity,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable, machine-checkable error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidContent,
    ContentTooLarge,
    ContentNotFound,
    StorageInconsistent,
    ShareNotFound,
    ShareExpired,
    Forbidden,
    ShareCodeExhausted,
    MissingIdentity,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidContent => "INVALID_CONTENT",
            ErrorKind::ContentTooLarge => "CONTENT_TOO_LARGE",
            ErrorKind::ContentNotFound => "CONTENT_NOT_FOUND",
            ErrorKind::StorageInconsistent => "STORAGE_INCONSISTENT",
            ErrorKind::ShareNotFound => "SHARE_NOT_FOUND",
            ErrorKind::ShareExpired => "SHARE_EXPIRED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::ShareCodeExhausted => "SHARE_CODE_EXHAUSTED",
            ErrorKind::MissingIdentity => "MISSING_IDENTITY",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    fn status(self) -> StatusCode {
        match self {
            ErrorKind::InvalidContent | ErrorKind::MissingIdentity => StatusCode::BAD_REQUEST,
            ErrorKind::ContentTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::ContentNotFound | ErrorKind::ShareNotFound => StatusCode::NOT_FOUND,
            ErrorKind::ShareExpired => StatusCode::GONE,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::StorageInconsistent
            | ErrorKind::ShareCodeExhausted
            | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ShareError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShareError::InvalidContent(_) => ErrorKind::InvalidContent,
            ShareError::ContentTooLarge { .. } => ErrorKind::ContentTooLarge,
            ShareError::ContentNotFound => ErrorKind::ContentNotFound,
            ShareError::StorageInconsistent(_) => ErrorKind::StorageInconsistent,
            ShareError::ShareNotFound => ErrorKind::ShareNotFound,
            ShareError::ShareExpired => ErrorKind::ShareExpired,
            ShareError::Forbidden => ErrorKind::Forbidden,
            ShareError::ShareCodeExhausted(_) => ErrorKind::ShareCodeExhausted,
            ShareError::MissingIdentity => ErrorKind::MissingIdentity,
            ShareError::Database(_) | ShareError::Io(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ShareError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let message = match kind {
            ErrorKind::StorageInconsistent | ErrorKind::ShareCodeExhausted | ErrorKind::Internal => {
                tracing::error!(error = %self, "request failed");
                "An internal error occurred".to_string()
            }
            _ => self.to_string(),
        };

        (
            kind.status(),
            Json(ErrorBody {
                code: kind.code(),
                message,
            }),
        )
            .into_response()
    }
}

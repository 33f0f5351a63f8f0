use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

use crate::providers::ProviderError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// The uploaded file is not one of the supported image formats or PDF
    #[error("Unsupported file format: {detail}")]
    UnsupportedFormat { detail: String },

    /// The raw upload exceeds the configured byte ceiling. Checked before any
    /// decoding work happens.
    #[error("File exceeds the maximum allowed size of {limit} bytes")]
    SizeLimitExceeded { limit: usize },

    /// No page of the document could be rasterized
    #[error("Document could not be processed: {detail}")]
    CorruptDocument { detail: String },

    /// Requested prompt template is not in the loaded set
    #[error("Template '{name}' not found")]
    TemplateNotFound { name: String },

    /// Ledger query with out-of-range limit/offset. Never silently clamped.
    #[error("{message}")]
    InvalidQuery { message: String },

    /// Invalid request data from the caller
    #[error("{message}")]
    BadRequest { message: String },

    /// Model backend failure, surfaced with enough detail for the caller to
    /// decide on retry. The service itself never retries.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Ledger storage error
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::UnsupportedFormat { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::SizeLimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::CorruptDocument { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::TemplateNotFound { .. } => StatusCode::NOT_FOUND,
            Error::InvalidQuery { .. } | Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::Provider(err) => match err {
                ProviderError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
                // Auth is the server's credential problem, not the caller's
                ProviderError::Unavailable(_) | ProviderError::Auth(_) | ProviderError::Api(_) => StatusCode::BAD_GATEWAY,
            },
            Error::Database(_) | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::UnsupportedFormat { .. }
            | Error::SizeLimitExceeded { .. }
            | Error::CorruptDocument { .. }
            | Error::TemplateNotFound { .. }
            | Error::InvalidQuery { .. }
            | Error::BadRequest { .. }
            | Error::Provider(_) => self.to_string(),
            Error::Database(_) => "Storage error occurred".to_string(),
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(_) | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Provider(_) => {
                tracing::warn!("Provider error: {}", self);
            }
            Error::UnsupportedFormat { .. }
            | Error::SizeLimitExceeded { .. }
            | Error::CorruptDocument { .. }
            | Error::TemplateNotFound { .. }
            | Error::InvalidQuery { .. }
            | Error::BadRequest { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        (self.status_code(), self.user_message()).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

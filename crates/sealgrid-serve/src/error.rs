//! Error types for the peer endpoint.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;

use sealgrid_stores::StoreError;

/// Handler failures, mapped onto HTTP status codes.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ServeError {
    fn status(&self) -> StatusCode {
        match self {
            ServeError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServeError::NotFound(_) => StatusCode::NOT_FOUND,
            ServeError::Store(StoreError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            ServeError::Store(StoreError::SectorNotFound { .. } | StoreError::PathNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            ServeError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ServeError::Store(_) | ServeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors go out as plain text; peers surface the body of a 500 verbatim.
impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "peer request failed");
        }
        (status, self.to_string()).into_response()
    }
}

pub type ServeResult<T> = Result<T, ServeError>;

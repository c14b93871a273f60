//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<hookci_core::Error> for ApiError {
    fn from(err: hookci_core::Error) -> Self {
        use hookci_core::Error;
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            Error::Conflict(msg) => ApiError::Conflict(msg),
            Error::RefNotAccepted { .. } => ApiError::BadRequest(err.to_string()),
            Error::BuildNotRunning(_) => ApiError::Conflict(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<hookci_db::DbError> for ApiError {
    fn from(err: hookci_db::DbError) -> Self {
        hookci_core::Error::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookci_core::{BuildId, Error};

    fn status(err: Error) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(status(Error::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(Error::InvalidInput("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(Error::Unauthorized("x".into())), StatusCode::UNAUTHORIZED);
        assert_eq!(status(Error::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status(Error::BuildNotRunning(BuildId::new(3))),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(Error::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

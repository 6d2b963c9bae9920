//! JSON error responses.

use axum::{http::StatusCode, Json};
use serde::Serialize;
use trackerdb_core::StoreError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn bad_request(message: impl Into<String>) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, message)
}

/// Map a store error onto the status a caller can act on.
pub fn store_error(e: StoreError) -> ApiError {
    let status = match &e {
        StoreError::InvalidKey(_) | StoreError::SameKey(_) => StatusCode::BAD_REQUEST,
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::NotEmpty(_) => StatusCode::CONFLICT,
        StoreError::LockTimeout { .. } | StoreError::IoTimeout { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        StoreError::Io { .. } | StoreError::Serialization(_) => {
            tracing::error!("Store error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    api_error(status, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_store_error_status_codes() {
        let cases = [
            (StoreError::InvalidKey("x".into()), StatusCode::BAD_REQUEST),
            (StoreError::SameKey("a:b".into()), StatusCode::BAD_REQUEST),
            (
                StoreError::NotFound {
                    key: "a:b".into(),
                    url: "u".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (StoreError::NotEmpty("a:b".into()), StatusCode::CONFLICT),
            (
                StoreError::LockTimeout { key: "a:b".into() },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                StoreError::IoTimeout {
                    path: PathBuf::from("/x"),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                StoreError::Serialization("bad".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            let (status, body) = store_error(error);
            assert_eq!(status, expected);
            assert!(!body.error.is_empty());
        }
    }
}

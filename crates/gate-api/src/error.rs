//! API error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gate_core::CoreError;
use gate_proxy::ProxyError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl From<ProxyError> for ApiError {
    fn from(e: ProxyError) -> Self {
        ApiError::Core(CoreError::Proxy(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Core(e) => match e {
                CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string()),
                CoreError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT", e.to_string()),
                CoreError::Proxy(ProxyError::InvalidBackend(msg)) => {
                    (StatusCode::BAD_REQUEST, "INVALID_BACKEND", msg.clone())
                }
                CoreError::Proxy(ProxyError::BindFailure { .. }) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "BIND_FAILURE",
                    e.to_string(),
                ),
                CoreError::Proxy(ProxyError::CloseFailure(_)) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CLOSE_FAILURE",
                    e.to_string(),
                ),
                CoreError::Proxy(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    e.to_string(),
                ),
            },
        };

        let body = axum::Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(CoreError::NotFound("db1".into()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(CoreError::Conflict("db1".into()).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ProxyError::InvalidBackend("bad port".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(
                ProxyError::BindFailure {
                    addr: "127.0.0.1:27016".parse().unwrap(),
                    source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
                }
                .into()
            ),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(ProxyError::CloseFailure("db1".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(ApiError::BadRequest("eof".into())),
            StatusCode::BAD_REQUEST
        );
    }
}

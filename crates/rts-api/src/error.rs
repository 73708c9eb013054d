//! Maps [`rts_core::CollectorError`] onto HTTP status codes and the
//! `{error: <message>}` body shape every failing handler returns.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use rts_core::{CollectorError, ErrorKind};
use serde_json::json;
use std::fmt;

/// Newtype wrapper so `ResponseError` (foreign trait) can be implemented
/// for `CollectorError` (foreign type) from within this crate.
pub struct ApiError(pub CollectorError);

impl fmt::Debug for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<CollectorError> for ApiError {
    fn from(error: CollectorError) -> Self {
        ApiError(error)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Protocol => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Io | ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.0.to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = ApiError(CollectorError::not_found("x"));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn storage_error_maps_to_500() {
        let err = ApiError(CollectorError::storage("disk full"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

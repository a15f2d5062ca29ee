//! HTTP error mapping
//!
//! Every failure leaves the API as `{"error": {"type", "message"}}` with a
//! status chosen from the error kind.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::TesseraError;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    /// Malformed request that never reached the store
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

fn status_for(err: &TesseraError) -> StatusCode {
    match err {
        TesseraError::NotFound(_)
        | TesseraError::VersionNotFound { .. }
        | TesseraError::BackupNotFound(_) => StatusCode::NOT_FOUND,
        TesseraError::ImmutableConflict(_) | TesseraError::IntegrityViolation { .. } => {
            StatusCode::CONFLICT
        }
        TesseraError::InvalidRelationship(_)
        | TesseraError::InvalidQuery(_)
        | TesseraError::InvalidKey(_) => StatusCode::BAD_REQUEST,
        TesseraError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        TesseraError::Blocked(_) => StatusCode::FORBIDDEN,
        TesseraError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        TesseraError::BackupCorrupt(_) => StatusCode::UNPROCESSABLE_ENTITY,
        TesseraError::Storage(_)
        | TesseraError::Config(_)
        | TesseraError::Io(_)
        | TesseraError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<TesseraError> for ApiError {
    fn from(err: TesseraError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            tracing::error!("Request failed: {err}");
        }
        Self::new(status, err.kind(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": self.kind,
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (TesseraError::NotFound("k".into()), StatusCode::NOT_FOUND),
            (
                TesseraError::VersionNotFound {
                    key: "k".into(),
                    version: 3,
                },
                StatusCode::NOT_FOUND,
            ),
            (TesseraError::ImmutableConflict("k".into()), StatusCode::CONFLICT),
            (
                TesseraError::IntegrityViolation {
                    key: "k".into(),
                    expected: "a".into(),
                    actual: "b".into(),
                },
                StatusCode::CONFLICT,
            ),
            (TesseraError::InvalidKey("".into()), StatusCode::BAD_REQUEST),
            (TesseraError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (TesseraError::Blocked("x".into()), StatusCode::FORBIDDEN),
            (TesseraError::RateLimited("x".into()), StatusCode::TOO_MANY_REQUESTS),
            (
                TesseraError::BackupCorrupt("x".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                TesseraError::Storage("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = ApiError::from(TesseraError::RateLimited("client 'c'".into())).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["type"], "rate_limited");
        assert!(body["error"]["message"].as_str().unwrap().contains("client 'c'"));
    }
}

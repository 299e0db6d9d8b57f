//! Mapping domain errors onto HTTP responses.
//!
//! Body shape: `{"error": {"code": "...", "message": "..."}}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{debug, error};

use rollcall_core::RollcallError;

/// An error ready to leave the server.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: &'a str,
}

impl ApiError {
    /// Failure inside the server itself, e.g. a panicked blocking task.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL",
            message: message.into(),
        }
    }

    /// HTTP status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<RollcallError> for ApiError {
    fn from(e: RollcallError) -> Self {
        let status = match &e {
            RollcallError::NoLiveSession { .. } | RollcallError::DuplicateSubmission { .. } => {
                StatusCode::CONFLICT
            }
            RollcallError::NotFound(_) => StatusCode::NOT_FOUND,
            RollcallError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RollcallError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RollcallError::StoreFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: e.code(),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, message = %self.message, "request failed");
        } else {
            debug!(code = self.code, message = %self.message, "request rejected");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: &self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{CommitteeId, DelegationId, SessionId, SessionKind};

    #[test]
    fn status_mapping() {
        let cases = [
            (
                RollcallError::NoLiveSession {
                    committee_id: CommitteeId::new(1),
                    kind: SessionKind::Voting,
                },
                StatusCode::CONFLICT,
            ),
            (
                RollcallError::DuplicateSubmission {
                    session_id: SessionId::new(1),
                    delegation_id: DelegationId::new(2),
                },
                StatusCode::CONFLICT,
            ),
            (RollcallError::NotFound("c".into()), StatusCode::NOT_FOUND),
            (RollcallError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (RollcallError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (
                RollcallError::StoreFailure("disk".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let code = err.code();
            let api = ApiError::from(err);
            assert_eq!(api.status(), status, "{code}");
            assert_eq!(api.code(), code);
        }
    }

    #[tokio::test]
    async fn body_shape() {
        let resp = ApiError::from(RollcallError::NotFound("committee 9".into())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert_eq!(json["error"]["message"], "not found: committee 9");
    }
}

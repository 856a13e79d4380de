//! HTTP error response mapping.
//!
//! Every error is rendered as `{ "error", "kind", "details"? }`. Storage
//! failures are logged and reported as a bare `internal` error.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};

use autoedge_domain::error::{AutoEdgeError, RolloutError};

/// JSON error body returned by API endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Maps [`AutoEdgeError`] and malformed request parts to an HTTP response.
#[derive(Debug)]
pub enum ApiError {
    Domain(AutoEdgeError),
    /// A path or query identifier that does not parse.
    InvalidId { what: &'static str, value: String },
    BadRequest(String),
}

impl From<AutoEdgeError> for ApiError {
    fn from(err: AutoEdgeError) -> Self {
        Self::Domain(err)
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, ErrorBody) {
        let body = |error: String, kind, details| ErrorBody {
            error,
            kind,
            details,
        };
        match self {
            Self::InvalidId { what, value } => (
                StatusCode::BAD_REQUEST,
                body(format!("invalid {what} {value:?}"), "invalid_id", None),
            ),
            Self::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                body(message.clone(), "bad_request", None),
            ),
            Self::Domain(err) => domain_parts(err),
        }
    }
}

fn domain_parts(err: &AutoEdgeError) -> (StatusCode, ErrorBody) {
    let message = err.to_string();
    let (status, kind, details) = match err {
        AutoEdgeError::Validation(validation) => (
            StatusCode::BAD_REQUEST,
            validation.kind(),
            serde_json::to_value(validation).ok(),
        ),
        AutoEdgeError::Rejected(rejection) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "spec_rejected",
            serde_json::to_value(rejection).ok(),
        ),
        AutoEdgeError::NotFound(not_found) => (
            StatusCode::NOT_FOUND,
            "not_found",
            Some(json!({ "entity": not_found.entity, "id": not_found.id })),
        ),
        AutoEdgeError::CircuitOpen(open) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "circuit_open",
            Some(json!({ "target": open.target, "retry_after_ms": open.retry_after_ms })),
        ),
        AutoEdgeError::QueueSaturated(saturated) => (
            StatusCode::TOO_MANY_REQUESTS,
            "queue_saturated",
            Some(json!({
                "depth": saturated.depth,
                "high_water_mark": saturated.high_water_mark,
            })),
        ),
        AutoEdgeError::Remote(remote) => (
            StatusCode::BAD_GATEWAY,
            "remote_error",
            serde_json::to_value(remote).ok(),
        ),
        AutoEdgeError::Rollout(rollout) => (
            StatusCode::CONFLICT,
            match rollout {
                RolloutError::NotDeployed { .. } => "not_deployed",
                RolloutError::NoCandidateVersion { .. } => "no_candidate_version",
                RolloutError::NotInCanary { .. } => "not_in_canary",
                RolloutError::NothingToRollBack { .. } => "nothing_to_roll_back",
                RolloutError::Paused { .. } => "rollout_paused",
            },
            None,
        ),
        AutoEdgeError::InvalidTransition(_) => (StatusCode::CONFLICT, "invalid_transition", None),
        AutoEdgeError::Storage(source) => {
            tracing::error!(error = %source, "storage error");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: "internal server error".to_string(),
                    kind: "internal",
                    details: None,
                },
            );
        }
    };
    (
        status,
        ErrorBody {
            error: message,
            kind,
            details,
        },
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.parts();
        let mut response = (status, Json(body)).into_response();
        if let Self::Domain(AutoEdgeError::CircuitOpen(open)) = &self {
            let seconds = open.retry_after_ms.div_ceil(1000).max(1);
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Parse a path identifier, reporting `what` on failure.
pub(crate) fn parse_id<T: std::str::FromStr>(what: &'static str, value: &str) -> Result<T, ApiError> {
    value.parse().map_err(|_| ApiError::InvalidId {
        what,
        value: value.to_string(),
    })
}

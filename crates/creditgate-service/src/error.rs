//! API error types and responses.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use creditgate_core::{ErrorClass, MeterError};
use creditgate_store::StoreError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - valid credentials but insufficient permissions.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A metering, guard or ledger error.
    #[error(transparent)]
    Meter(#[from] MeterError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Meter(err.into())
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    class: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

/// Status code, machine code and details for a metering error.
fn describe(err: &MeterError) -> (StatusCode, &'static str, Option<serde_json::Value>) {
    match err {
        MeterError::Rejected(reason) => {
            let status = match reason.class() {
                ErrorClass::Remedy => StatusCode::PAYMENT_REQUIRED,
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            };
            (status, reason.code(), serde_json::to_value(reason).ok())
        }
        MeterError::InsufficientCredits { balance, required } => (
            StatusCode::PAYMENT_REQUIRED,
            "insufficient_credits",
            Some(serde_json::json!({ "balance": balance, "required": required })),
        ),
        MeterError::RateLimited { retry_after_ms } => (
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            Some(serde_json::json!({ "retry_after_ms": retry_after_ms })),
        ),
        MeterError::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", None),
        MeterError::Metering(_) => (StatusCode::BAD_GATEWAY, "metering_error", None),
        MeterError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error", None),
        MeterError::ReconciliationShortfall { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "reconciliation_shortfall",
            None,
        ),
        MeterError::AccountNotFound { .. } => (StatusCode::NOT_FOUND, "account_not_found", None),
        MeterError::AccountAlreadyExists { .. } => (StatusCode::CONFLICT, "account_exists", None),
        MeterError::DuplicateEvent { .. } => (StatusCode::CONFLICT, "duplicate_event", None),
        MeterError::InvalidAmount(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_amount", None),
        MeterError::UnknownFeature(_) => (StatusCode::UNPROCESSABLE_ENTITY, "unknown_feature", None),
        MeterError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden", None),
        MeterError::InvalidId(_) => (StatusCode::BAD_REQUEST, "invalid_id", None),
        MeterError::Configuration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error", None),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, class, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                ErrorClass::Internal,
                None,
            ),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden", ErrorClass::Internal, None),
            Self::BadRequest(_) => (
                StatusCode::BAD_REQUEST,
                "bad_request",
                ErrorClass::Internal,
                None,
            ),
            Self::Meter(err) => {
                let (status, code, details) = describe(err);
                (status, code, err.class(), details)
            }
        };

        let message = if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self, "Request failed");
            match &self {
                Self::Meter(MeterError::Metering(_) | MeterError::Upstream(_)) => self.to_string(),
                _ => "An internal error occurred".to_string(),
            }
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                class: class.as_str(),
                details,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Self::Meter(MeterError::RateLimited { retry_after_ms }) = &self {
            let seconds = retry_after_ms.div_ceil(1000).max(1);
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

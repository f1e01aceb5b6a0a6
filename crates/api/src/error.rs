//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use engine::EngineError;
use serde_json::{Value, json};

/// Message shown when a hold lapsed before checkout finished.
const HOLD_EXPIRED_MESSAGE: &str = "your reservation expired, please search again";

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Engine operation error.
    Engine(EngineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, details) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Engine(err) => engine_error_to_response(err),
        };

        let mut body = json!({ "error": message });
        if let Some(details) = details {
            body["details"] = details;
        }
        (status, axum::Json(body)).into_response()
    }
}

fn engine_error_to_response(err: EngineError) -> (StatusCode, String, Option<Value>) {
    let message = err.to_string();
    match err {
        EngineError::InsufficientAvailability { shortfalls } => (
            StatusCode::CONFLICT,
            message,
            Some(json!({ "shortfalls": shortfalls })),
        ),
        EngineError::HoldExpired(_) => (StatusCode::GONE, HOLD_EXPIRED_MESSAGE.to_string(), None),
        EngineError::PriceMismatch(mismatch) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            message,
            Some(json!(mismatch)),
        ),
        EngineError::CouponRejected { code, reason } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            message,
            Some(json!({ "code": code, "reason": reason })),
        ),
        EngineError::NoticeViolation(violation) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            message,
            Some(json!(violation)),
        ),
        EngineError::InvalidWindow(_) | EngineError::InvalidRequest(_) => {
            (StatusCode::BAD_REQUEST, message, None)
        }
        EngineError::InvalidTransition(_) => (StatusCode::CONFLICT, message, None),
        EngineError::BookingNotFound(_) | EngineError::UnknownBookingReference(_) => {
            (StatusCode::NOT_FOUND, message, None)
        }
        EngineError::TransientStoreFailure(_) | EngineError::PaymentGateway(_) => {
            tracing::warn!(error = %message, "retryable failure");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                message,
                Some(json!({ "retryable": true })),
            )
        }
        _ => {
            tracing::error!(error = %message, "internal server error");
            (StatusCode::INTERNAL_SERVER_ERROR, message, None)
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{BookingId, HoldId};
    use domain::{Money, PriceField, PriceMismatch};

    fn status_of(err: EngineError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_engine_errors_map_to_status_codes() {
        assert_eq!(
            status_of(EngineError::InsufficientAvailability { shortfalls: vec![] }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(EngineError::HoldExpired(HoldId::new())), StatusCode::GONE);
        assert_eq!(
            status_of(EngineError::PriceMismatch(PriceMismatch {
                field: PriceField::Total,
                expected: Money::from_cents(100),
                submitted: Money::from_cents(90),
            })),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(EngineError::InvalidRequest("no items".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(EngineError::BookingNotFound(BookingId::new())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(EngineError::PaymentGateway("timeout".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(EngineError::WaiverService("down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_api_errors_map_to_status_codes() {
        assert_eq!(
            ApiError::NotFound("nope".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::BadRequest("bad".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }
}

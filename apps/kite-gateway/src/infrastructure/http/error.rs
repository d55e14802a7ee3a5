//! HTTP error responses.
//!
//! Every failure leaves the process as
//! `{"error": CODE, "message": ..., "details": ...}` where `details` (the
//! error source chain) is only filled in development.

use std::error::Error as StdError;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::services::GatewayError;
use crate::infrastructure::listings::ListingError;

/// Error body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub error: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Source chain (development only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// API error type mapped to a status and [`ErrorBody`].
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    /// Create an error.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: code,
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    /// Map a gateway error.
    #[must_use]
    pub fn from_gateway(err: &GatewayError, expose_details: bool) -> Self {
        let (status, code) = match err {
            GatewayError::Unauthorized => (StatusCode::FORBIDDEN, "UNAUTHORIZED"),
            GatewayError::AuthFailure(_) => (StatusCode::BAD_REQUEST, "AUTH_FAILED"),
            GatewayError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            GatewayError::InvalidMembers(_) => (StatusCode::BAD_REQUEST, "INVALID_MEMBERS"),
            GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            GatewayError::Upstream(_) => (StatusCode::INTERNAL_SERVER_ERROR, "UPSTREAM_ERROR"),
        };
        Self::new(status, code, err.to_string()).with_chain(err, expose_details)
    }

    /// Map a listing error.
    #[must_use]
    pub fn from_listing(err: &ListingError, expose_details: bool) -> Self {
        let (status, code) = match err {
            ListingError::BlankQuery => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ListingError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ListingError::Fetch(_) | ListingError::Status(_) | ListingError::Parse(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "UPSTREAM_ERROR")
            }
        };
        Self::new(status, code, err.to_string()).with_chain(err, expose_details)
    }

    /// HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Response body.
    #[must_use]
    pub const fn body(&self) -> &ErrorBody {
        &self.body
    }

    fn with_chain(mut self, err: &(dyn StdError + 'static), expose: bool) -> Self {
        if expose {
            let mut chain = Vec::new();
            let mut source = err.source();
            while let Some(cause) = source {
                chain.push(cause.to_string());
                source = cause.source();
            }
            if !chain.is_empty() {
                self.body.details = Some(chain.join(": "));
            }
        }
        self
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.body.error, message = %self.body.message, "Request failed");
        } else {
            tracing::debug!(code = self.body.error, message = %self.body.message, "Request rejected");
        }
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::BrokerError;
    use crate::application::services::UpstreamError;
    use crate::domain::subscription::MemberError;

    fn upstream() -> GatewayError {
        GatewayError::Upstream(UpstreamError::Broker(BrokerError::Network {
            message: "connection reset".to_string(),
        }))
    }

    #[test]
    fn gateway_errors_map_to_statuses() {
        let cases = [
            (GatewayError::Unauthorized, StatusCode::FORBIDDEN, "UNAUTHORIZED"),
            (
                GatewayError::InvalidMembers(MemberError::Empty),
                StatusCode::BAD_REQUEST,
                "INVALID_MEMBERS",
            ),
            (
                GatewayError::NotFound("NSE:NOPE".to_string()),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (upstream(), StatusCode::INTERNAL_SERVER_ERROR, "UPSTREAM_ERROR"),
        ];

        for (err, status, code) in cases {
            let api = ApiError::from_gateway(&err, false);
            assert_eq!(api.status(), status);
            assert_eq!(api.body().error, code);
        }
    }

    #[test]
    fn details_only_when_exposed() {
        let hidden = ApiError::from_gateway(&upstream(), false);
        assert!(hidden.body().details.is_none());

        let shown = ApiError::from_gateway(&upstream(), true);
        let details = shown.body().details.clone().unwrap();
        assert!(details.contains("connection reset"));
    }

    #[test]
    fn listing_errors_map_to_statuses() {
        let blank = ApiError::from_listing(&ListingError::BlankQuery, false);
        assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

        let missing = ApiError::from_listing(&ListingError::NotFound("XYZ".to_string()), false);
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let failed = ApiError::from_listing(&ListingError::Status(503), false);
        assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(failed.body().error, "UPSTREAM_ERROR");
    }

    #[test]
    fn details_are_omitted_from_json_when_absent() {
        let api = ApiError::bad_request("nope");
        let json = serde_json::to_value(api.body()).unwrap();
        assert_eq!(json["error"], "INVALID_REQUEST");
        assert!(json.get("details").is_none());
    }
}

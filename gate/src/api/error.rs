//! Error type for HTTP handlers.
//!
//! Bridges issuance and store errors to HTTP responses with a
//! `{code, message}` JSON body. Validation rejections do not use this type;
//! they are business outcomes with their own body.

use crate::issuance::IssuanceError;
use admission_core::ticket_store::TicketStoreError;
use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;

/// Application error type for HTTP handlers.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl ApiError {
    /// Create a new API error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: &'static str) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Attach an internal error for logging.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code of this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message.into(), "UNAUTHORIZED")
    }

    /// Create a 403 Forbidden error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message.into(), "FORBIDDEN")
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND",
        )
    }

    /// Create a 409 Conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>, code: &'static str) -> Self {
        Self::new(StatusCode::CONFLICT, message.into(), code)
    }

    /// Create a 422 Unprocessable Entity error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            message.into(),
            "VALIDATION_ERROR",
        )
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR",
        )
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "SERVICE_UNAVAILABLE",
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Internal server error"
                );
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<TicketStoreError> for ApiError {
    fn from(error: TicketStoreError) -> Self {
        match error {
            TicketStoreError::NotFound => {
                Self::new(StatusCode::NOT_FOUND, "Ticket not found".to_string(), "NOT_FOUND")
            }
            TicketStoreError::Unavailable(_) => {
                Self::unavailable("Ticket store unavailable").with_source(error)
            }
            TicketStoreError::OrderExists => {
                Self::conflict("Tickets already issued for this order", "ALREADY_ISSUED")
            }
            TicketStoreError::DuplicateKey | TicketStoreError::Corrupt(_) => {
                Self::internal("An internal error occurred").with_source(error)
            }
        }
    }
}

impl From<IssuanceError> for ApiError {
    fn from(error: IssuanceError) -> Self {
        match error {
            IssuanceError::EmptyOrder => Self::validation(error.to_string()),
            IssuanceError::AlreadyIssued(_) => Self::conflict(error.to_string(), "ALREADY_ISSUED"),
            IssuanceError::Store(store) => store.into(),
            IssuanceError::Entropy(_)
            | IssuanceError::KeyCollision { .. }
            | IssuanceError::Signing(_) => {
                Self::internal("Ticket issuance failed").with_source(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use admission_core::types::OrderId;

    #[test]
    fn test_error_display() {
        let err = ApiError::validation("Order has no admission units");
        assert_eq!(
            err.to_string(),
            "[VALIDATION_ERROR] Order has no admission units"
        );
    }

    #[test]
    fn test_not_found() {
        let err = ApiError::not_found("Ticket", 123);
        assert_eq!(err.to_string(), "[NOT_FOUND] Ticket with id 123 not found");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn store_outage_is_503() {
        let err = ApiError::from(TicketStoreError::Unavailable("down".to_string()));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!err.to_string().contains("down"));
    }

    #[test]
    fn existing_order_is_a_conflict() {
        let err = ApiError::from(TicketStoreError::OrderExists);
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "ALREADY_ISSUED");
    }

    #[test]
    fn issuance_errors_map_to_statuses() {
        assert_eq!(
            ApiError::from(IssuanceError::EmptyOrder).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(IssuanceError::AlreadyIssued(OrderId::new(1))).code(),
            "ALREADY_ISSUED"
        );
        assert_eq!(
            ApiError::from(IssuanceError::KeyCollision { attempts: 3 }).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(IssuanceError::Store(TicketStoreError::Unavailable(
                "down".to_string()
            )))
            .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}

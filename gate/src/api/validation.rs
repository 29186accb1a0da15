//! Gate validation API endpoints.
//!
//! - POST /api/validate/qr - Validate a scanned QR payload (operator token)
//! - POST /api/validate/manual - Validate a typed-in triple (operator token)
//!
//! Every business outcome, accepted or rejected, is a 200 with a
//! [`ValidationResponse`] body. The one exception is `STORE_UNAVAILABLE`,
//! returned with 503 so gate devices and load balancers treat it as a
//! retryable infrastructure failure.

use crate::api::error::ApiError;
use crate::auth::AuthenticatedOperator;
use crate::server::state::AppState;
use crate::validation::{
    AdmissionSummary, Credential, ManualEntry, PriorUse, RejectionReason, ValidationOutcome,
};
use admission_core::types::{EventId, OfferTypeId, OperatorId, TicketId};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response Types
// ============================================================================

/// QR path request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QrValidationRequest {
    /// Scanned payload, `primary_key|signature`
    pub qr_payload: String,
}

/// Manual path request.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ManualValidationRequest {
    /// Public identifier
    pub primary_key: String,
    /// Ticket secret
    pub secondary_key: String,
    /// Signature
    pub signature: String,
}

/// Result of one validation attempt.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    /// Admit the holder
    pub valid: bool,
    /// Operator-facing explanation
    pub reason: String,
    /// `ADMITTED` or a rejection code
    pub reason_code: String,
    /// Whether retrying the same credential may help
    pub retryable: bool,
    /// Gate display data (accepted only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_summary: Option<TicketSummary>,
    /// Earlier admission (`ALREADY_USED` only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_use: Option<PriorUseBody>,
}

/// Gate display data.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TicketSummary {
    /// Event title copied at issuance
    pub event_title: Option<String>,
    /// Ticket number (the ticket id)
    pub ticket_number: TicketId,
    /// Catalog event
    pub event_id: EventId,
    /// Catalog offer type
    pub offer_type_id: OfferTypeId,
    /// When this admission was recorded
    pub admitted_at: DateTime<Utc>,
}

/// Earlier admission details.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PriorUseBody {
    /// When
    pub used_at: Option<DateTime<Utc>>,
    /// By whom
    pub validated_by: Option<OperatorId>,
}

impl TicketSummary {
    fn new(summary: AdmissionSummary, admitted_at: DateTime<Utc>) -> Self {
        Self {
            event_title: summary.event_title,
            ticket_number: summary.ticket_id,
            event_id: summary.event_id,
            offer_type_id: summary.offer_type_id,
            admitted_at,
        }
    }
}

impl From<PriorUse> for PriorUseBody {
    fn from(prior: PriorUse) -> Self {
        Self {
            used_at: prior.used_at,
            validated_by: prior.validated_by,
        }
    }
}

impl From<ValidationOutcome> for ValidationResponse {
    fn from(outcome: ValidationOutcome) -> Self {
        match outcome {
            ValidationOutcome::Accepted { summary, used_at } => Self {
                valid: true,
                reason: "Admitted".to_string(),
                reason_code: "ADMITTED".to_string(),
                retryable: false,
                ticket_summary: Some(TicketSummary::new(summary, used_at)),
                prior_use: None,
            },
            ValidationOutcome::Rejected(rejection) => Self {
                valid: false,
                reason: rejection.reason.message().to_string(),
                reason_code: rejection.reason.code().to_string(),
                retryable: rejection.reason.is_retryable(),
                ticket_summary: None,
                prior_use: rejection.prior_use.map(PriorUseBody::from),
            },
        }
    }
}

fn respond(outcome: ValidationOutcome) -> Response {
    let status = if outcome.reason() == Some(RejectionReason::StoreUnavailable) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(ValidationResponse::from(outcome))).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// Validate a scanned QR payload.
///
/// # Errors
///
/// 401/403 for callers that are not admission operators, 422 for a body
/// that does not match the request schema.
pub async fn validate_qr(
    State(state): State<AppState>,
    AuthenticatedOperator(operator): AuthenticatedOperator,
    payload: Result<Json<QrValidationRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;

    let outcome = state
        .validator
        .validate(Credential::Qr(request.qr_payload), &operator)
        .await;

    Ok(respond(outcome))
}

/// Validate an operator-entered triple.
///
/// # Errors
///
/// 401/403 for callers that are not admission operators or when manual entry
/// is disabled, 422 for a body that does not match the request schema.
pub async fn validate_manual(
    State(state): State<AppState>,
    AuthenticatedOperator(operator): AuthenticatedOperator,
    payload: Result<Json<ManualValidationRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    if !state.manual_entry_enabled {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "Manual entry is disabled at this venue".to_string(),
            "MANUAL_ENTRY_DISABLED",
        ));
    }

    let Json(request) = payload?;
    let entry = ManualEntry {
        primary_key: request.primary_key,
        secondary_key: request.secondary_key,
        signature: request.signature,
    };

    let outcome = state
        .validator
        .validate(Credential::Manual(entry), &operator)
        .await;

    Ok(respond(outcome))
}

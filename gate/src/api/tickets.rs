//! Ticket API endpoints.
//!
//! - GET /api/tickets/:id - Ticket status lookup (operator token)
//! - POST /api/tickets/:id/void - Cancellation trigger (issuer token)
//!
//! Ticket views never carry the secondary key.

use crate::api::error::ApiError;
use crate::auth::{AuthenticatedIssuer, AuthenticatedOperator};
use crate::server::state::AppState;
use admission_core::ticket_store::{TicketStoreError, Transition};
use admission_core::types::{
    EventId, OfferTypeId, OperatorId, OrderId, Ticket, TicketId, TicketStatus,
};
use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Public view of a ticket.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketView {
    /// Ticket id (also the ticket number)
    pub ticket_id: TicketId,
    /// Originating order
    pub order_id: OrderId,
    /// Catalog event
    pub event_id: EventId,
    /// Catalog offer type
    pub offer_type_id: OfferTypeId,
    /// Event title
    pub event_title: Option<String>,
    /// `ISSUED`, `USED` or `VOID`
    pub status: TicketStatus,
    /// Issuance time
    pub issued_at: DateTime<Utc>,
    /// Admission time
    pub used_at: Option<DateTime<Utc>>,
    /// Admitting operator
    pub validated_by: Option<OperatorId>,
    /// Cancellation time
    pub voided_at: Option<DateTime<Utc>>,
}

impl From<Ticket> for TicketView {
    fn from(ticket: Ticket) -> Self {
        Self {
            ticket_id: ticket.ticket_id,
            order_id: ticket.order_id,
            event_id: ticket.event_id,
            offer_type_id: ticket.offer_type_id,
            event_title: ticket.event_title,
            status: ticket.status,
            issued_at: ticket.issued_at,
            used_at: ticket.used_at,
            validated_by: ticket.validated_by,
            voided_at: ticket.voided_at,
        }
    }
}

/// Look up a ticket's status.
///
/// # Errors
///
/// - 404: no such ticket
/// - 503: the ticket store is unavailable
pub async fn get_ticket(
    State(state): State<AppState>,
    _operator: AuthenticatedOperator,
    Path(ticket_id): Path<i64>,
) -> Result<Json<TicketView>, ApiError> {
    let ticket_id = TicketId::new(ticket_id);
    let ticket = state.store.get(ticket_id).await.map_err(|e| match e {
        TicketStoreError::NotFound => ApiError::not_found("Ticket", ticket_id),
        other => other.into(),
    })?;

    Ok(Json(ticket.into()))
}

/// Void a ticket (refund or cancellation).
///
/// # Errors
///
/// - 404: no such ticket
/// - 409 `TICKET_NOT_VOIDABLE`: the ticket is already used or void; nothing changed
/// - 503: the ticket store is unavailable
pub async fn void_ticket(
    State(state): State<AppState>,
    _issuer: AuthenticatedIssuer,
    Path(ticket_id): Path<i64>,
) -> Result<Json<TicketView>, ApiError> {
    let ticket_id = TicketId::new(ticket_id);
    let transition = state.issuer.void(ticket_id).await.map_err(|e| match e {
        TicketStoreError::NotFound => ApiError::not_found("Ticket", ticket_id),
        other => other.into(),
    })?;

    match transition {
        Transition::Applied(ticket) => Ok(Json(ticket.into())),
        Transition::Conflict(current) => Err(ApiError::conflict(
            format!("Ticket {ticket_id} is {} and cannot be voided", current.status),
            "TICKET_NOT_VOIDABLE",
        )),
    }
}

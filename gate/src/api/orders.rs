//! Order issuance API endpoints.
//!
//! Called by the order/payment subsystem with the issuer token:
//! - POST /api/orders/confirmed - Issue tickets for a confirmed order
//! - GET /api/orders/:id/tickets - Re-deliver an order's credentials

use crate::api::error::ApiError;
use crate::auth::AuthenticatedIssuer;
use crate::issuance::{IssuedTicket, OrderConfirmed};
use crate::server::state::AppState;
use admission_core::types::OrderId;
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Serialize;

/// Credentials for an order's tickets.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTicketsResponse {
    /// The order
    pub order_id: OrderId,
    /// One entry per admission unit
    pub tickets: Vec<IssuedTicket>,
}

/// Issue tickets for a confirmed order.
///
/// # Errors
///
/// - 422: malformed body or an order without units
/// - 409 `ALREADY_ISSUED`: the order already has tickets
/// - 503: the ticket store is unavailable
/// - 500: key generation failed
pub async fn confirm_order(
    State(state): State<AppState>,
    _issuer: AuthenticatedIssuer,
    payload: Result<Json<OrderConfirmed>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderTicketsResponse>), ApiError> {
    let Json(order) = payload?;
    let order_id = order.order_id;

    let tickets = state.issuer.issue(order).await?;

    Ok((
        StatusCode::CREATED,
        Json(OrderTicketsResponse { order_id, tickets }),
    ))
}

/// Re-deliver the credentials of every ticket of an order.
///
/// # Errors
///
/// - 404: the order has no tickets
/// - 503: the ticket store is unavailable
pub async fn list_order_tickets(
    State(state): State<AppState>,
    _issuer: AuthenticatedIssuer,
    Path(order_id): Path<i64>,
) -> Result<Json<OrderTicketsResponse>, ApiError> {
    let order_id = OrderId::new(order_id);
    let tickets = state.issuer.credentials_for_order(order_id).await?;

    if tickets.is_empty() {
        return Err(ApiError::not_found("Order", order_id));
    }

    Ok(Json(OrderTicketsResponse { order_id, tickets }))
}

//! Router configuration for the admission gate.
//!
//! Builds the complete Axum router with all endpoints.

use super::health::{health_check, metrics_endpoint, readiness_check};
use super::state::AppState;
use crate::api::{orders, tickets, validation};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the complete Axum router.
///
/// Configures all routes including:
/// - Health, readiness and metrics (no authentication)
/// - Issuance and cancellation (issuer token)
/// - Validation and ticket lookup (operator token)
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Order/payment subsystem
        .route("/orders/confirmed", post(orders::confirm_order))
        .route("/orders/:id/tickets", get(orders::list_order_tickets))
        .route("/tickets/:id/void", post(tickets::void_ticket))
        // Gate operators
        .route("/tickets/:id", get(tickets::get_ticket))
        .route("/validate/qr", post(validation::validate_qr))
        .route("/validate/manual", post(validation::validate_manual));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_endpoint))
        .nest("/api", api_routes)
        .with_state(state)
}

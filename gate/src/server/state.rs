//! Application state for the admission gate HTTP server.
//!
//! Contains all shared resources needed by HTTP handlers:
//! - Ticket store (for lookups and readiness)
//! - Issuer and validator services
//! - Operator directory and issuer token (for authorization)
//! - Prometheus handle (for `/metrics`)

use crate::auth::OperatorDirectory;
use crate::issuance::Issuer;
use crate::validation::Validator;
use admission_core::ticket_store::TicketStore;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned (cheaply via Arc) for each request. Holds no per-ticket state:
/// all mutable ticket state lives in the store.
#[derive(Clone)]
pub struct AppState {
    /// Authoritative ticket store
    pub store: Arc<dyn TicketStore>,

    /// Issues tickets for confirmed orders
    pub issuer: Issuer,

    /// Validates credentials at the gate
    pub validator: Validator,

    /// Resolves operator tokens
    pub operators: Arc<dyn OperatorDirectory>,

    /// Bearer token of the order/payment subsystem; issuer routes are closed when unset
    pub issuer_token: Option<Arc<str>>,

    /// Whether manual-entry validation is accepted
    pub manual_entry_enabled: bool,

    /// Prometheus recorder handle; `/metrics` is empty when unset
    pub metrics: Option<PrometheusHandle>,
}

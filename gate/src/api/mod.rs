//! API endpoints for the admission gate.
//!
//! This module contains all HTTP API handlers organized by caller:
//! - Orders: issuance and credential re-delivery (order/payment subsystem)
//! - Tickets: status lookup (operators) and cancellation (order/payment subsystem)
//! - Validation: QR and manual credential validation (operators)

pub mod error;
pub mod orders;
pub mod tickets;
pub mod validation;

pub use error::ApiError;
pub use orders::{confirm_order, list_order_tickets};
pub use tickets::{get_ticket, void_ticket};
pub use validation::{validate_manual, validate_qr};

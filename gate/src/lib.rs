//! Admission Gate - secure ticket issuance and single-use gate validation
//!
//! Turns a paid order line into an unforgeable admission credential and later
//! verifies that credential at the venue gate, admitting each ticket at most
//! once.
//!
//! # Architecture
//!
//! ```text
//!  order/payment subsystem                     gate devices
//!          │                                        │
//!          ▼                                        ▼
//!  POST /api/orders/confirmed            POST /api/validate/{qr,manual}
//!          │                                        │
//!  ┌───────────────┐                       ┌─────────────────┐
//!  │    Issuer     │                       │    Validator    │
//!  │ keys + signer │                       │ (stateless)     │
//!  └───────────────┘                       └─────────────────┘
//!          │ create                                 │ get_by_primary_key
//!          │                                        │ transition_to_used (CAS)
//!          └──────────────┬─────────────────────────┘
//!                         ▼
//!                ┌─────────────────┐
//!                │  Ticket Store   │
//!                │  (PostgreSQL)   │
//!                └─────────────────┘
//! ```
//!
//! # Single Use
//!
//! The store's compare-and-set transition is the only synchronization
//! primitive. Two devices scanning a photographed code at the same instant
//! both reach the store; exactly one is admitted and the other is told the
//! ticket was already used.
//!
//! # Modules
//!
//! - [`issuance`]: order confirmation to signed tickets
//! - [`validation`]: the validation state machine
//! - [`auth`]: operator and issuer authorization
//! - [`api`] / [`server`]: the HTTP surface
//! - [`config`], [`metrics`]: ambient setup

pub mod api;
pub mod auth;
pub mod config;
pub mod issuance;
pub mod metrics;
pub mod server;
pub mod validation;

pub use config::Config;
pub use issuance::{IssuanceError, Issuer};
pub use validation::{Credential, RejectionReason, ValidationOutcome, Validator};

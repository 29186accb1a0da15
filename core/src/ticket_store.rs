//! Ticket store trait and related types.
//!
//! The ticket store is the authoritative, durable record of every ticket and the
//! only place mutable ticket state lives. Validators and issuers hold no state
//! of their own; any number of them may run against one shared store.
//!
//! # Single use
//!
//! Admission is guarded by a single compare-and-set primitive:
//! [`TicketStore::transition_to_used`] changes `Issued → Used` only if the stored
//! status is still `Issued` at the moment of the write. Two gate devices
//! scanning a photographed QR code at the same instant both reach the store;
//! exactly one transition applies and the other observes a
//! [`Transition::Conflict`]. This must hold at the storage layer, not merely in
//! application code.
//!
//! # Order issuance
//!
//! [`TicketStore::create_order_tickets`] writes all tickets of an order or none
//! of them, and refuses an order that already has tickets. A confirmation
//! that fails midway leaves nothing behind and can be repeated.
//!
//! # Implementations
//!
//! - `PostgresTicketStore` (in `admission-postgres`): conditional `UPDATE ... RETURNING`,
//!   one transaction per order
//! - `InMemoryTicketStore` (in `admission-testing`): mutex-protected check-and-set
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the
//! store can be shared as `Arc<dyn TicketStore>` across request handlers.

use crate::types::{NewTicket, OperatorId, OrderId, PrimaryKey, Ticket, TicketId};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during ticket store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TicketStoreError {
    /// The primary key is already taken by another ticket.
    #[error("Duplicate primary key")]
    DuplicateKey,

    /// Tickets already exist for the order being issued.
    #[error("Tickets already exist for this order")]
    OrderExists,

    /// No ticket matches the given identifier or key.
    #[error("Ticket not found")]
    NotFound,

    /// The store could not be reached or the operation failed in transit.
    ///
    /// The only retryable store failure.
    #[error("Ticket store unavailable: {0}")]
    Unavailable(String),

    /// A stored record violates the ticket invariants.
    #[error("Corrupt ticket record: {0}")]
    Corrupt(String),
}

/// Result of a compare-and-set status transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// The stored status matched and the transition was written.
    ///
    /// Carries the record as it is after the write.
    Applied(Ticket),

    /// The stored status did not match; nothing was written.
    ///
    /// Carries the record as it was observed, so callers can report who used
    /// the ticket and when.
    Conflict(Ticket),
}

/// Boxed future returned by every store operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TicketStoreError>> + Send + 'a>>;

/// Durable keyed store of tickets.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one instance is shared by all request
/// handlers.
pub trait TicketStore: Send + Sync {
    /// Persist a new ticket in status `Issued` and assign its id.
    ///
    /// # Errors
    ///
    /// - `DuplicateKey`: the primary key collides with an existing ticket
    /// - `Unavailable`: the store could not be reached
    fn create(&self, ticket: NewTicket) -> StoreFuture<'_, TicketId>;

    /// Persist every ticket of one order, all or nothing.
    ///
    /// Each ticket is stored under `order_id`. Refused if any ticket already
    /// exists for the order. Concurrent calls for the same order are
    /// serialized, so at most one of them writes. On any error nothing is
    /// written and the call may be repeated with the same order.
    ///
    /// Returns the assigned ids in the order of `tickets`.
    ///
    /// # Errors
    ///
    /// - `OrderExists`: the order already has tickets
    /// - `DuplicateKey`: a primary key collides with a stored ticket or with
    ///   another ticket of the batch
    /// - `Unavailable`: the store could not be reached
    fn create_order_tickets(
        &self,
        order_id: OrderId,
        tickets: Vec<NewTicket>,
    ) -> StoreFuture<'_, Vec<TicketId>>;

    /// Load a ticket by id.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no such ticket
    /// - `Unavailable`, `Corrupt`
    fn get(&self, ticket_id: TicketId) -> StoreFuture<'_, Ticket>;

    /// Load a ticket by its public primary key.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no ticket carries this key
    /// - `Unavailable`, `Corrupt`
    fn get_by_primary_key<'a>(&'a self, primary_key: &'a PrimaryKey) -> StoreFuture<'a, Ticket>;

    /// Load every ticket issued for an order, oldest first.
    ///
    /// # Errors
    ///
    /// - `Unavailable`, `Corrupt`
    fn list_by_order(&self, order_id: OrderId) -> StoreFuture<'_, Vec<Ticket>>;

    /// Atomically change `Issued → Used`, recording `used_at` and the operator.
    ///
    /// This MUST be a single compare-and-set against the stored status, never a
    /// read followed by a write. If the stored status is not `Issued` at the
    /// moment of the write, returns [`Transition::Conflict`] with the observed
    /// record.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no such ticket
    /// - `Unavailable`, `Corrupt`
    fn transition_to_used<'a>(
        &'a self,
        ticket_id: TicketId,
        operator: &'a OperatorId,
        used_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Transition>;

    /// Atomically change `Issued → Void` (refund or cancellation).
    ///
    /// Same compare-and-set discipline as [`TicketStore::transition_to_used`]:
    /// voiding a `Used` or already `Void` ticket yields
    /// [`Transition::Conflict`] and changes nothing.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no such ticket
    /// - `Unavailable`, `Corrupt`
    fn void(&self, ticket_id: TicketId, voided_at: DateTime<Utc>) -> StoreFuture<'_, Transition>;

    /// Check that the store is reachable.
    ///
    /// # Errors
    ///
    /// - `Unavailable`
    fn ping(&self) -> StoreFuture<'_, ()>;
}

//! Domain types for ticket issuance and validation.
//!
//! Identifiers owned by other subsystems (orders, catalog events, offer types)
//! are held here as plain back-references; this crate never resolves them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Store-assigned ticket identifier. Never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(i64);

impl TicketId {
    /// Wrap a raw identifier
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw identifier
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to the originating order (owned by the order/payment subsystem).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(i64);

impl OrderId {
    /// Wrap a raw identifier
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw identifier
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a catalog event, copied at issuance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(i64);

impl EventId {
    /// Wrap a raw identifier
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw identifier
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a catalog offer type (price tier), copied at issuance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfferTypeId(i64);

impl OfferTypeId {
    /// Wrap a raw identifier
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw identifier
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for OfferTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the admission operator or gate device performing a validation.
///
/// Always passed explicitly per request; recorded on the ticket for audit.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperatorId(String);

impl OperatorId {
    /// Parse an operator identifier, rejecting blank input.
    #[must_use]
    pub fn parse(id: &str) -> Option<Self> {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Get the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Key material
// ============================================================================

/// Public ticket identifier, transmitted in every credential.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrimaryKey(String);

impl PrimaryKey {
    /// Wrap an already-validated key string
    #[must_use]
    pub const fn new(key: String) -> Self {
        Self(key)
    }

    /// Get the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-ticket secret keying the signature. Never part of the QR payload.
///
/// `Debug` is redacted and there is no `Display`, so the secret cannot leak
/// through logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecondaryKey(String);

impl SecondaryKey {
    /// Wrap an already-validated key string
    #[must_use]
    pub const fn new(key: String) -> Self {
        Self(key)
    }

    /// Expose the secret. Callers must not log the result.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecondaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecondaryKey(<redacted>)")
    }
}

/// Keyed-MAC proof over a ticket's identity and issued attributes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    /// Wrap a signature string
    #[must_use]
    pub const fn new(signature: String) -> Self {
        Self(signature)
    }

    /// Get the signature as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Ticket
// ============================================================================

/// Lifecycle status of a ticket.
///
/// Transitions are monotonic: `Issued → Used` once, or `Issued → Void`. Nothing
/// ever returns to `Issued`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    /// Valid for admission
    Issued,
    /// Admitted once; never admits again
    Used,
    /// Cancelled or refunded
    Void,
}

impl TicketStatus {
    /// Convert status to its storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::Used => "used",
            Self::Void => "void",
        }
    }

    /// Parse status from its storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "issued" => Some(Self::Issued),
            "used" => Some(Self::Used),
            "void" => Some(Self::Void),
            _ => None,
        }
    }

    /// Whether `self → next` is a permitted transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!((self, next), (Self::Issued, Self::Used | Self::Void))
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ticket about to be created. The store assigns the id and sets `Issued`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTicket {
    /// Originating order
    pub order_id: OrderId,
    /// Catalog event, denormalized
    pub event_id: EventId,
    /// Catalog offer type, denormalized
    pub offer_type_id: OfferTypeId,
    /// Display title for the gate, denormalized
    pub event_title: Option<String>,
    /// Price paid for this admission unit
    pub unit_price: Money,
    /// Public identifier
    pub primary_key: PrimaryKey,
    /// Signing secret
    pub secondary_key: SecondaryKey,
    /// Issuance timestamp (part of the signed message)
    pub issued_at: DateTime<Utc>,
}

/// The authoritative record for one admission unit.
///
/// The signature is deliberately absent: it is recomputed from these fields
/// and the secondary key whenever it is needed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ticket {
    /// Store-assigned identifier
    pub ticket_id: TicketId,
    /// Originating order
    pub order_id: OrderId,
    /// Catalog event
    pub event_id: EventId,
    /// Catalog offer type
    pub offer_type_id: OfferTypeId,
    /// Display title for the gate
    pub event_title: Option<String>,
    /// Price paid
    pub unit_price: Money,
    /// Public identifier
    pub primary_key: PrimaryKey,
    /// Signing secret
    pub secondary_key: SecondaryKey,
    /// Current lifecycle status
    pub status: TicketStatus,
    /// When the ticket was issued
    pub issued_at: DateTime<Utc>,
    /// When the ticket was admitted (set exactly once, with `Used`)
    pub used_at: Option<DateTime<Utc>>,
    /// Who admitted the ticket
    pub validated_by: Option<OperatorId>,
    /// When the ticket was voided (set exactly once, with `Void`)
    pub voided_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Materialize a freshly created record.
    #[must_use]
    pub fn issued(ticket_id: TicketId, new: NewTicket) -> Self {
        Self {
            ticket_id,
            order_id: new.order_id,
            event_id: new.event_id,
            offer_type_id: new.offer_type_id,
            event_title: new.event_title,
            unit_price: new.unit_price,
            primary_key: new.primary_key,
            secondary_key: new.secondary_key,
            status: TicketStatus::Issued,
            issued_at: new.issued_at,
            used_at: None,
            validated_by: None,
            voided_at: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [TicketStatus::Issued, TicketStatus::Used, TicketStatus::Void] {
            assert_eq!(TicketStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TicketStatus::parse("ISSUED"), None);
    }

    #[test]
    fn status_transitions_are_monotonic() {
        use TicketStatus::{Issued, Used, Void};

        assert!(Issued.can_transition_to(Used));
        assert!(Issued.can_transition_to(Void));
        assert!(!Used.can_transition_to(Issued));
        assert!(!Used.can_transition_to(Void));
        assert!(!Void.can_transition_to(Used));
        assert!(!Void.can_transition_to(Issued));
        assert!(!Issued.can_transition_to(Issued));
    }

    #[test]
    fn secondary_key_debug_is_redacted() {
        let key = SecondaryKey::new("super-secret-value".to_string());
        let rendered = format!("{key:?}");
        assert!(!rendered.contains("super-secret-value"));
    }

    #[test]
    fn operator_id_rejects_blank() {
        assert!(OperatorId::parse("   ").is_none());
        assert_eq!(
            OperatorId::parse(" gate-a ").map(|o| o.as_str().to_string()),
            Some("gate-a".to_string())
        );
    }

    #[test]
    fn status_serializes_in_upper_case() {
        let json = serde_json::to_string(&TicketStatus::Used).unwrap();
        assert_eq!(json, "\"USED\"");
    }

    #[test]
    fn id_accessors_work_as_function_values() {
        let ticket: Option<TicketId> = Some(TicketId::new(7));
        assert_eq!(ticket.map(TicketId::get), Some(7));
        assert_eq!(Some(OrderId::new(8)).map(OrderId::get), Some(8));
        assert_eq!(Some(EventId::new(42)).map(EventId::get), Some(42));
        assert_eq!(Some(OfferTypeId::new(3)).map(OfferTypeId::get), Some(3));
    }

    #[test]
    fn money_displays_cents() {
        assert_eq!(Money::from_cents(4250).to_string(), "42.50");
    }
}

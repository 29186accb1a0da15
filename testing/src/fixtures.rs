//! Ticket fixtures.
//!
//! Seed signed tickets straight into a store, bypassing the issuer, so
//! validation tests start from a known record.

use admission_core::credential::{ManualCredential, encode_qr, manual_form};
use admission_core::environment::{Clock, OsEntropy};
use admission_core::keys::KeyMaterialGenerator;
use admission_core::signer::{SignedFields, Signer};
use admission_core::ticket_store::TicketStore;
use admission_core::types::{
    EventId, Money, NewTicket, OfferTypeId, OrderId, PrimaryKey, SecondaryKey, Signature,
    TicketId,
};
use chrono::{DateTime, SubsecRound, Utc};
use std::sync::Arc;

/// Everything a test needs to present a seeded ticket.
#[derive(Clone, Debug)]
pub struct SeededTicket {
    /// Store-assigned id
    pub ticket_id: TicketId,
    /// Public identifier
    pub primary_key: PrimaryKey,
    /// Signing secret
    pub secondary_key: SecondaryKey,
    /// Signature over the ticket attributes
    pub signature: Signature,
    /// `primary_key|signature`
    pub qr_payload: String,
    /// Signed event
    pub event_id: EventId,
    /// Signed offer type
    pub offer_type_id: OfferTypeId,
    /// Signed issuance time
    pub issued_at: DateTime<Utc>,
}

impl SeededTicket {
    /// The manual-entry triple for this ticket.
    #[must_use]
    pub fn manual(&self) -> ManualCredential {
        manual_form(&self.primary_key, &self.secondary_key, &self.signature)
    }
}

/// Issue, sign and store one ticket for order 1.
///
/// # Panics
///
/// Panics if the OS entropy source or the store fails. Fixtures are for
/// tests, where a failure here is a broken test setup.
#[allow(clippy::expect_used)]
pub async fn seed_ticket(
    store: &dyn TicketStore,
    clock: &dyn Clock,
    event_id: i64,
    offer_type_id: i64,
) -> SeededTicket {
    let keys = KeyMaterialGenerator::new(Arc::new(OsEntropy))
        .generate()
        .expect("os entropy should be available in tests");
    let issued_at = clock.now().trunc_subsecs(6);
    let event_id = EventId::new(event_id);
    let offer_type_id = OfferTypeId::new(offer_type_id);

    let signature = Signer::new()
        .sign(
            &SignedFields {
                primary_key: &keys.primary_key,
                event_id,
                offer_type_id,
                issued_at,
            },
            &keys.secondary_key,
        )
        .expect("generated keys are never empty");

    let ticket_id = store
        .create(NewTicket {
            order_id: OrderId::new(1),
            event_id,
            offer_type_id,
            event_title: Some("Fixture Night".to_string()),
            unit_price: Money::from_cents(2_500),
            primary_key: keys.primary_key.clone(),
            secondary_key: keys.secondary_key.clone(),
            issued_at,
        })
        .await
        .expect("seeding a fresh ticket should succeed");

    SeededTicket {
        ticket_id,
        qr_payload: encode_qr(&keys.primary_key, &signature),
        primary_key: keys.primary_key,
        secondary_key: keys.secondary_key,
        signature,
        event_id,
        offer_type_id,
        issued_at,
    }
}

/// An unsigned `NewTicket` with a chosen primary key, for store-level tests.
#[must_use]
pub fn new_ticket(primary_key: &str, order_id: i64) -> NewTicket {
    NewTicket {
        order_id: OrderId::new(order_id),
        event_id: EventId::new(42),
        offer_type_id: OfferTypeId::new(3),
        event_title: None,
        unit_price: Money::from_cents(1_000),
        primary_key: PrimaryKey::new(primary_key.to_string()),
        secondary_key: SecondaryKey::new(format!("{primary_key}-secret")),
        issued_at: DateTime::<Utc>::UNIX_EPOCH,
    }
}

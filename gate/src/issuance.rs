//! Ticket issuance.
//!
//! Turns a confirmed order into one signed, stored ticket per admission unit.
//! An order's tickets are stored all or nothing, and the store admits at most
//! one issuance per order. A primary key collision is detected by the store's
//! uniqueness constraint; the issuer answers it by regenerating the order's
//! keys a bounded number of times.

use admission_core::credential::encode_qr;
use admission_core::environment::{Clock, EntropyError};
use admission_core::keys::KeyMaterialGenerator;
use admission_core::signer::{SignedFields, Signer, SignerError};
use admission_core::ticket_store::{TicketStore, TicketStoreError, Transition};
use admission_core::types::{
    EventId, Money, NewTicket, OfferTypeId, OrderId, PrimaryKey, SecondaryKey, Signature, Ticket,
    TicketId,
};
use chrono::SubsecRound;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Order-confirmed call from the order/payment subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OrderConfirmed {
    /// Originating order
    pub order_id: OrderId,
    /// One entry per admission unit (quantity 3 means three entries)
    pub units: Vec<AdmissionUnit>,
}

/// One purchased admission unit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AdmissionUnit {
    /// Catalog event
    pub event_id: EventId,
    /// Catalog offer type
    pub offer_type_id: OfferTypeId,
    /// Price paid, in cents
    pub unit_price: Money,
    /// Event title shown at the gate
    #[serde(default)]
    pub event_title: Option<String>,
}

/// Credentials for one issued ticket, for downstream delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedTicket {
    /// Store-assigned id
    pub ticket_id: TicketId,
    /// Public identifier
    pub primary_key: PrimaryKey,
    /// Signing secret, for the manual-entry form
    pub secondary_key: SecondaryKey,
    /// Signature over the ticket attributes
    pub signature: Signature,
    /// `primary_key|signature`
    pub qr_payload: String,
}

/// Issuance failures.
#[derive(Error, Debug)]
pub enum IssuanceError {
    /// The order carries no admission units.
    #[error("Order has no admission units")]
    EmptyOrder,

    /// Tickets already exist for this order.
    #[error("Tickets already issued for order {0}")]
    AlreadyIssued(OrderId),

    /// The entropy source failed. Never substituted with weaker randomness.
    #[error("Key generation failed: {0}")]
    Entropy(#[from] EntropyError),

    /// Every attempt produced a primary key that already exists.
    #[error("Primary key collided on all {attempts} attempts")]
    KeyCollision {
        /// Attempts made
        attempts: u32,
    },

    /// The signer rejected the generated key.
    #[error("Signing failed: {0}")]
    Signing(#[from] SignerError),

    /// The ticket store failed.
    #[error(transparent)]
    Store(#[from] TicketStoreError),
}

/// Issues tickets for confirmed orders.
#[derive(Clone)]
pub struct Issuer {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    keys: KeyMaterialGenerator,
    signer: Signer,
    max_attempts: u32,
}

/// A signed ticket that has not been stored yet.
struct Prepared {
    ticket: NewTicket,
    signature: Signature,
}

impl Prepared {
    fn into_issued(self, ticket_id: TicketId) -> IssuedTicket {
        IssuedTicket {
            ticket_id,
            qr_payload: encode_qr(&self.ticket.primary_key, &self.signature),
            primary_key: self.ticket.primary_key,
            secondary_key: self.ticket.secondary_key,
            signature: self.signature,
        }
    }
}

impl Issuer {
    /// Create an issuer.
    ///
    /// `max_attempts` bounds key regeneration per order and is clamped to at
    /// least one.
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        clock: Arc<dyn Clock>,
        keys: KeyMaterialGenerator,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            clock,
            keys,
            signer: Signer::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Issue one ticket per admission unit of a confirmed order.
    ///
    /// The order's tickets are written in one store call, so either all of
    /// them exist afterwards or none do, and a failed call can be repeated.
    /// A second confirmation of the same order, sequential or concurrent, is
    /// refused by the store rather than minting extra admissions.
    ///
    /// On a primary key collision the whole order is prepared again with
    /// fresh keys, up to `max_attempts` times.
    ///
    /// # Errors
    ///
    /// - [`IssuanceError::EmptyOrder`]: no units
    /// - [`IssuanceError::AlreadyIssued`]: the order already has tickets
    /// - [`IssuanceError::Entropy`], [`IssuanceError::KeyCollision`]: key generation failed
    /// - [`IssuanceError::Store`]: the store failed; nothing was written
    pub async fn issue(&self, order: OrderConfirmed) -> Result<Vec<IssuedTicket>, IssuanceError> {
        if order.units.is_empty() {
            return Err(IssuanceError::EmptyOrder);
        }
        let order_id = order.order_id;

        for attempt in 1..=self.max_attempts {
            let prepared = order
                .units
                .iter()
                .map(|unit| self.prepare(order_id, unit))
                .collect::<Result<Vec<_>, _>>()?;
            let tickets = prepared.iter().map(|p| p.ticket.clone()).collect();

            match self.store.create_order_tickets(order_id, tickets).await {
                Ok(ticket_ids) => {
                    let issued: Vec<IssuedTicket> = prepared
                        .into_iter()
                        .zip(ticket_ids)
                        .map(|(p, ticket_id)| p.into_issued(ticket_id))
                        .collect();

                    metrics::counter!("admission_tickets_issued_total")
                        .increment(issued.len() as u64);
                    tracing::info!(
                        order_id = order_id.get(),
                        tickets = issued.len(),
                        "Tickets issued"
                    );
                    return Ok(issued);
                }
                Err(TicketStoreError::DuplicateKey) => {
                    metrics::counter!("admission_key_collisions_total").increment(1);
                    tracing::error!(
                        order_id = order_id.get(),
                        attempt,
                        max_attempts = self.max_attempts,
                        "Primary key collision during issuance"
                    );
                }
                Err(TicketStoreError::OrderExists) => {
                    tracing::warn!(
                        order_id = order_id.get(),
                        "Duplicate order confirmation refused"
                    );
                    return Err(IssuanceError::AlreadyIssued(order_id));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(IssuanceError::KeyCollision {
            attempts: self.max_attempts,
        })
    }

    /// Draw keys for one unit and sign it.
    fn prepare(&self, order_id: OrderId, unit: &AdmissionUnit) -> Result<Prepared, IssuanceError> {
        let keys = self.keys.generate()?;
        let issued_at = self.clock.now().trunc_subsecs(6);
        let signature = self.signer.sign(
            &SignedFields {
                primary_key: &keys.primary_key,
                event_id: unit.event_id,
                offer_type_id: unit.offer_type_id,
                issued_at,
            },
            &keys.secondary_key,
        )?;

        Ok(Prepared {
            ticket: NewTicket {
                order_id,
                event_id: unit.event_id,
                offer_type_id: unit.offer_type_id,
                event_title: unit.event_title.clone(),
                unit_price: unit.unit_price,
                primary_key: keys.primary_key,
                secondary_key: keys.secondary_key,
                issued_at,
            },
            signature,
        })
    }

    /// Rebuild the credentials of every ticket of an order.
    ///
    /// Signatures are recomputed from the stored fields.
    ///
    /// # Errors
    ///
    /// [`IssuanceError::Store`] if the store fails, [`IssuanceError::Signing`]
    /// if a stored secret is unusable.
    pub async fn credentials_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<IssuedTicket>, IssuanceError> {
        let tickets = self.store.list_by_order(order_id).await?;
        tickets.into_iter().map(|t| self.credentials(t)).collect()
    }

    fn credentials(&self, ticket: Ticket) -> Result<IssuedTicket, IssuanceError> {
        let signature = self.signer.sign(
            &SignedFields {
                primary_key: &ticket.primary_key,
                event_id: ticket.event_id,
                offer_type_id: ticket.offer_type_id,
                issued_at: ticket.issued_at,
            },
            &ticket.secondary_key,
        )?;

        Ok(IssuedTicket {
            ticket_id: ticket.ticket_id,
            qr_payload: encode_qr(&ticket.primary_key, &signature),
            primary_key: ticket.primary_key,
            secondary_key: ticket.secondary_key,
            signature,
        })
    }

    /// Void a ticket (refund or cancellation).
    ///
    /// Returns the store's compare-and-set result: `Applied` when the ticket
    /// was `Issued`, `Conflict` with the unchanged record otherwise.
    ///
    /// # Errors
    ///
    /// [`TicketStoreError::NotFound`] for an unknown ticket, or any other
    /// store failure.
    pub async fn void(&self, ticket_id: TicketId) -> Result<Transition, TicketStoreError> {
        let transition = self.store.void(ticket_id, self.clock.now()).await?;

        match &transition {
            Transition::Applied(_) => {
                metrics::counter!("admission_tickets_voided_total", "result" => "voided")
                    .increment(1);
                tracing::info!(ticket_id = ticket_id.get(), "Ticket voided");
            }
            Transition::Conflict(current) => {
                metrics::counter!("admission_tickets_voided_total", "result" => "refused")
                    .increment(1);
                tracing::info!(
                    ticket_id = ticket_id.get(),
                    status = current.status.as_str(),
                    "Void refused: ticket not issued"
                );
            }
        }

        Ok(transition)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use admission_core::environment::OsEntropy;
    use admission_core::types::TicketStatus;
    use admission_testing::{
        FailingEntropy, FlakyTicketStore, InMemoryTicketStore, ScriptedEntropy,
        UnavailableTicketStore, test_clock,
    };

    fn unit(event_id: i64, offer_type_id: i64) -> AdmissionUnit {
        AdmissionUnit {
            event_id: EventId::new(event_id),
            offer_type_id: OfferTypeId::new(offer_type_id),
            unit_price: Money::from_cents(4_500),
            event_title: Some("Night Market".to_string()),
        }
    }

    fn order(order_id: i64, units: Vec<AdmissionUnit>) -> OrderConfirmed {
        OrderConfirmed {
            order_id: OrderId::new(order_id),
            units,
        }
    }

    fn issuer(store: Arc<dyn TicketStore>, keys: KeyMaterialGenerator) -> Issuer {
        Issuer::new(store, Arc::new(test_clock()), keys, 3)
    }

    #[tokio::test]
    async fn issues_one_ticket_per_unit() {
        let store = InMemoryTicketStore::new();
        let issuer = issuer(
            Arc::new(store.clone()),
            KeyMaterialGenerator::new(Arc::new(OsEntropy)),
        );

        let issued = issuer
            .issue(order(7, vec![unit(42, 3), unit(42, 3), unit(43, 1)]))
            .await
            .unwrap();

        assert_eq!(issued.len(), 3);
        assert_eq!(store.len(), 3);
        for ticket in &issued {
            let stored = store.snapshot(ticket.ticket_id).unwrap();
            assert_eq!(stored.status, TicketStatus::Issued);
            assert_eq!(stored.order_id, OrderId::new(7));
            assert_eq!(
                ticket.qr_payload,
                format!("{}|{}", ticket.primary_key, ticket.signature)
            );
            assert!(!ticket.qr_payload.contains(ticket.secondary_key.expose()));
        }
    }

    #[tokio::test]
    async fn empty_order_is_refused() {
        let issuer = issuer(
            Arc::new(InMemoryTicketStore::new()),
            KeyMaterialGenerator::new(Arc::new(OsEntropy)),
        );

        let result = issuer.issue(order(1, vec![])).await;
        assert!(matches!(result, Err(IssuanceError::EmptyOrder)));
    }

    #[tokio::test]
    async fn duplicate_confirmation_is_refused() {
        let store = InMemoryTicketStore::new();
        let issuer = issuer(
            Arc::new(store.clone()),
            KeyMaterialGenerator::new(Arc::new(OsEntropy)),
        );

        issuer.issue(order(9, vec![unit(1, 1)])).await.unwrap();
        let again = issuer.issue(order(9, vec![unit(1, 1)])).await;

        assert!(matches!(again, Err(IssuanceError::AlreadyIssued(id)) if id == OrderId::new(9)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn collision_is_retried_with_fresh_keys() {
        let store = InMemoryTicketStore::new();
        // Draws: (1, 2) and (1, 3) share a primary key, so the order is
        // prepared again with (4, 5) and (6, 7).
        let entropy = ScriptedEntropy::new(vec![1, 2, 1, 3, 4, 5, 6, 7]);
        let issuer = issuer(
            Arc::new(store.clone()),
            KeyMaterialGenerator::new(Arc::new(entropy)),
        );

        let issued = issuer
            .issue(order(1, vec![unit(1, 1), unit(1, 1)]))
            .await
            .unwrap();

        assert_eq!(issued.len(), 2);
        assert_ne!(issued[0].primary_key, issued[1].primary_key);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn exhausted_collisions_fail_loudly() {
        let store = InMemoryTicketStore::new();
        let issuer = issuer(
            Arc::new(store.clone()),
            KeyMaterialGenerator::new(Arc::new(ScriptedEntropy::constant(7))),
        );

        let result = issuer.issue(order(1, vec![unit(1, 1), unit(1, 1)])).await;

        assert!(matches!(
            result,
            Err(IssuanceError::KeyCollision { attempts: 3 })
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn entropy_failure_is_fatal() {
        let store = InMemoryTicketStore::new();
        let issuer = issuer(
            Arc::new(store.clone()),
            KeyMaterialGenerator::new(Arc::new(FailingEntropy)),
        );

        let result = issuer.issue(order(1, vec![unit(1, 1)])).await;

        assert!(matches!(result, Err(IssuanceError::Entropy(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn store_outage_surfaces() {
        let issuer = issuer(
            Arc::new(UnavailableTicketStore),
            KeyMaterialGenerator::new(Arc::new(OsEntropy)),
        );

        let result = issuer.issue(order(1, vec![unit(1, 1)])).await;
        assert!(matches!(
            result,
            Err(IssuanceError::Store(TicketStoreError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn transient_store_failure_leaves_no_partial_order() {
        let store = InMemoryTicketStore::new();
        let issuer = issuer(
            Arc::new(FlakyTicketStore::new(store.clone(), 1)),
            KeyMaterialGenerator::new(Arc::new(OsEntropy)),
        );
        let confirmed = order(4, vec![unit(42, 3), unit(42, 3), unit(42, 3)]);

        let first = issuer.issue(confirmed.clone()).await;
        assert!(matches!(
            first,
            Err(IssuanceError::Store(TicketStoreError::Unavailable(_)))
        ));
        assert!(store.is_empty());

        let retried = issuer.issue(confirmed).await.unwrap();
        assert_eq!(retried.len(), 3);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_confirmations_issue_once() {
        let store = InMemoryTicketStore::new();
        let issuer = issuer(
            Arc::new(store.clone()),
            KeyMaterialGenerator::new(Arc::new(OsEntropy)),
        );

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let issuer = issuer.clone();
                tokio::spawn(async move {
                    issuer.issue(order(12, vec![unit(42, 3), unit(42, 3)])).await
                })
            })
            .collect();

        let mut issued = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(tickets) => {
                    assert_eq!(tickets.len(), 2);
                    issued += 1;
                }
                Err(e) => assert!(matches!(e, IssuanceError::AlreadyIssued(_))),
            }
        }

        assert_eq!(issued, 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn credentials_are_recomputed_identically() {
        let store = InMemoryTicketStore::new();
        let issuer = issuer(
            Arc::new(store),
            KeyMaterialGenerator::new(Arc::new(OsEntropy)),
        );

        let issued = issuer.issue(order(5, vec![unit(42, 3)])).await.unwrap();
        let redelivered = issuer.credentials_for_order(OrderId::new(5)).await.unwrap();

        assert_eq!(issued, redelivered);
    }

    #[tokio::test]
    async fn void_applies_once() {
        let store = InMemoryTicketStore::new();
        let issuer = issuer(
            Arc::new(store.clone()),
            KeyMaterialGenerator::new(Arc::new(OsEntropy)),
        );
        let issued = issuer.issue(order(5, vec![unit(42, 3)])).await.unwrap();
        let ticket_id = issued[0].ticket_id;

        assert!(matches!(
            issuer.void(ticket_id).await.unwrap(),
            Transition::Applied(_)
        ));
        assert!(matches!(
            issuer.void(ticket_id).await.unwrap(),
            Transition::Conflict(_)
        ));
        assert_eq!(
            issuer.void(TicketId::new(99)).await,
            Err(TicketStoreError::NotFound)
        );
    }

    #[test]
    fn order_schema_is_strict() {
        let valid = r#"{"orderId":1,"units":[{"eventId":42,"offerTypeId":3,"unitPrice":2500}]}"#;
        let parsed: OrderConfirmed = serde_json::from_str(valid).unwrap();
        assert_eq!(parsed.units[0].event_title, None);

        let extra = r#"{"orderId":1,"units":[],"data":{}}"#;
        assert!(serde_json::from_str::<OrderConfirmed>(extra).is_err());

        let nested = r#"{"order":{"orderId":1,"units":[]}}"#;
        assert!(serde_json::from_str::<OrderConfirmed>(nested).is_err());
    }
}

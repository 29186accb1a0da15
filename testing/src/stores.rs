//! Ticket store doubles.

use admission_core::ticket_store::{StoreFuture, TicketStore, TicketStoreError, Transition};
use admission_core::types::{
    NewTicket, OperatorId, OrderId, PrimaryKey, Ticket, TicketId, TicketStatus,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tickets {
    by_id: BTreeMap<TicketId, Ticket>,
    by_primary_key: HashMap<PrimaryKey, TicketId>,
    last_id: i64,
}

impl Tickets {
    fn insert(&mut self, ticket: NewTicket) -> TicketId {
        self.last_id += 1;
        let ticket_id = TicketId::new(self.last_id);
        self.by_primary_key
            .insert(ticket.primary_key.clone(), ticket_id);
        self.by_id.insert(ticket_id, Ticket::issued(ticket_id, ticket));
        ticket_id
    }
}

/// In-memory ticket store.
///
/// Every operation runs under one mutex, so the status check and the status
/// write of a transition can never interleave with another request. That is
/// the same guarantee the durable store gets from a conditional `UPDATE`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTicketStore {
    tickets: Arc<Mutex<Tickets>>,
}

impl InMemoryTicketStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tickets (for testing).
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().map_or(0, |t| t.by_id.len())
    }

    /// Whether the store is empty (for testing).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current copy of a ticket, bypassing the async interface (for testing).
    #[must_use]
    pub fn snapshot(&self, ticket_id: TicketId) -> Option<Ticket> {
        self.lock().ok()?.by_id.get(&ticket_id).cloned()
    }

    /// Overwrite a stored record as-is (for testing tamper and corruption).
    pub fn overwrite(&self, ticket: Ticket) {
        if let Ok(mut tickets) = self.lock() {
            tickets
                .by_primary_key
                .insert(ticket.primary_key.clone(), ticket.ticket_id);
            tickets.by_id.insert(ticket.ticket_id, ticket);
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tickets>, TicketStoreError> {
        self.tickets
            .lock()
            .map_err(|_| TicketStoreError::Unavailable("ticket map lock poisoned".to_string()))
    }

    fn compare_and_set(
        &self,
        ticket_id: TicketId,
        apply: impl FnOnce(&mut Ticket),
        next: TicketStatus,
    ) -> Result<Transition, TicketStoreError> {
        let mut tickets = self.lock()?;
        let ticket = tickets
            .by_id
            .get_mut(&ticket_id)
            .ok_or(TicketStoreError::NotFound)?;

        if !ticket.status.can_transition_to(next) {
            return Ok(Transition::Conflict(ticket.clone()));
        }

        ticket.status = next;
        apply(ticket);
        Ok(Transition::Applied(ticket.clone()))
    }
}

impl TicketStore for InMemoryTicketStore {
    fn create(&self, ticket: NewTicket) -> StoreFuture<'_, TicketId> {
        Box::pin(async move {
            let mut tickets = self.lock()?;
            if tickets.by_primary_key.contains_key(&ticket.primary_key) {
                return Err(TicketStoreError::DuplicateKey);
            }
            Ok(tickets.insert(ticket))
        })
    }

    fn create_order_tickets(
        &self,
        order_id: OrderId,
        batch: Vec<NewTicket>,
    ) -> StoreFuture<'_, Vec<TicketId>> {
        Box::pin(async move {
            let mut tickets = self.lock()?;
            if tickets.by_id.values().any(|t| t.order_id == order_id) {
                return Err(TicketStoreError::OrderExists);
            }

            // Validate the whole batch before the first write.
            {
                let mut keys = HashSet::with_capacity(batch.len());
                for ticket in &batch {
                    if tickets.by_primary_key.contains_key(&ticket.primary_key)
                        || !keys.insert(&ticket.primary_key)
                    {
                        return Err(TicketStoreError::DuplicateKey);
                    }
                }
            }

            Ok(batch
                .into_iter()
                .map(|ticket| tickets.insert(NewTicket { order_id, ..ticket }))
                .collect())
        })
    }

    fn get(&self, ticket_id: TicketId) -> StoreFuture<'_, Ticket> {
        Box::pin(async move {
            self.lock()?
                .by_id
                .get(&ticket_id)
                .cloned()
                .ok_or(TicketStoreError::NotFound)
        })
    }

    fn get_by_primary_key<'a>(&'a self, primary_key: &'a PrimaryKey) -> StoreFuture<'a, Ticket> {
        Box::pin(async move {
            let tickets = self.lock()?;
            tickets
                .by_primary_key
                .get(primary_key)
                .and_then(|id| tickets.by_id.get(id))
                .cloned()
                .ok_or(TicketStoreError::NotFound)
        })
    }

    fn list_by_order(&self, order_id: OrderId) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            Ok(self
                .lock()?
                .by_id
                .values()
                .filter(|t| t.order_id == order_id)
                .cloned()
                .collect())
        })
    }

    fn transition_to_used<'a>(
        &'a self,
        ticket_id: TicketId,
        operator: &'a OperatorId,
        used_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Transition> {
        Box::pin(async move {
            self.compare_and_set(
                ticket_id,
                |ticket| {
                    ticket.used_at = Some(used_at);
                    ticket.validated_by = Some(operator.clone());
                },
                TicketStatus::Used,
            )
        })
    }

    fn void(&self, ticket_id: TicketId, voided_at: DateTime<Utc>) -> StoreFuture<'_, Transition> {
        Box::pin(async move {
            self.compare_and_set(
                ticket_id,
                |ticket| ticket.voided_at = Some(voided_at),
                TicketStatus::Void,
            )
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.lock().map(|_| ()) })
    }
}

/// Store whose every operation fails with `Unavailable`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableTicketStore;

impl UnavailableTicketStore {
    fn down<T>() -> Result<T, TicketStoreError> {
        Err(TicketStoreError::Unavailable("connection refused".to_string()))
    }
}

impl TicketStore for UnavailableTicketStore {
    fn create(&self, _ticket: NewTicket) -> StoreFuture<'_, TicketId> {
        Box::pin(async { Self::down() })
    }

    fn create_order_tickets(
        &self,
        _order_id: OrderId,
        _tickets: Vec<NewTicket>,
    ) -> StoreFuture<'_, Vec<TicketId>> {
        Box::pin(async { Self::down() })
    }

    fn get(&self, _ticket_id: TicketId) -> StoreFuture<'_, Ticket> {
        Box::pin(async { Self::down() })
    }

    fn get_by_primary_key<'a>(&'a self, _primary_key: &'a PrimaryKey) -> StoreFuture<'a, Ticket> {
        Box::pin(async { Self::down() })
    }

    fn list_by_order(&self, _order_id: OrderId) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async { Self::down() })
    }

    fn transition_to_used<'a>(
        &'a self,
        _ticket_id: TicketId,
        _operator: &'a OperatorId,
        _used_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Transition> {
        Box::pin(async { Self::down() })
    }

    fn void(&self, _ticket_id: TicketId, _voided_at: DateTime<Utc>) -> StoreFuture<'_, Transition> {
        Box::pin(async { Self::down() })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Self::down() })
    }
}

/// Store that reads from an inner store but never completes a transition.
///
/// Models a store that accepts the connection and then hangs on the write,
/// the case the validator's store timeout exists for.
#[derive(Debug, Clone)]
pub struct StalledTicketStore<S> {
    inner: S,
}

impl<S> StalledTicketStore<S> {
    /// Wrap `inner`; reads pass through, transitions hang.
    #[must_use]
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: TicketStore> TicketStore for StalledTicketStore<S> {
    fn create(&self, ticket: NewTicket) -> StoreFuture<'_, TicketId> {
        self.inner.create(ticket)
    }

    fn create_order_tickets(
        &self,
        order_id: OrderId,
        tickets: Vec<NewTicket>,
    ) -> StoreFuture<'_, Vec<TicketId>> {
        self.inner.create_order_tickets(order_id, tickets)
    }

    fn get(&self, ticket_id: TicketId) -> StoreFuture<'_, Ticket> {
        self.inner.get(ticket_id)
    }

    fn get_by_primary_key<'a>(&'a self, primary_key: &'a PrimaryKey) -> StoreFuture<'a, Ticket> {
        self.inner.get_by_primary_key(primary_key)
    }

    fn list_by_order(&self, order_id: OrderId) -> StoreFuture<'_, Vec<Ticket>> {
        self.inner.list_by_order(order_id)
    }

    fn transition_to_used<'a>(
        &'a self,
        _ticket_id: TicketId,
        _operator: &'a OperatorId,
        _used_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Transition> {
        Box::pin(std::future::pending())
    }

    fn void(&self, _ticket_id: TicketId, _voided_at: DateTime<Utc>) -> StoreFuture<'_, Transition> {
        Box::pin(std::future::pending())
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(std::future::pending())
    }
}

/// Store whose first order issuances fail with `Unavailable`.
///
/// Everything else passes through to the inner store. Models a transient
/// outage during order confirmation.
#[derive(Debug)]
pub struct FlakyTicketStore<S> {
    inner: S,
    failures_left: AtomicUsize,
}

impl<S> FlakyTicketStore<S> {
    /// Wrap `inner`; the first `failures` order issuances fail.
    #[must_use]
    pub const fn new(inner: S, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
        }
    }
}

impl<S: TicketStore> TicketStore for FlakyTicketStore<S> {
    fn create(&self, ticket: NewTicket) -> StoreFuture<'_, TicketId> {
        self.inner.create(ticket)
    }

    fn create_order_tickets(
        &self,
        order_id: OrderId,
        tickets: Vec<NewTicket>,
    ) -> StoreFuture<'_, Vec<TicketId>> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Box::pin(async {
                Err::<Vec<TicketId>, _>(TicketStoreError::Unavailable(
                    "connection reset".to_string(),
                ))
            });
        }
        self.inner.create_order_tickets(order_id, tickets)
    }

    fn get(&self, ticket_id: TicketId) -> StoreFuture<'_, Ticket> {
        self.inner.get(ticket_id)
    }

    fn get_by_primary_key<'a>(&'a self, primary_key: &'a PrimaryKey) -> StoreFuture<'a, Ticket> {
        self.inner.get_by_primary_key(primary_key)
    }

    fn list_by_order(&self, order_id: OrderId) -> StoreFuture<'_, Vec<Ticket>> {
        self.inner.list_by_order(order_id)
    }

    fn transition_to_used<'a>(
        &'a self,
        ticket_id: TicketId,
        operator: &'a OperatorId,
        used_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Transition> {
        self.inner.transition_to_used(ticket_id, operator, used_at)
    }

    fn void(&self, ticket_id: TicketId, voided_at: DateTime<Utc>) -> StoreFuture<'_, Transition> {
        self.inner.void(ticket_id, voided_at)
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        self.inner.ping()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fixtures::new_ticket;
    use admission_core::environment::Clock;

    fn operator() -> OperatorId {
        OperatorId::parse("gate-1").unwrap()
    }

    #[tokio::test]
    async fn create_assigns_sequential_ids_and_rejects_duplicate_keys() {
        let store = InMemoryTicketStore::new();
        let first = store.create(new_ticket("key-a", 1)).await.unwrap();
        let second = store.create(new_ticket("key-b", 1)).await.unwrap();

        assert_eq!(first, TicketId::new(1));
        assert_eq!(second, TicketId::new(2));
        assert_eq!(
            store.create(new_ticket("key-a", 2)).await,
            Err(TicketStoreError::DuplicateKey)
        );
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn lookup_by_primary_key() {
        let store = InMemoryTicketStore::new();
        let id = store.create(new_ticket("key-a", 1)).await.unwrap();

        let found = store
            .get_by_primary_key(&PrimaryKey::new("key-a".to_string()))
            .await
            .unwrap();
        assert_eq!(found.ticket_id, id);
        assert_eq!(found.status, TicketStatus::Issued);

        assert_eq!(
            store
                .get_by_primary_key(&PrimaryKey::new("missing".to_string()))
                .await,
            Err(TicketStoreError::NotFound)
        );
    }

    #[tokio::test]
    async fn transition_to_used_applies_once() {
        let store = InMemoryTicketStore::new();
        let id = store.create(new_ticket("key-a", 1)).await.unwrap();
        let now = crate::test_clock().now();

        let first = store.transition_to_used(id, &operator(), now).await.unwrap();
        let Transition::Applied(used) = first else {
            unreachable!("first transition must apply");
        };
        assert_eq!(used.status, TicketStatus::Used);
        assert_eq!(used.used_at, Some(now));
        assert_eq!(used.validated_by, Some(operator()));

        let second = store.transition_to_used(id, &operator(), now).await.unwrap();
        assert!(matches!(second, Transition::Conflict(t) if t.status == TicketStatus::Used));
    }

    #[tokio::test]
    async fn void_conflicts_after_use() {
        let store = InMemoryTicketStore::new();
        let id = store.create(new_ticket("key-a", 1)).await.unwrap();
        let now = crate::test_clock().now();

        store.transition_to_used(id, &operator(), now).await.unwrap();
        let result = store.void(id, now).await.unwrap();

        assert!(matches!(result, Transition::Conflict(_)));
        assert_eq!(store.snapshot(id).unwrap().status, TicketStatus::Used);
        assert_eq!(store.snapshot(id).unwrap().voided_at, None);
    }

    #[tokio::test]
    async fn transitions_on_missing_ticket_are_not_found() {
        let store = InMemoryTicketStore::new();
        let now = crate::test_clock().now();

        assert_eq!(
            store.transition_to_used(TicketId::new(9), &operator(), now).await,
            Err(TicketStoreError::NotFound)
        );
        assert_eq!(
            store.void(TicketId::new(9), now).await,
            Err(TicketStoreError::NotFound)
        );
    }

    #[tokio::test]
    async fn list_by_order_filters() {
        let store = InMemoryTicketStore::new();
        store.create(new_ticket("key-a", 1)).await.unwrap();
        store.create(new_ticket("key-b", 2)).await.unwrap();
        store.create(new_ticket("key-c", 1)).await.unwrap();

        let tickets = store.list_by_order(OrderId::new(1)).await.unwrap();
        let keys: Vec<_> = tickets.iter().map(|t| t.primary_key.as_str()).collect();
        assert_eq!(keys, vec!["key-a", "key-c"]);
    }

    #[tokio::test]
    async fn order_tickets_are_written_together() {
        let store = InMemoryTicketStore::new();

        let ids = store
            .create_order_tickets(
                OrderId::new(5),
                vec![new_ticket("key-a", 5), new_ticket("key-b", 5)],
            )
            .await
            .unwrap();

        assert_eq!(ids, vec![TicketId::new(1), TicketId::new(2)]);
        assert_eq!(store.list_by_order(OrderId::new(5)).await.unwrap().len(), 2);
        assert_eq!(
            store
                .create_order_tickets(OrderId::new(5), vec![new_ticket("key-c", 5)])
                .await,
            Err(TicketStoreError::OrderExists)
        );
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn colliding_order_batch_writes_nothing() {
        let store = InMemoryTicketStore::new();
        store.create(new_ticket("taken", 1)).await.unwrap();

        let against_store = store
            .create_order_tickets(
                OrderId::new(6),
                vec![new_ticket("fresh", 6), new_ticket("taken", 6)],
            )
            .await;
        let within_batch = store
            .create_order_tickets(
                OrderId::new(6),
                vec![new_ticket("twin", 6), new_ticket("twin", 6)],
            )
            .await;

        assert_eq!(against_store, Err(TicketStoreError::DuplicateKey));
        assert_eq!(within_batch, Err(TicketStoreError::DuplicateKey));
        assert_eq!(store.len(), 1);
        assert!(store.list_by_order(OrderId::new(6)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn flaky_store_fails_then_recovers() {
        let store = FlakyTicketStore::new(InMemoryTicketStore::new(), 1);
        let batch = || vec![new_ticket("key-a", 3)];

        assert!(matches!(
            store.create_order_tickets(OrderId::new(3), batch()).await,
            Err(TicketStoreError::Unavailable(_))
        ));
        assert!(store.list_by_order(OrderId::new(3)).await.unwrap().is_empty());
        assert_eq!(
            store.create_order_tickets(OrderId::new(3), batch()).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn unavailable_store_fails_everything() {
        let store = UnavailableTicketStore;
        assert!(matches!(
            store.ping().await,
            Err(TicketStoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.get(TicketId::new(1)).await,
            Err(TicketStoreError::Unavailable(_))
        ));
    }
}

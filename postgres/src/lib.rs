//! `PostgreSQL` ticket store for admission ticketing.
//!
//! Implements the `TicketStore` trait from `admission-core` on top of a single
//! `tickets` table. Single use is enforced by the database, not by the
//! application:
//!
//! - Status transitions are one conditional `UPDATE ... WHERE status = 'issued'
//!   RETURNING ...`. Postgres row locking serializes concurrent updates of the
//!   same row, so exactly one of them matches the predicate.
//! - Primary keys carry a `UNIQUE` constraint; a collision surfaces as
//!   [`TicketStoreError::DuplicateKey`].
//! - An order's tickets are written in one transaction, guarded by a row in
//!   `issued_orders`. A second issuance for the order, concurrent or later,
//!   finds that row and gets [`TicketStoreError::OrderExists`].
//! - `CHECK` constraints tie `used_at`/`validated_by` to `used` and
//!   `voided_at` to `void`.
//!
//! # Example
//!
//! ```no_run
//! use admission_postgres::{PoolSettings, PostgresTicketStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresTicketStore::connect("postgres://localhost/admission", &PoolSettings::default()).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

use admission_core::ticket_store::{StoreFuture, TicketStore, TicketStoreError, Transition};
use admission_core::types::{
    EventId, Money, NewTicket, OfferTypeId, OperatorId, OrderId, PrimaryKey, SecondaryKey, Ticket,
    TicketId, TicketStatus,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgExecutor, PgPool, Row};
use std::time::Duration;

const TICKET_COLUMNS: &str = "ticket_id, order_id, event_id, offer_type_id, event_title, \
     unit_price_cents, primary_key, secondary_key, status, issued_at, used_at, validated_by, \
     voided_at";

/// Connection pool sizing.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Upper bound on open connections
    pub max_connections: u32,
    /// Connections kept warm
    pub min_connections: u32,
    /// How long to wait for a connection before giving up
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// `PostgreSQL`-backed [`TicketStore`].
#[derive(Clone, Debug)]
pub struct PostgresTicketStore {
    pool: PgPool,
}

impl PostgresTicketStore {
    /// Connect a new pool.
    ///
    /// # Errors
    ///
    /// Returns [`TicketStoreError::Unavailable`] if the database cannot be
    /// reached.
    pub async fn connect(url: &str, settings: &PoolSettings) -> Result<Self, TicketStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| TicketStoreError::Unavailable(format!("Failed to connect: {e}")))?;

        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`TicketStoreError::Unavailable`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), TicketStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| TicketStoreError::Unavailable(format!("Migration failed: {e}")))?;
        Ok(())
    }

    async fn fetch(&self, ticket_id: TicketId) -> Result<Ticket, TicketStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE ticket_id = $1"
        ))
        .bind(ticket_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(TicketStoreError::NotFound)?;

        row_to_ticket(&row)
    }

    /// Apply a conditional update; on no match, report the current record.
    ///
    /// Statuses other than `issued` are terminal, so the follow-up read after a
    /// failed predicate observes the state that caused the miss.
    async fn compare_and_set(
        &self,
        ticket_id: TicketId,
        update: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Transition, TicketStoreError> {
        let applied = update
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match applied {
            Some(row) => Ok(Transition::Applied(row_to_ticket(&row)?)),
            None => Ok(Transition::Conflict(self.fetch(ticket_id).await?)),
        }
    }
}

impl TicketStore for PostgresTicketStore {
    fn create(&self, ticket: NewTicket) -> StoreFuture<'_, TicketId> {
        Box::pin(async move { insert_ticket(&self.pool, &ticket).await })
    }

    fn create_order_tickets(
        &self,
        order_id: OrderId,
        tickets: Vec<NewTicket>,
    ) -> StoreFuture<'_, Vec<TicketId>> {
        Box::pin(async move {
            if tickets.is_empty() {
                return Ok(Vec::new());
            }
            let ticket_count = i32::try_from(tickets.len())
                .map_err(|_| TicketStoreError::Corrupt("too many tickets in order".to_string()))?;

            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

            // Blocks while another transaction holds the same order row.
            let claimed = sqlx::query(
                r"
                INSERT INTO issued_orders (order_id, ticket_count)
                VALUES ($1, $2)
                ON CONFLICT (order_id) DO NOTHING
                ",
            )
            .bind(order_id.get())
            .bind(ticket_count)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
            if claimed.rows_affected() == 0 {
                return Err(TicketStoreError::OrderExists);
            }

            let (already_stored,): (bool,) =
                sqlx::query_as("SELECT EXISTS (SELECT 1 FROM tickets WHERE order_id = $1)")
                    .bind(order_id.get())
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
            if already_stored {
                return Err(TicketStoreError::OrderExists);
            }

            // Any early return drops `tx`, which rolls everything back.
            let mut ids = Vec::with_capacity(tickets.len());
            for ticket in tickets {
                let ticket = NewTicket { order_id, ..ticket };
                ids.push(insert_ticket(&mut *tx, &ticket).await?);
            }

            tx.commit().await.map_err(map_sqlx_error)?;

            tracing::debug!(
                order_id = order_id.get(),
                tickets = ids.len(),
                "Order tickets committed"
            );
            Ok(ids)
        })
    }

    fn get(&self, ticket_id: TicketId) -> StoreFuture<'_, Ticket> {
        Box::pin(self.fetch(ticket_id))
    }

    fn get_by_primary_key<'a>(&'a self, primary_key: &'a PrimaryKey) -> StoreFuture<'a, Ticket> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets WHERE primary_key = $1"
            ))
            .bind(primary_key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or(TicketStoreError::NotFound)?;

            row_to_ticket(&row)
        })
    }

    fn list_by_order(&self, order_id: OrderId) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets WHERE order_id = $1 ORDER BY ticket_id ASC"
            ))
            .bind(order_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            rows.iter().map(row_to_ticket).collect()
        })
    }

    fn transition_to_used<'a>(
        &'a self,
        ticket_id: TicketId,
        operator: &'a OperatorId,
        used_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Transition> {
        Box::pin(async move {
            let sql = format!(
                "UPDATE tickets SET status = 'used', used_at = $2, validated_by = $3 \
                 WHERE ticket_id = $1 AND status = 'issued' RETURNING {TICKET_COLUMNS}"
            );
            let update = sqlx::query(&sql)
                .bind(ticket_id.get())
                .bind(used_at)
                .bind(operator.as_str());

            let transition = self.compare_and_set(ticket_id, update).await?;
            if let Transition::Conflict(current) = &transition {
                tracing::debug!(
                    ticket_id = ticket_id.get(),
                    status = current.status.as_str(),
                    "Use transition lost: ticket not issued"
                );
                metrics::counter!("admission_store_transition_conflicts_total", "transition" => "used")
                    .increment(1);
            }
            Ok(transition)
        })
    }

    fn void(&self, ticket_id: TicketId, voided_at: DateTime<Utc>) -> StoreFuture<'_, Transition> {
        Box::pin(async move {
            let sql = format!(
                "UPDATE tickets SET status = 'void', voided_at = $2 \
                 WHERE ticket_id = $1 AND status = 'issued' RETURNING {TICKET_COLUMNS}"
            );
            let update = sqlx::query(&sql).bind(ticket_id.get()).bind(voided_at);

            let transition = self.compare_and_set(ticket_id, update).await?;
            if matches!(transition, Transition::Conflict(_)) {
                metrics::counter!("admission_store_transition_conflicts_total", "transition" => "void")
                    .increment(1);
            }
            Ok(transition)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            Ok(())
        })
    }
}

/// Insert one ticket row and return its assigned id.
async fn insert_ticket<'e>(
    executor: impl PgExecutor<'e>,
    ticket: &NewTicket,
) -> Result<TicketId, TicketStoreError> {
    let unit_price = i64::try_from(ticket.unit_price.cents())
        .map_err(|_| TicketStoreError::Corrupt("unit price out of range".to_string()))?;

    let (ticket_id,): (i64,) = sqlx::query_as(
        r"
        INSERT INTO tickets (
            order_id, event_id, offer_type_id, event_title, unit_price_cents,
            primary_key, secondary_key, status, issued_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'issued', $8)
        RETURNING ticket_id
        ",
    )
    .bind(ticket.order_id.get())
    .bind(ticket.event_id.get())
    .bind(ticket.offer_type_id.get())
    .bind(ticket.event_title.as_deref())
    .bind(unit_price)
    .bind(ticket.primary_key.as_str())
    .bind(ticket.secondary_key.expose())
    .bind(ticket.issued_at)
    .fetch_one(executor)
    .await
    .map_err(map_sqlx_error)?;

    tracing::debug!(
        ticket_id,
        order_id = ticket.order_id.get(),
        event_id = ticket.event_id.get(),
        "Ticket row inserted"
    );

    Ok(TicketId::new(ticket_id))
}

/// Classify a database error.
///
/// Unique violations become `DuplicateKey` and decode failures `Corrupt`.
/// Everything else is treated as a transient outage.
fn map_sqlx_error(error: sqlx::Error) -> TicketStoreError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => TicketStoreError::DuplicateKey,
        sqlx::Error::RowNotFound => TicketStoreError::NotFound,
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => TicketStoreError::Corrupt(error.to_string()),
        _ => {
            tracing::warn!(error = %error, "Ticket store query failed");
            TicketStoreError::Unavailable(error.to_string())
        }
    }
}

/// Convert a database row to a `Ticket`, rejecting records that break the
/// status invariants.
fn row_to_ticket(row: &PgRow) -> Result<Ticket, TicketStoreError> {
    let corrupt = |e: sqlx::Error| TicketStoreError::Corrupt(e.to_string());

    let status_str: String = row.try_get("status").map_err(corrupt)?;
    let status = TicketStatus::parse(&status_str)
        .ok_or_else(|| TicketStoreError::Corrupt(format!("Invalid ticket status: {status_str}")))?;

    let unit_price_cents: i64 = row.try_get("unit_price_cents").map_err(corrupt)?;
    let unit_price = u64::try_from(unit_price_cents)
        .map(Money::from_cents)
        .map_err(|_| TicketStoreError::Corrupt(format!("Negative unit price: {unit_price_cents}")))?;

    let validated_by = row
        .try_get::<Option<String>, _>("validated_by")
        .map_err(corrupt)?
        .map(|id| {
            OperatorId::parse(&id)
                .ok_or_else(|| TicketStoreError::Corrupt("Blank operator id".to_string()))
        })
        .transpose()?;

    let ticket = Ticket {
        ticket_id: TicketId::new(row.try_get("ticket_id").map_err(corrupt)?),
        order_id: OrderId::new(row.try_get("order_id").map_err(corrupt)?),
        event_id: EventId::new(row.try_get("event_id").map_err(corrupt)?),
        offer_type_id: OfferTypeId::new(row.try_get("offer_type_id").map_err(corrupt)?),
        event_title: row.try_get("event_title").map_err(corrupt)?,
        unit_price,
        primary_key: PrimaryKey::new(row.try_get("primary_key").map_err(corrupt)?),
        secondary_key: SecondaryKey::new(row.try_get("secondary_key").map_err(corrupt)?),
        status,
        issued_at: row.try_get("issued_at").map_err(corrupt)?,
        used_at: row.try_get("used_at").map_err(corrupt)?,
        validated_by,
        voided_at: row.try_get("voided_at").map_err(corrupt)?,
    };

    check_status_fields(&ticket)?;
    Ok(ticket)
}

/// `used_at`/`validated_by` are set exactly when `Used`; `voided_at` exactly
/// when `Void`.
fn check_status_fields(ticket: &Ticket) -> Result<(), TicketStoreError> {
    let used = ticket.status == TicketStatus::Used;
    let void = ticket.status == TicketStatus::Void;

    if used != ticket.used_at.is_some() || used != ticket.validated_by.is_some() {
        return Err(TicketStoreError::Corrupt(format!(
            "Ticket {} has status {} but inconsistent use fields",
            ticket.ticket_id, ticket.status
        )));
    }
    if void != ticket.voided_at.is_some() {
        return Err(TicketStoreError::Corrupt(format!(
            "Ticket {} has status {} but inconsistent void fields",
            ticket.ticket_id, ticket.status
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ticket(status: TicketStatus) -> Ticket {
        let mut ticket = Ticket::issued(
            TicketId::new(7),
            admission_testing::fixtures::new_ticket("key-a", 1),
        );
        ticket.status = status;
        ticket
    }

    #[test]
    fn issued_record_is_consistent() {
        assert!(check_status_fields(&ticket(TicketStatus::Issued)).is_ok());
    }

    #[test]
    fn used_without_timestamp_is_corrupt() {
        let result = check_status_fields(&ticket(TicketStatus::Used));
        assert!(matches!(result, Err(TicketStoreError::Corrupt(_))));
    }

    #[test]
    fn used_record_with_fields_is_consistent() {
        let mut used = ticket(TicketStatus::Used);
        used.used_at = Some(DateTime::<Utc>::UNIX_EPOCH);
        used.validated_by = OperatorId::parse("gate-1");
        assert!(check_status_fields(&used).is_ok());
    }

    #[test]
    fn issued_with_void_timestamp_is_corrupt() {
        let mut issued = ticket(TicketStatus::Issued);
        issued.voided_at = Some(DateTime::<Utc>::UNIX_EPOCH);
        assert!(matches!(
            check_status_fields(&issued),
            Err(TicketStoreError::Corrupt(_))
        ));
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert_eq!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            TicketStoreError::NotFound
        );
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            TicketStoreError::Unavailable(_)
        ));
    }
}

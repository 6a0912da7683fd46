//! SQLx-backed reservation store.
//!
//! Each unit of work is one SQL transaction. The inventory check-and-decrement is a single
//! conditional `UPDATE`, so two transactions racing for the last ticket are serialized by the
//! database write lock and only one of them sees a matching row.
//!
//! Every write unit issues its first write before any read, so a unit never has to upgrade a
//! shared lock to a write lock mid-transaction.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::{Any, AnyPool, Row, Transaction};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use common::logger::warn_if_slow;

use super::{
    BookingLedger, InventoryStore, ReservationStore, ReserveOutcome, StoreTx, validate_count,
    validate_transition,
};
use crate::error::{ConflictReason, ReservationError};
use crate::model::{Booking, BookingId, BookingStatus, EventId, EventInventory, UserId};

const BOOKING_COLUMNS: &str = r#"
  booking_id, user_id, event_id, ticket_count, total_price, status,
  expires_at_ms, confirmed_at_ms, cancelled_at_ms, created_at_ms, updated_at_ms
"#;

/// SQLx-backed implementation of [`ReservationStore`].
/// Responsible only for persistence and row mapping.
#[derive(Clone)]
pub struct SqlxReservationStore {
    pool: AnyPool,
}

impl SqlxReservationStore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Inserts a new event pool. Events are owned by the event catalogue; this is the
    /// hook it uses when an event is created. Fails if the event already exists.
    #[instrument(skip(self, inventory), target = "store", fields(event_id = inventory.event_id))]
    pub async fn register_event(&self, inventory: &EventInventory) -> Result<(), ReservationError> {
        if inventory.available_tickets > inventory.total_tickets {
            return Err(ReservationError::InvalidArgument(format!(
                "available {} exceeds total {}",
                inventory.available_tickets, inventory.total_tickets
            )));
        }

        sqlx::query(
            r#"
INSERT INTO events (event_id, total_tickets, available_tickets, ticket_price)
VALUES (?, ?, ?, ?);
"#,
        )
        .bind(inventory.event_id)
        .bind(i64::from(inventory.total_tickets))
        .bind(i64::from(inventory.available_tickets))
        .bind(u64_to_i64(inventory.unit_price)?)
        .execute(&self.pool)
        .await?;

        debug!(total = inventory.total_tickets, "event registered");
        Ok(())
    }
}

#[async_trait]
impl ReservationStore for SqlxReservationStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, ReservationError> {
        let tx = warn_if_slow("db_begin", Duration::from_millis(100), self.pool.begin()).await?;
        Ok(Box::new(SqlxUnitOfWork { tx }))
    }
}

/// One open SQL transaction. Dropping it without `commit` rolls back.
pub struct SqlxUnitOfWork {
    tx: Transaction<'static, Any>,
}

impl SqlxUnitOfWork {
    async fn fetch_bookings(
        &mut self,
        sql: &str,
        bind: i64,
    ) -> Result<Vec<Booking>, ReservationError> {
        let rows = sqlx::query(sql).bind(bind).fetch_all(&mut *self.tx).await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_booking(&r) {
                Ok(b) => out.push(b),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the listing
                    warn!(error = %e, "skipping malformed booking row");
                }
            }
        }
        Ok(out)
    }

    async fn status_of(
        &mut self,
        booking_id: BookingId,
    ) -> Result<Option<BookingStatus>, ReservationError> {
        let row = sqlx::query("SELECT status FROM bookings WHERE booking_id = ?;")
            .bind(booking_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await?;

        match row {
            Some(r) => {
                let s: String = r.try_get("status")?;
                let status = s
                    .parse::<BookingStatus>()
                    .map_err(|e| ReservationError::Malformed(e.to_string()))?;
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl InventoryStore for SqlxUnitOfWork {
    #[instrument(skip(self), target = "store")]
    async fn reserve(
        &mut self,
        event_id: EventId,
        count: u32,
    ) -> Result<ReserveOutcome, ReservationError> {
        validate_count(count)?;

        let res = sqlx::query(
            r#"
UPDATE events
SET available_tickets = available_tickets - ?
WHERE event_id = ? AND available_tickets >= ?;
"#,
        )
        .bind(i64::from(count))
        .bind(event_id)
        .bind(i64::from(count))
        .execute(&mut *self.tx)
        .await?;

        if res.rows_affected() == 1 {
            return Ok(ReserveOutcome::Reserved);
        }

        // No row matched: either the event is unknown or the pool is too small.
        let available = self.available_count(event_id).await?;
        debug!(available, "reserve rejected");
        Ok(ReserveOutcome::Insufficient { available })
    }

    #[instrument(skip(self), target = "store")]
    async fn release(&mut self, event_id: EventId, count: u32) -> Result<(), ReservationError> {
        validate_count(count)?;

        let res = sqlx::query(
            r#"
UPDATE events
SET available_tickets = available_tickets + ?
WHERE event_id = ?;
"#,
        )
        .bind(i64::from(count))
        .bind(event_id)
        .execute(&mut *self.tx)
        .await?;

        if res.rows_affected() == 0 {
            return Err(ReservationError::EventNotFound(event_id));
        }
        Ok(())
    }

    async fn available_count(&mut self, event_id: EventId) -> Result<u32, ReservationError> {
        let row = sqlx::query("SELECT available_tickets FROM events WHERE event_id = ?;")
            .bind(event_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(ReservationError::EventNotFound(event_id))?;

        i64_to_u32(row.try_get("available_tickets")?)
    }

    async fn load(&mut self, event_id: EventId) -> Result<EventInventory, ReservationError> {
        let row = sqlx::query(
            r#"
SELECT event_id, total_tickets, available_tickets, ticket_price
FROM events
WHERE event_id = ?;
"#,
        )
        .bind(event_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(ReservationError::EventNotFound(event_id))?;

        Ok(EventInventory {
            event_id: row.try_get("event_id")?,
            total_tickets: i64_to_u32(row.try_get("total_tickets")?)?,
            available_tickets: i64_to_u32(row.try_get("available_tickets")?)?,
            unit_price: i64_to_u64(row.try_get("ticket_price")?)?,
        })
    }
}

#[async_trait]
impl BookingLedger for SqlxUnitOfWork {
    #[instrument(skip(self, booking), target = "store", fields(booking_id = %booking.id))]
    async fn create(&mut self, booking: &Booking) -> Result<BookingId, ReservationError> {
        if booking.status != BookingStatus::Pending {
            return Err(ReservationError::InvalidArgument(format!(
                "new bookings must be PENDING, got {}",
                booking.status
            )));
        }

        let res = sqlx::query(
            r#"
INSERT INTO bookings (
  booking_id, user_id, event_id, ticket_count, total_price, status,
  expires_at_ms, confirmed_at_ms, cancelled_at_ms, created_at_ms, updated_at_ms
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(booking.id.to_string())
        .bind(booking.user_id)
        .bind(booking.event_id)
        .bind(i64::from(booking.ticket_count))
        .bind(u64_to_i64(booking.total_price)?)
        .bind(booking.status.as_str())
        .bind(booking.expires_at.timestamp_millis())
        .bind(booking.confirmed_at.map(|t| t.timestamp_millis()))
        .bind(booking.cancelled_at.map(|t| t.timestamp_millis()))
        .bind(booking.created_at.timestamp_millis())
        .bind(booking.updated_at.timestamp_millis())
        .execute(&mut *self.tx)
        .await;

        match res {
            Ok(_) => Ok(booking.id),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(ReservationError::Conflict {
                    booking_id: booking.id,
                    reason: ConflictReason::Duplicate,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&mut self, booking_id: BookingId) -> Result<Booking, ReservationError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE booking_id = ?;");
        let row = sqlx::query(&sql)
            .bind(booking_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(ReservationError::BookingNotFound(booking_id))?;

        row_to_booking(&row)
    }

    #[instrument(skip(self), target = "store")]
    async fn transition(
        &mut self,
        booking_id: BookingId,
        expected: BookingStatus,
        next: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<(), ReservationError> {
        validate_transition(expected, next)?;

        let stamp_column = match next {
            BookingStatus::Confirmed => "confirmed_at_ms",
            BookingStatus::Cancelled => "cancelled_at_ms",
            // validate_transition never lets PENDING through as a target
            BookingStatus::Pending => "updated_at_ms",
        };
        let sql = format!(
            r#"
UPDATE bookings
SET status = ?, {stamp_column} = ?, updated_at_ms = ?
WHERE booking_id = ? AND status = ?;
"#
        );

        let res = sqlx::query(&sql)
            .bind(next.as_str())
            .bind(at.timestamp_millis())
            .bind(at.timestamp_millis())
            .bind(booking_id.to_string())
            .bind(expected.as_str())
            .execute(&mut *self.tx)
            .await?;

        if res.rows_affected() == 1 {
            return Ok(());
        }

        match self.status_of(booking_id).await? {
            None => Err(ReservationError::BookingNotFound(booking_id)),
            Some(current) => {
                debug!(%current, "compare-and-set lost");
                Err(ReservationError::Conflict {
                    booking_id,
                    reason: ConflictReason::StatusChanged { expected },
                })
            }
        }
    }

    async fn list_by_user(&mut self, user_id: UserId) -> Result<Vec<Booking>, ReservationError> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE user_id = ? ORDER BY created_at_ms DESC, rowid DESC;"
        );
        self.fetch_bookings(&sql, user_id).await
    }

    async fn list_by_event(
        &mut self,
        event_id: EventId,
    ) -> Result<Vec<Booking>, ReservationError> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE event_id = ? ORDER BY created_at_ms DESC, rowid DESC;"
        );
        self.fetch_bookings(&sql, event_id).await
    }

    async fn list_expired_pending(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>, ReservationError> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE status = 'PENDING' AND expires_at_ms <= ? ORDER BY expires_at_ms ASC, rowid ASC;"
        );
        self.fetch_bookings(&sql, now.timestamp_millis()).await
    }
}

#[async_trait]
impl StoreTx for SqlxUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<(), ReservationError> {
        self.tx.commit().await?;
        Ok(())
    }
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_booking(r: &AnyRow) -> Result<Booking, ReservationError> {
    let id_str: String = r.try_get("booking_id")?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| ReservationError::Malformed(format!("invalid booking_id {id_str:?}: {e}")))?;

    let status_str: String = r.try_get("status")?;
    let status = status_str
        .parse::<BookingStatus>()
        .map_err(|e| ReservationError::Malformed(e.to_string()))?;

    Ok(Booking {
        id,
        user_id: r.try_get("user_id")?,
        event_id: r.try_get("event_id")?,
        ticket_count: i64_to_u32(r.try_get("ticket_count")?)?,
        total_price: i64_to_u64(r.try_get("total_price")?)?,
        expires_at: ms_to_datetime(r.try_get("expires_at_ms")?)?,
        created_at: ms_to_datetime(r.try_get("created_at_ms")?)?,
        status,
        confirmed_at: r
            .try_get::<Option<i64>, _>("confirmed_at_ms")?
            .map(ms_to_datetime)
            .transpose()?,
        cancelled_at: r
            .try_get::<Option<i64>, _>("cancelled_at_ms")?
            .map(ms_to_datetime)
            .transpose()?,
        updated_at: ms_to_datetime(r.try_get("updated_at_ms")?)?,
    })
}

/* =========================
Numeric safety helpers
========================= */

fn i64_to_u32(v: i64) -> Result<u32, ReservationError> {
    u32::try_from(v).map_err(|_| ReservationError::Malformed(format!("out of range for u32: {v}")))
}

fn i64_to_u64(v: i64) -> Result<u64, ReservationError> {
    u64::try_from(v)
        .map_err(|_| ReservationError::Malformed(format!("negative i64 where u64 expected: {v}")))
}

fn u64_to_i64(v: u64) -> Result<i64, ReservationError> {
    i64::try_from(v)
        .map_err(|_| ReservationError::InvalidArgument(format!("u64 too large for i64: {v}")))
}

fn ms_to_datetime(ms: i64) -> Result<DateTime<Utc>, ReservationError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| ReservationError::Malformed(format!("timestamp out of range: {ms}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_helpers_reject_out_of_range() {
        assert!(i64_to_u32(-1).is_err());
        assert!(i64_to_u32(i64::from(u32::MAX) + 1).is_err());
        assert_eq!(i64_to_u32(42).unwrap(), 42);

        assert!(i64_to_u64(-5).is_err());
        assert!(u64_to_i64(u64::MAX).is_err());
        assert_eq!(u64_to_i64(150).unwrap(), 150);
    }

    #[test]
    fn millis_round_trip() {
        let t = ms_to_datetime(1_735_732_800_123).unwrap();
        assert_eq!(t.timestamp_millis(), 1_735_732_800_123);
    }
}

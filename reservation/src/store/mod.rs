//! Persistence seam for inventory and bookings.
//!
//! Every read or write happens inside a unit of work obtained from
//! [`ReservationStore::begin`]. Writes become visible only on [`StoreTx::commit`]; dropping
//! an uncommitted unit discards all of its writes, which is how a failed ledger insert undoes
//! the inventory decrement that preceded it.

pub mod schema;
pub mod sqlx_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ReservationError;
use crate::model::{Booking, BookingId, BookingStatus, EventId, EventInventory, UserId};

pub use sqlx_store::SqlxReservationStore;

/// Result of an atomic check-and-decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved,
    /// Nothing was decremented. `available` is what the pool held at the time.
    Insufficient { available: u32 },
}

#[async_trait]
pub trait InventoryStore: Send {
    /// Decrements the pool by `count` iff at least `count` tickets remain.
    /// Indivisible with respect to concurrent callers for the same event.
    async fn reserve(
        &mut self,
        event_id: EventId,
        count: u32,
    ) -> Result<ReserveOutcome, ReservationError>;

    /// Returns `count` tickets to the pool. Only ever undoes a prior reserve.
    async fn release(&mut self, event_id: EventId, count: u32) -> Result<(), ReservationError>;

    /// Point-in-time read. Never the gate for a decrement.
    async fn available_count(&mut self, event_id: EventId) -> Result<u32, ReservationError>;

    async fn load(&mut self, event_id: EventId) -> Result<EventInventory, ReservationError>;
}

#[async_trait]
pub trait BookingLedger: Send {
    /// Persists a PENDING booking.
    async fn create(&mut self, booking: &Booking) -> Result<BookingId, ReservationError>;

    async fn get(&mut self, booking_id: BookingId) -> Result<Booking, ReservationError>;

    /// Compare-and-set on status. Stamps `confirmed_at` / `cancelled_at` with `at`.
    ///
    /// Fails with `Conflict` if the stored status is not `expected` at the time of the write.
    async fn transition(
        &mut self,
        booking_id: BookingId,
        expected: BookingStatus,
        next: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<(), ReservationError>;

    /// Newest first.
    async fn list_by_user(&mut self, user_id: UserId) -> Result<Vec<Booking>, ReservationError>;

    /// Newest first.
    async fn list_by_event(&mut self, event_id: EventId)
    -> Result<Vec<Booking>, ReservationError>;

    /// PENDING bookings whose deadline is at or before `now`, earliest deadline first.
    async fn list_expired_pending(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>, ReservationError>;
}

/// One atomic unit spanning both the inventory pool and the ledger.
#[async_trait]
pub trait StoreTx: InventoryStore + BookingLedger {
    async fn commit(self: Box<Self>) -> Result<(), ReservationError>;
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, ReservationError>;
}

/// Rejects counts that cannot describe a real reservation.
pub fn validate_count(count: u32) -> Result<(), ReservationError> {
    if count == 0 {
        return Err(ReservationError::InvalidArgument(
            "ticket count must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Rejects transitions that leave a terminal state or stay in place.
pub fn validate_transition(
    expected: BookingStatus,
    next: BookingStatus,
) -> Result<(), ReservationError> {
    if !expected.can_transition_to(next) {
        return Err(ReservationError::InvalidArgument(format!(
            "no transition from {expected} to {next}"
        )));
    }
    Ok(())
}

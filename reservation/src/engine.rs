//! Reservation engine.
//!
//! Responsibilities:
//! - Turn a booking request into one atomic unit: inventory check-and-decrement plus ledger insert.
//! - Own the booking state machine (PENDING -> CONFIRMED | CANCELLED).
//! - Release inventory exactly once per cancelled booking, whoever cancels it.
//!
//! Non-responsibilities:
//! - Scheduling expiry sweeps (see `reclaimer`).
//! - Payment processing. Confirmation is a signal from outside.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{Span, debug, field, info, instrument};

use common::logger::warn_if_slow;

use crate::clock::Clock;
use crate::config::ReservationConfig;
use crate::error::ReservationError;
use crate::metrics::Counters;
use crate::model::{Booking, BookingId, BookingStatus, EventId, UserId};
use crate::store::{BookingLedger, InventoryStore, ReservationStore, ReserveOutcome, StoreTx};

/// Sole writer of inventory counts and booking status.
pub struct ReservationEngine {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    config: ReservationConfig,
    counters: Counters,
}

impl ReservationEngine {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        config: ReservationConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            counters: Counters::default(),
        }
    }

    pub fn with_counters(mut self, counters: Counters) -> Self {
        self.counters = counters;
        self
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn config(&self) -> &ReservationConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Reserves `ticket_count` tickets and records a PENDING booking, atomically.
    ///
    /// Fails with `InsufficientInventory` without touching the ledger when the pool is too
    /// small. If anything fails after the decrement, the whole unit is rolled back.
    #[instrument(
        skip(self),
        target = "engine",
        fields(booking_id = field::Empty)
    )]
    pub async fn create_booking(
        &self,
        user_id: UserId,
        event_id: EventId,
        ticket_count: u32,
    ) -> Result<Booking, ReservationError> {
        if ticket_count == 0 {
            return Err(ReservationError::InvalidArgument(
                "ticket count must be at least 1".into(),
            ));
        }

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let outcome = warn_if_slow("inventory_reserve", Duration::from_millis(100), async {
            tx.reserve(event_id, ticket_count).await
        })
        .await?;

        if let ReserveOutcome::Insufficient { available } = outcome {
            Counters::bump(&self.counters.sold_out_rejections);
            info!(available, "reservation rejected: sold out");
            return Err(ReservationError::InsufficientInventory {
                event_id,
                requested: ticket_count,
                available,
            });
        }

        // Price is read under the same unit as the decrement.
        let inventory = tx.load(event_id).await?;
        let booking = Booking::pending(
            user_id,
            event_id,
            ticket_count,
            inventory.unit_price,
            now,
            self.config.booking_timeout,
        )?;

        tx.create(&booking).await?;
        tx.commit().await?;

        Span::current().record("booking_id", field::display(booking.id));
        Counters::bump(&self.counters.bookings_created);
        info!(
            total_price = booking.total_price,
            expires_at = %booking.expires_at,
            remaining = inventory.available_tickets,
            "booking created"
        );

        Ok(booking)
    }

    /// Moves a PENDING booking to CONFIRMED. Never succeeds at or past the deadline,
    /// whether or not the reclaimer has already run.
    #[instrument(skip(self), target = "engine", fields(booking_id = %booking_id))]
    pub async fn confirm_payment(&self, booking_id: BookingId) -> Result<Booking, ReservationError> {
        let booking = self.get_booking(booking_id).await?;

        if booking.status != BookingStatus::Pending {
            return Err(ReservationError::InvalidState {
                booking_id,
                status: booking.status,
            });
        }

        let now = self.clock.now();
        if booking.is_expired(now) {
            Counters::bump(&self.counters.expired_confirm_rejections);
            info!(expires_at = %booking.expires_at, "confirmation rejected: expired");
            return Err(ReservationError::Expired {
                booking_id,
                expires_at: booking.expires_at,
            });
        }

        let mut tx = self.store.begin().await?;
        tx.transition(
            booking_id,
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            now,
        )
        .await?;
        tx.commit().await?;

        Counters::bump(&self.counters.bookings_confirmed);
        info!(event_id = booking.event_id, "booking confirmed");

        Ok(booking.with_status(BookingStatus::Confirmed, now))
    }

    /// Moves a PENDING booking to CANCELLED and returns its tickets to the pool.
    ///
    /// Used both for user cancellation and for expiry reclaim. If the status change loses a
    /// race the release is skipped, so tickets go back exactly once.
    #[instrument(skip(self), target = "engine", fields(booking_id = %booking_id))]
    pub async fn cancel_booking(&self, booking_id: BookingId) -> Result<Booking, ReservationError> {
        let booking = self.get_booking(booking_id).await?;

        match booking.status {
            BookingStatus::Pending => {}
            BookingStatus::Cancelled => return Err(ReservationError::AlreadyCancelled(booking_id)),
            BookingStatus::Confirmed => return Err(ReservationError::AlreadyConfirmed(booking_id)),
        }

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        // A lost compare-and-set returns here, before any release.
        if let Err(e) = tx
            .transition(
                booking_id,
                BookingStatus::Pending,
                BookingStatus::Cancelled,
                now,
            )
            .await
        {
            debug!(error = %e, "cancel transition did not apply");
            return Err(e);
        }

        tx.release(booking.event_id, booking.ticket_count).await?;
        tx.commit().await?;

        Counters::bump(&self.counters.bookings_cancelled);
        info!(
            event_id = booking.event_id,
            released = booking.ticket_count,
            "booking cancelled"
        );

        Ok(booking.with_status(BookingStatus::Cancelled, now))
    }

    pub async fn get_booking(&self, booking_id: BookingId) -> Result<Booking, ReservationError> {
        let mut tx = self.store.begin().await?;
        tx.get(booking_id).await
    }

    pub async fn list_user_bookings(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Booking>, ReservationError> {
        let mut tx = self.store.begin().await?;
        tx.list_by_user(user_id).await
    }

    pub async fn list_event_bookings(
        &self,
        event_id: EventId,
    ) -> Result<Vec<Booking>, ReservationError> {
        let mut tx = self.store.begin().await?;
        tx.list_by_event(event_id).await
    }

    pub async fn available_count(&self, event_id: EventId) -> Result<u32, ReservationError> {
        let mut tx = self.store.begin().await?;
        tx.available_count(event_id).await
    }

    /// PENDING bookings past their deadline as of `now`, earliest deadline first.
    pub async fn expired_pending_bookings(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>, ReservationError> {
        let mut tx = self.store.begin().await?;
        let expired = tx.list_expired_pending(now).await?;
        if !expired.is_empty() {
            debug!(count = expired.len(), "found expired pending bookings");
        }
        Ok(expired)
    }
}

impl std::fmt::Debug for ReservationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ReservationError;

pub type BookingId = Uuid;
pub type EventId = i64;
pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BookingStatus::Pending)
    }

    /// PENDING and CONFIRMED bookings hold tickets out of the event pool.
    pub fn holds_inventory(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    /// Only PENDING has outgoing edges.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Pending, BookingStatus::Confirmed)
                | (BookingStatus::Pending, BookingStatus::Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(BookingStatus::Pending),
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "CANCELLED" => Ok(BookingStatus::Cancelled),
            other => Err(anyhow::anyhow!("Invalid BookingStatus value: {}", other)),
        }
    }
}

/// Ticket pool of a single event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInventory {
    pub event_id: EventId,
    /// Capacity of the event. Never changes once the event exists.
    pub total_tickets: u32,
    /// Tickets not held by any PENDING or CONFIRMED booking.
    pub available_tickets: u32,
    /// Price of one ticket in minor currency units.
    pub unit_price: u64,
}

impl EventInventory {
    pub fn new(event_id: EventId, total_tickets: u32, unit_price: u64) -> Self {
        Self {
            event_id,
            total_tickets,
            available_tickets: total_tickets,
            unit_price,
        }
    }

    /// Tickets currently held by live bookings.
    pub fn held_tickets(&self) -> u32 {
        self.total_tickets.saturating_sub(self.available_tickets)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,

    // Identity
    pub user_id: UserId,
    pub event_id: EventId,

    // Fixed at creation
    pub ticket_count: u32,
    pub total_price: u64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,

    // Lifecycle
    pub status: BookingStatus,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Builds a fresh PENDING booking priced at `ticket_count * unit_price`.
    pub fn pending(
        user_id: UserId,
        event_id: EventId,
        ticket_count: u32,
        unit_price: u64,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Self, ReservationError> {
        if ticket_count == 0 {
            return Err(ReservationError::InvalidArgument(
                "ticket count must be at least 1".into(),
            ));
        }

        let total_price = unit_price.checked_mul(u64::from(ticket_count)).ok_or_else(|| {
            ReservationError::InvalidArgument(format!(
                "total price overflows: {ticket_count} x {unit_price}"
            ))
        })?;

        let expires_at = now.checked_add_signed(timeout).ok_or_else(|| {
            ReservationError::InvalidArgument(format!("expiry overflows for timeout {timeout}"))
        })?;

        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            event_id,
            ticket_count,
            total_price,
            expires_at,
            created_at: now,
            status: BookingStatus::Pending,
            confirmed_at: None,
            cancelled_at: None,
            updated_at: now,
        })
    }

    /// The deadline itself counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Applies a status change locally, stamping the matching timestamp.
    pub fn with_status(mut self, status: BookingStatus, at: DateTime<Utc>) -> Self {
        match status {
            BookingStatus::Confirmed => self.confirmed_at = Some(at),
            BookingStatus::Cancelled => self.cancelled_at = Some(at),
            BookingStatus::Pending => {}
        }
        self.status = status;
        self.updated_at = at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn pending_booking_fixes_price_and_deadline() {
        let b = Booking::pending(7, 1, 3, 50, t0(), Duration::minutes(15)).unwrap();

        assert_eq!(b.status, BookingStatus::Pending);
        assert_eq!(b.total_price, 150);
        assert_eq!(b.expires_at, t0() + Duration::minutes(15));
        assert_eq!(b.created_at, t0());
        assert!(b.confirmed_at.is_none() && b.cancelled_at.is_none());
    }

    #[test]
    fn zero_tickets_is_rejected() {
        let err = Booking::pending(7, 1, 0, 50, t0(), Duration::minutes(15)).unwrap_err();
        assert!(matches!(err, ReservationError::InvalidArgument(_)));
    }

    #[test]
    fn price_overflow_is_rejected() {
        let err = Booking::pending(7, 1, 2, u64::MAX, t0(), Duration::minutes(15)).unwrap_err();
        assert!(matches!(err, ReservationError::InvalidArgument(_)));
    }

    #[test]
    fn deadline_boundary_counts_as_expired() {
        let b = Booking::pending(7, 1, 1, 10, t0(), Duration::minutes(15)).unwrap();

        assert!(!b.is_expired(b.expires_at - Duration::milliseconds(1)));
        assert!(b.is_expired(b.expires_at));
        assert!(b.is_expired(b.expires_at + Duration::minutes(1)));
    }

    #[test]
    fn only_pending_has_outgoing_transitions() {
        use BookingStatus::*;

        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Pending));
        for terminal in [Confirmed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Pending, Confirmed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn status_string_round_trip() {
        for s in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::Cancelled,
        ] {
            assert_eq!(s.to_string().parse::<BookingStatus>().unwrap(), s);
        }
        assert!("Pending".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn status_serializes_in_upper_case() {
        let json = serde_json::to_string(&BookingStatus::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
    }

    #[test]
    fn with_status_stamps_matching_timestamp() {
        let b = Booking::pending(7, 1, 1, 10, t0(), Duration::minutes(15)).unwrap();
        let later = t0() + Duration::minutes(3);

        let confirmed = b.clone().with_status(BookingStatus::Confirmed, later);
        assert_eq!(confirmed.confirmed_at, Some(later));
        assert_eq!(confirmed.cancelled_at, None);
        assert_eq!(confirmed.updated_at, later);

        let cancelled = b.with_status(BookingStatus::Cancelled, later);
        assert_eq!(cancelled.cancelled_at, Some(later));
        assert_eq!(cancelled.confirmed_at, None);
    }
}

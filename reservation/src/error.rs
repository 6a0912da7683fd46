use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{BookingId, BookingStatus, EventId};

/// Why a compare-and-set write against the ledger did not apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// Stored status no longer matched the expected one.
    StatusChanged { expected: BookingStatus },
    /// A booking with the same id already exists.
    Duplicate,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::StatusChanged { expected } => {
                write!(f, "status is no longer {expected}")
            }
            ConflictReason::Duplicate => f.write_str("booking id already exists"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ReservationError {
    #[error("booking not found: {0}")]
    BookingNotFound(BookingId),

    #[error("event not found: {0}")]
    EventNotFound(EventId),

    #[error(
        "not enough tickets for event {event_id}: requested {requested}, only {available} left"
    )]
    InsufficientInventory {
        event_id: EventId,
        requested: u32,
        available: u32,
    },

    #[error("booking {booking_id} is {status}, not PENDING")]
    InvalidState {
        booking_id: BookingId,
        status: BookingStatus,
    },

    #[error("booking {0} is already confirmed")]
    AlreadyConfirmed(BookingId),

    #[error("booking {0} is already cancelled")]
    AlreadyCancelled(BookingId),

    #[error("booking {booking_id} expired at {expires_at}")]
    Expired {
        booking_id: BookingId,
        expires_at: DateTime<Utc>,
    },

    #[error("booking {booking_id} conflict: {reason}")]
    Conflict {
        booking_id: BookingId,
        reason: ConflictReason,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl ReservationError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ReservationError::BookingNotFound(_) | ReservationError::EventNotFound(_)
        )
    }

    /// Another actor moved the booking first. The caller's intent is moot, not failed.
    pub fn is_lost_race(&self) -> bool {
        matches!(
            self,
            ReservationError::AlreadyCancelled(_)
                | ReservationError::AlreadyConfirmed(_)
                | ReservationError::InvalidState { .. }
                | ReservationError::Conflict {
                    reason: ConflictReason::StatusChanged { .. },
                    ..
                }
        )
    }
}

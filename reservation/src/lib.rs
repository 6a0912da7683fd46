//! Ticket reservation engine.
//!
//! Inventory is a finite pool per event. Bookings reserve from it atomically, stay PENDING
//! until confirmed or cancelled, and are reclaimed by a background sweep once their payment
//! window closes.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod model;
pub mod reclaimer;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ReservationConfig;
pub use engine::ReservationEngine;
pub use error::{ConflictReason, ReservationError};
pub use model::{Booking, BookingId, BookingStatus, EventId, EventInventory, UserId};
pub use reclaimer::{ExpiryReclaimer, ExpiryTarget, SweepReport};

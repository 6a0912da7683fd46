use chrono::Duration;

/// Default PENDING window.
pub const DEFAULT_BOOKING_TIMEOUT_MINUTES: u32 = 15;

#[derive(Clone, Debug)]
pub struct ReservationConfig {
    /// How long a PENDING booking holds its tickets before it may be reclaimed.
    /// Fixed per booking at creation time.
    pub booking_timeout: Duration,
}

impl ReservationConfig {
    pub fn with_timeout_minutes(minutes: u32) -> Self {
        Self {
            booking_timeout: Duration::minutes(i64::from(minutes)),
        }
    }
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self::with_timeout_minutes(DEFAULT_BOOKING_TIMEOUT_MINUTES)
    }
}

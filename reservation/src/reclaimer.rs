//! Expiry reclaimer.
//!
//! Polls for PENDING bookings whose deadline has passed and cancels each one through the
//! same path as a user cancellation. Reclaim latency is bounded by the sweep interval.
//!
//! One booking failing never aborts the sweep. No lock is held across a sweep; every
//! cancellation is its own atomic unit.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, warn};

use common::logger::{TraceId, annotate_span, child_span, root_span};

use crate::engine::ReservationEngine;
use crate::error::ReservationError;
use crate::metrics::Counters;
use crate::model::{Booking, BookingId};

/// What the reclaimer needs from the engine. Keeps the sweep off engine internals.
#[async_trait]
pub trait ExpiryTarget: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// PENDING bookings only. Confirmed bookings must never show up here.
    async fn expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Booking>, ReservationError>;

    async fn cancel(&self, booking_id: BookingId) -> Result<Booking, ReservationError>;
}

#[async_trait]
impl ExpiryTarget for ReservationEngine {
    fn now(&self) -> DateTime<Utc> {
        ReservationEngine::now(self)
    }

    async fn expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Booking>, ReservationError> {
        self.expired_pending_bookings(now).await
    }

    async fn cancel(&self, booking_id: BookingId) -> Result<Booking, ReservationError> {
        self.cancel_booking(booking_id).await
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub reclaimed: usize,
    /// Someone else moved the booking first (user cancel, confirmation, another sweep).
    pub skipped: usize,
    pub failed: usize,
}

pub struct ExpiryReclaimer {
    target: Arc<dyn ExpiryTarget>,
    interval: Duration,
    counters: Counters,
}

impl ExpiryReclaimer {
    pub fn new(target: Arc<dyn ExpiryTarget>, interval: Duration, counters: Counters) -> Self {
        Self {
            target,
            interval,
            counters,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one sweep. Only a failure to list expired bookings is returned as an error;
    /// per-booking failures are logged and counted in the report.
    pub async fn sweep_once(&self) -> Result<SweepReport, ReservationError> {
        let span = root_span("reclaim_sweep", &TraceId::default());
        self.sweep(self.target.now()).instrument(span).await
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, ReservationError> {
        Counters::bump(&self.counters.reclaim_sweeps);

        let expired = self.target.expired_pending(now).await?;
        let mut report = SweepReport {
            scanned: expired.len(),
            ..SweepReport::default()
        };

        for booking in expired {
            let span = child_span("reclaim_booking");
            let outcome = async {
                annotate_span(Some(booking.event_id), Some(&booking.id as &dyn fmt::Display));
                self.target.cancel(booking.id).await
            }
            .instrument(span)
            .await;

            match outcome {
                Ok(_) => {
                    report.reclaimed += 1;
                    Counters::bump(&self.counters.reclaimed);
                }
                Err(e) if e.is_lost_race() => {
                    report.skipped += 1;
                    Counters::bump(&self.counters.reclaim_skipped);
                    debug!(booking_id = %booking.id, reason = %e, "expired booking already settled");
                }
                Err(e) => {
                    report.failed += 1;
                    Counters::bump(&self.counters.reclaim_failures);
                    warn!(
                        booking_id = %booking.id,
                        event_id = booking.event_id,
                        error = %e,
                        "failed to reclaim expired booking"
                    );
                }
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                reclaimed = report.reclaimed,
                skipped = report.skipped,
                failed = report.failed,
                "reclaim sweep finished"
            );
        }

        Ok(report)
    }

    /// Sweeps on a fixed cadence until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            component = "reclaimer",
            interval_ms = self.interval.as_millis() as u64,
            "expiry reclaimer started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "reclaim sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(component = "reclaimer", "expiry reclaimer stopped");
    }
}

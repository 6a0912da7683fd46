use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing_test::traced_test;

use reservation::error::ConflictReason;
use reservation::metrics::Counters;
use reservation::{
    Booking, BookingId, BookingStatus, ExpiryReclaimer, ExpiryTarget, ManualClock,
    ReservationConfig, ReservationEngine, ReservationError,
};

use mock_store::InMemoryReservationStore;

const EVENT: i64 = 7;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

async fn setup(total: u32) -> (Arc<ReservationEngine>, InMemoryReservationStore, ManualClock) {
    let store = InMemoryReservationStore::default();
    store.add_event(EVENT, total, 25).await;
    let clock = ManualClock::new(t0());
    let engine = ReservationEngine::new(
        Arc::new(store.clone()),
        Arc::new(clock.clone()),
        ReservationConfig::with_timeout_minutes(15),
    );
    (Arc::new(engine), store, clock)
}

fn reclaimer_for(engine: &Arc<ReservationEngine>, interval: StdDuration) -> ExpiryReclaimer {
    ExpiryReclaimer::new(engine.clone(), interval, engine.counters().clone())
}

#[tokio::test]
async fn sweep_skips_unexpired_and_confirmed_bookings() -> anyhow::Result<()> {
    let (engine, store, clock) = setup(20).await;

    let early = engine.create_booking(1, EVENT, 2).await?;
    let paid = engine.create_booking(2, EVENT, 3).await?;
    engine.confirm_payment(paid.id).await?;

    clock.advance(Duration::minutes(10));
    let fresh = engine.create_booking(3, EVENT, 4).await?;

    // `early` and `paid` are past their deadline; `fresh` is not.
    clock.advance(Duration::minutes(6));
    let report = reclaimer_for(&engine, StdDuration::from_secs(60))
        .sweep_once()
        .await?;

    assert_eq!(report.scanned, 1);
    assert_eq!(report.reclaimed, 1);
    assert_eq!(engine.get_booking(early.id).await?.status, BookingStatus::Cancelled);
    assert_eq!(engine.get_booking(paid.id).await?.status, BookingStatus::Confirmed);
    assert_eq!(engine.get_booking(fresh.id).await?.status, BookingStatus::Pending);
    assert_eq!(engine.available_count(EVENT).await?, 13);
    assert!(store.conserves(EVENT).await);

    // Nothing left to do on an immediate second pass.
    let again = reclaimer_for(&engine, StdDuration::from_secs(60))
        .sweep_once()
        .await?;
    assert_eq!(again.scanned, 0);
    Ok(())
}

#[tokio::test]
async fn expired_listing_is_earliest_deadline_first() -> anyhow::Result<()> {
    let (engine, _store, clock) = setup(20).await;

    let a = engine.create_booking(1, EVENT, 1).await?;
    clock.advance(Duration::minutes(2));
    let b = engine.create_booking(2, EVENT, 1).await?;
    clock.advance(Duration::minutes(2));
    let c = engine.create_booking(3, EVENT, 1).await?;

    clock.advance(Duration::hours(1));
    let ids: Vec<BookingId> = engine
        .expired_pending_bookings(engine.now())
        .await?
        .into_iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(ids, vec![a.id, b.id, c.id]);
    Ok(())
}

#[tokio::test]
async fn sweep_at_exact_deadline_reclaims() -> anyhow::Result<()> {
    let (engine, _store, clock) = setup(5).await;

    let booking = engine.create_booking(1, EVENT, 5).await?;
    clock.set(booking.expires_at);

    let report = reclaimer_for(&engine, StdDuration::from_secs(60))
        .sweep_once()
        .await?;
    assert_eq!(report.reclaimed, 1);
    assert_eq!(engine.available_count(EVENT).await?, 5);
    Ok(())
}

/// Scripted target: fixed expired list, selected ids fail or lose the race.
struct ScriptedTarget {
    now: DateTime<Utc>,
    expired: Vec<Booking>,
    broken: HashSet<BookingId>,
    settled: HashSet<BookingId>,
    fail_listing: bool,
    cancelled: Mutex<Vec<BookingId>>,
}

impl ScriptedTarget {
    fn new(expired: Vec<Booking>) -> Self {
        Self {
            now: t0() + Duration::hours(1),
            expired,
            broken: HashSet::new(),
            settled: HashSet::new(),
            fail_listing: false,
            cancelled: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ExpiryTarget for ScriptedTarget {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    async fn expired_pending(&self, _now: DateTime<Utc>) -> Result<Vec<Booking>, ReservationError> {
        if self.fail_listing {
            return Err(ReservationError::Storage(sqlx::Error::PoolTimedOut));
        }
        Ok(self.expired.clone())
    }

    async fn cancel(&self, booking_id: BookingId) -> Result<Booking, ReservationError> {
        self.cancelled.lock().push(booking_id);
        if self.broken.contains(&booking_id) {
            return Err(ReservationError::Storage(sqlx::Error::PoolTimedOut));
        }
        if self.settled.contains(&booking_id) {
            return Err(ReservationError::Conflict {
                booking_id,
                reason: ConflictReason::StatusChanged {
                    expected: BookingStatus::Pending,
                },
            });
        }
        let booking = self
            .expired
            .iter()
            .find(|b| b.id == booking_id)
            .cloned()
            .ok_or(ReservationError::BookingNotFound(booking_id))?;
        Ok(booking.with_status(BookingStatus::Cancelled, self.now))
    }
}

fn pending(user_id: i64) -> Booking {
    Booking::pending(user_id, EVENT, 1, 10, t0(), Duration::minutes(15)).unwrap()
}

#[tokio::test]
#[traced_test]
async fn one_failing_booking_does_not_abort_the_sweep() {
    let bookings = vec![pending(1), pending(2), pending(3)];
    let mut target = ScriptedTarget::new(bookings.clone());
    target.broken.insert(bookings[1].id);
    let target = Arc::new(target);

    let counters = Counters::default();
    let reclaimer = ExpiryReclaimer::new(target.clone(), StdDuration::from_secs(60), counters.clone());
    let report = reclaimer.sweep_once().await.unwrap();

    assert_eq!(report.scanned, 3);
    assert_eq!(report.reclaimed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 0);

    let attempted = target.cancelled.lock().clone();
    assert_eq!(attempted, bookings.iter().map(|b| b.id).collect::<Vec<_>>());

    let snap = counters.snapshot();
    assert_eq!(snap.reclaim_sweeps, 1);
    assert_eq!(snap.reclaimed, 2);
    assert_eq!(snap.reclaim_failures, 1);

    assert!(logs_contain("failed to reclaim expired booking"));
    assert!(logs_contain(&bookings[1].id.to_string()));
}

#[tokio::test]
async fn lost_race_is_counted_as_skipped() {
    let bookings = vec![pending(1), pending(2)];
    let mut target = ScriptedTarget::new(bookings.clone());
    target.settled.insert(bookings[0].id);

    let counters = Counters::default();
    let reclaimer = ExpiryReclaimer::new(Arc::new(target), StdDuration::from_secs(60), counters.clone());
    let report = reclaimer.sweep_once().await.unwrap();

    assert_eq!(report.reclaimed, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(counters.snapshot().reclaim_skipped, 1);
}

#[tokio::test]
async fn listing_failure_is_returned() {
    let mut target = ScriptedTarget::new(vec![pending(1)]);
    target.fail_listing = true;
    let target = Arc::new(target);

    let reclaimer = ExpiryReclaimer::new(target.clone(), StdDuration::from_secs(60), Counters::default());
    let err = reclaimer.sweep_once().await.unwrap_err();

    assert!(matches!(err, ReservationError::Storage(_)));
    assert!(target.cancelled.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn user_cancel_racing_a_sweep_releases_once() {
    for _ in 0..20 {
        let (engine, store, clock) = setup(10).await;
        let booking = engine.create_booking(1, EVENT, 4).await.unwrap();
        clock.advance(Duration::minutes(20));

        let sweep = tokio::spawn({
            let reclaimer = reclaimer_for(&engine, StdDuration::from_secs(60));
            async move { reclaimer.sweep_once().await }
        });
        let user = tokio::spawn({
            let engine = engine.clone();
            async move { engine.cancel_booking(booking.id).await }
        });

        let report = sweep.await.unwrap().unwrap();
        let user = user.await.unwrap();

        assert_eq!(usize::from(user.is_ok()) + report.reclaimed, 1);
        if let Err(e) = &user {
            assert!(e.is_lost_race(), "unexpected error: {e}");
        }
        assert_eq!(engine.available_count(EVENT).await.unwrap(), 10);
        assert!(store.conserves(EVENT).await);
    }
}

#[tokio::test]
async fn run_loop_reclaims_and_stops_on_shutdown() {
    let (engine, store, clock) = setup(3).await;
    let booking = engine.create_booking(1, EVENT, 3).await.unwrap();
    clock.advance(Duration::minutes(30));

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(reclaimer_for(&engine, StdDuration::from_millis(10)).run(rx));

    let reclaimed = tokio::time::timeout(StdDuration::from_secs(2), async {
        loop {
            if engine.get_booking(booking.id).await.unwrap().status == BookingStatus::Cancelled {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reclaimed.is_ok(), "booking was never reclaimed");
    assert_eq!(store.event(EVENT).await.available_tickets, 3);

    tx.send(true).unwrap();
    tokio::time::timeout(StdDuration::from_secs(2), handle)
        .await
        .expect("reclaimer did not stop")
        .unwrap();
    assert!(engine.counters().snapshot().reclaim_sweeps >= 1);
}

#[tokio::test]
async fn run_loop_stops_when_sender_is_dropped() {
    let (engine, _store, _clock) = setup(1).await;
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(reclaimer_for(&engine, StdDuration::from_millis(10)).run(rx));

    drop(tx);
    tokio::time::timeout(StdDuration::from_secs(2), handle)
        .await
        .expect("reclaimer did not stop")
        .unwrap();
}

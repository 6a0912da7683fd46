use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Minimal counters for operational visibility. Clones share the same cells.
#[derive(Clone, Default, Debug)]
pub struct Counters {
    pub bookings_created: Arc<AtomicU64>,
    pub bookings_confirmed: Arc<AtomicU64>,
    pub bookings_cancelled: Arc<AtomicU64>,

    // rejections
    pub sold_out_rejections: Arc<AtomicU64>,
    pub expired_confirm_rejections: Arc<AtomicU64>,

    // reclaimer
    pub reclaim_sweeps: Arc<AtomicU64>,
    pub reclaimed: Arc<AtomicU64>,
    pub reclaim_skipped: Arc<AtomicU64>,
    pub reclaim_failures: Arc<AtomicU64>,
}

/// Point-in-time copy of [`Counters`].
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub bookings_created: u64,
    pub bookings_confirmed: u64,
    pub bookings_cancelled: u64,
    pub sold_out_rejections: u64,
    pub expired_confirm_rejections: u64,
    pub reclaim_sweeps: u64,
    pub reclaimed: u64,
    pub reclaim_skipped: u64,
    pub reclaim_failures: u64,
}

impl Counters {
    pub(crate) fn bump(cell: &AtomicU64) {
        cell.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        fn load(c: &AtomicU64) -> u64 {
            c.load(Ordering::Relaxed)
        }

        CountersSnapshot {
            bookings_created: load(&self.bookings_created),
            bookings_confirmed: load(&self.bookings_confirmed),
            bookings_cancelled: load(&self.bookings_cancelled),
            sold_out_rejections: load(&self.sold_out_rejections),
            expired_confirm_rejections: load(&self.expired_confirm_rejections),
            reclaim_sweeps: load(&self.reclaim_sweeps),
            reclaimed: load(&self.reclaimed),
            reclaim_skipped: load(&self.reclaim_skipped),
            reclaim_failures: load(&self.reclaim_failures),
        }
    }
}

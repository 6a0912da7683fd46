//! Process wiring: store, engine and the reclaimer task.

use std::sync::Arc;

use sqlx::AnyPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use reservation::metrics::Counters;
use reservation::store::SqlxReservationStore;
use reservation::{Clock, ExpiryReclaimer, ReservationEngine};

use crate::config::AppConfig;

pub struct App {
    pub store: SqlxReservationStore,
    pub engine: Arc<ReservationEngine>,
    pub counters: Counters,
    cfg: AppConfig,
}

impl App {
    pub fn new(pool: AnyPool, clock: Arc<dyn Clock>, cfg: AppConfig) -> Self {
        let store = SqlxReservationStore::new(pool);
        let counters = Counters::default();

        let engine = ReservationEngine::new(Arc::new(store.clone()), clock, cfg.reservation())
            .with_counters(counters.clone());

        Self {
            store,
            engine: Arc::new(engine),
            counters,
            cfg,
        }
    }

    /// Spawns the expiry reclaimer on the configured cadence.
    pub fn start_reclaimer(&self) -> ReclaimerHandle {
        let (shutdown, rx) = watch::channel(false);
        let reclaimer = ExpiryReclaimer::new(
            self.engine.clone(),
            self.cfg.reclaim_interval(),
            self.counters.clone(),
        );

        ReclaimerHandle {
            shutdown,
            join: tokio::spawn(reclaimer.run(rx)),
        }
    }
}

/// Owner of a running reclaimer loop.
pub struct ReclaimerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReclaimerHandle {
    /// Signals the loop and waits for the sweep in progress (if any) to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        // Err only means the loop already exited.
        let _ = self.shutdown.send(true);
        self.join.await?;
        info!("reclaimer shut down");
        Ok(())
    }
}

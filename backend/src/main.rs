use std::sync::Arc;

use anyhow::Context;

use booking_backend::{app::App, config::AppConfig, db::Db};
use common::logger::init_logger;
use reservation::SystemClock;

/// Connects to the database and makes sure the schema exists.
async fn init_db(cfg: &AppConfig) -> anyhow::Result<Db> {
    let db = Db::connect(&cfg.database_url, cfg.db_max_connections)
        .await
        .with_context(|| format!("failed to connect to {}", cfg.database_url))?;
    db.migrate().await.context("schema migration failed")?;
    Ok(db)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_logger("booking-backend", is_production);

    tracing::info!("Starting booking backend...");

    let cfg = AppConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        booking_timeout_minutes = cfg.booking_timeout_minutes,
        reclaim_interval_secs = cfg.reclaim_interval_secs,
        db_max_connections = cfg.db_max_connections,
        "configuration loaded"
    );

    let db = init_db(&cfg).await?;
    let app = App::new(db.pool.clone(), Arc::new(SystemClock), cfg);
    let reclaimer = app.start_reclaimer();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    reclaimer.shutdown().await?;
    db.pool.close().await;

    let snapshot = app.counters.snapshot();
    tracing::info!(?snapshot, "booking backend stopped");

    Ok(())
}

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use reservation::ReservationConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    /// Upper bound on pooled connections.
    pub db_max_connections: u32,

    /// How long a PENDING booking holds its tickets before it may be reclaimed.
    pub booking_timeout_minutes: u32,

    /// Cadence of the expiry reclaimer. A booking is reclaimed at most this long after
    /// its deadline (plus one sweep's duration).
    pub reclaim_interval_secs: u64,

    /// Switches log output to JSON.
    pub production: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Missing keys take defaults;
    /// present but invalid values are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "sqlite://booking_dev.db?mode=rwc".to_string());

        let cfg = Self {
            database_url,
            db_max_connections: positive(&lookup, "DB_MAX_CONNECTIONS", 16)?,
            booking_timeout_minutes: positive(
                &lookup,
                "BOOKING_TIMEOUT_MINUTES",
                reservation::config::DEFAULT_BOOKING_TIMEOUT_MINUTES,
            )?,
            reclaim_interval_secs: positive(&lookup, "RECLAIM_INTERVAL_SECS", 60)?,
            production: lookup("APP_ENV").as_deref() == Some("production"),
        };

        Ok(cfg)
    }

    pub fn reservation(&self) -> ReservationConfig {
        ReservationConfig::with_timeout_minutes(self.booking_timeout_minutes)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }
}

fn positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> anyhow::Result<T>
where
    T: FromStr + PartialOrd + Default,
    <T as FromStr>::Err: std::error::Error + Send + Sync + 'static,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };

    let value: T = raw
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a positive integer, got {raw:?}"))?;

    if value <= T::default() {
        bail!("{key} must be a positive integer, got {raw:?}");
    }
    Ok(value)
}

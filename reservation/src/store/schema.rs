use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Event inventory
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS events (
  event_id INTEGER PRIMARY KEY,
  total_tickets BIGINT NOT NULL CHECK (total_tickets >= 0),
  available_tickets BIGINT NOT NULL CHECK (available_tickets >= 0 AND available_tickets <= total_tickets),
  ticket_price BIGINT NOT NULL CHECK (ticket_price >= 0)
);
"#,
    )
    .execute(pool)
    .await?;

    // Booking ledger
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS bookings (
  booking_id TEXT PRIMARY KEY,
  user_id BIGINT NOT NULL,
  event_id BIGINT NOT NULL REFERENCES events(event_id),
  ticket_count BIGINT NOT NULL CHECK (ticket_count >= 1),
  total_price BIGINT NOT NULL CHECK (total_price >= 0),
  status TEXT NOT NULL CHECK (status IN ('PENDING', 'CONFIRMED', 'CANCELLED')),
  expires_at_ms BIGINT NOT NULL,
  confirmed_at_ms BIGINT,
  cancelled_at_ms BIGINT,
  created_at_ms BIGINT NOT NULL,
  updated_at_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_bookings_user ON bookings(user_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_bookings_event ON bookings(event_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_bookings_status_expiry ON bookings(status, expires_at_ms);"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

use agentcore_domain::error::Result;
use sqlx::SqlitePool;

/// Create the three core tables if they don't already exist.
///
/// Kept as plain DDL rather than a migrations directory: the core has a
/// single persisted shape and schema migrations are out of scope.
pub async fn init(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(store_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session (
            id CHAR(36) PRIMARY KEY,
            workspace_dir TEXT UNIQUE NOT NULL,
            created_at DATETIME NOT NULL,
            device_id TEXT NULL,
            summary TEXT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(store_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event (
            id CHAR(36) PRIMARY KEY,
            session_id CHAR(36) NOT NULL REFERENCES session(id) ON DELETE CASCADE,
            timestamp DATETIME NOT NULL,
            event_type TEXT NOT NULL,
            event_payload JSON NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(store_err)?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_event_session_ts ON event(session_id, timestamp)")
        .execute(pool)
        .await
        .map_err(store_err)?;

    // `sonnet_requests` holds the canonical credits counter (1/4/0/1
    // cost variant), not a literal Sonnet request tally — see DESIGN.md.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pro_usage (
            id CHAR(36) PRIMARY KEY,
            pro_key CHAR(8) NOT NULL,
            month_year CHAR(7) NOT NULL,
            sonnet_requests INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            UNIQUE(pro_key, month_year)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(store_err)?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pro_usage_key ON pro_usage(pro_key)")
        .execute(pool)
        .await
        .map_err(store_err)?;

    Ok(())
}

pub(crate) fn store_err(e: sqlx::Error) -> agentcore_domain::Error {
    agentcore_domain::Error::Store(e.to_string())
}

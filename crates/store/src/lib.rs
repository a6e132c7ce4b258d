//! Persistence layer: the Event Store (C1) and the Pro Credit Ledger (C7).
//!
//! Both are backed by a single SQLite file via `sqlx`, sharing one
//! connection pool. Every public operation runs inside its own
//! transaction and rolls back cleanly on error — nothing here swallows
//! a failure.

mod event_store;
mod ledger;
mod pro_key;
mod schema;

pub use event_store::EventStore;
pub use ledger::{ProCreditLedger, TrackOutcome, UsageSnapshot};
pub use pro_key::{extract_pro_key_from_query, generate_pro_key, validate_pro_key};

use agentcore_domain::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Open (creating if absent) the SQLite database at `path` and run schema
/// setup. Returns a pool shared by the event store and the ledger.
pub async fn connect(path: &str) -> Result<SqlitePool> {
    // In-memory databases are per-connection; cap the pool at one
    // connection so every query lands in the same database (used by tests).
    let (opts, max_conns) = if path == ":memory:" {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| agentcore_domain::Error::Store(e.to_string()))?;
        (opts, 1)
    } else {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(|e| agentcore_domain::Error::Store(e.to_string()))?
            .create_if_missing(true);
        (opts, 8)
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_conns)
        .connect_with(opts)
        .await
        .map_err(|e| agentcore_domain::Error::Store(e.to_string()))?;

    schema::init(&pool).await?;
    Ok(pool)
}

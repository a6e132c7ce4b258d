use crate::schema::store_err;
use agentcore_domain::config::ProLedgerConfig;
use agentcore_domain::error::Result;
use agentcore_domain::trace::TraceEvent;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Result of a single `track()` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackOutcome {
    pub allowed: bool,
    pub current_usage: i64,
    pub limit: i64,
    pub warning_threshold_hit: bool,
    pub use_fallback: bool,
    pub limit_reached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub month: String,
    pub credits_used: i64,
    pub limit: i64,
    pub remaining: i64,
}

/// Monthly credit accounting per Pro key (C7).
///
/// `track` is the only mutating operation and runs as a single
/// read-modify-write transaction; the `(pro_key, month)` row is the sole
/// contention point in the whole system.
pub struct ProCreditLedger {
    pool: SqlitePool,
    config: ProLedgerConfig,
}

impl ProCreditLedger {
    pub fn new(pool: SqlitePool, config: ProLedgerConfig) -> Self {
        Self { pool, config }
    }

    fn current_month() -> String {
        Utc::now().format("%Y-%m").to_string()
    }

    pub async fn track(&self, pro_key: &str, model_name: &str) -> Result<TrackOutcome> {
        let cost = self.config.cost_for_model(model_name);
        let month = Self::current_month();
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT sonnet_requests FROM pro_usage WHERE pro_key = ? AND month_year = ?",
        )
        .bind(pro_key)
        .bind(&month)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;

        let current = existing.map(|(c,)| c).unwrap_or(0);
        let limit = self.config.monthly_limit;

        if current + cost > limit {
            tx.commit().await.map_err(store_err)?;
            TraceEvent::ProCreditTracked {
                pro_key: pro_key.to_string(),
                model: model_name.to_string(),
                allowed: false,
                use_fallback: true,
                credits_used: current,
            }
            .emit();
            return Ok(TrackOutcome {
                allowed: false,
                current_usage: current,
                limit,
                warning_threshold_hit: false,
                use_fallback: true,
                limit_reached: true,
            });
        }

        let new_usage = current + cost;
        let now = Utc::now();

        if existing.is_some() {
            sqlx::query(
                "UPDATE pro_usage SET sonnet_requests = ?, updated_at = ? WHERE pro_key = ? AND month_year = ?",
            )
            .bind(new_usage)
            .bind(now)
            .bind(pro_key)
            .bind(&month)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        } else {
            sqlx::query(
                "INSERT INTO pro_usage (id, pro_key, month_year, sonnet_requests, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(pro_key)
            .bind(&month)
            .bind(new_usage)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }

        tx.commit().await.map_err(store_err)?;

        let warning_hit = new_usage >= self.config.warning_threshold;
        if warning_hit {
            tracing::warn!(pro_key, new_usage, limit, "Pro key approaching monthly credit limit");
        }

        TraceEvent::ProCreditTracked {
            pro_key: pro_key.to_string(),
            model: model_name.to_string(),
            allowed: true,
            use_fallback: false,
            credits_used: new_usage,
        }
        .emit();

        Ok(TrackOutcome {
            allowed: true,
            current_usage: new_usage,
            limit,
            warning_threshold_hit: warning_hit,
            use_fallback: false,
            limit_reached: false,
        })
    }

    pub async fn usage(&self, pro_key: &str) -> Result<UsageSnapshot> {
        let month = Self::current_month();
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT sonnet_requests FROM pro_usage WHERE pro_key = ? AND month_year = ?",
        )
        .bind(pro_key)
        .bind(&month)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let credits_used = row.map(|(c,)| c).unwrap_or(0);
        let limit = self.config.monthly_limit;
        Ok(UsageSnapshot {
            month,
            credits_used,
            limit,
            remaining: (limit - credits_used).max(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_ledger(config: ProLedgerConfig) -> ProCreditLedger {
        let pool = crate::connect(":memory:").await.unwrap();
        ProCreditLedger::new(pool, config)
    }

    #[tokio::test]
    async fn tracks_sonnet_cost_of_one() {
        let ledger = test_ledger(ProLedgerConfig::default()).await;
        let outcome = ledger.track("ABCD1234", "claude-sonnet-4").await.unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.current_usage, 1);
    }

    #[tokio::test]
    async fn tracks_opus_cost_of_four() {
        let ledger = test_ledger(ProLedgerConfig::default()).await;
        let outcome = ledger.track("ABCD1234", "claude-opus-4").await.unwrap();
        assert_eq!(outcome.current_usage, 4);
    }

    #[tokio::test]
    async fn over_budget_request_is_rejected_without_incrementing() {
        let mut config = ProLedgerConfig::default();
        config.monthly_limit = 1000;
        let ledger = test_ledger(config).await;

        // Seed usage at 999 via repeated sonnet calls.
        for _ in 0..999 {
            ledger.track("KEY00001", "claude-sonnet-4").await.unwrap();
        }
        let before = ledger.usage("KEY00001").await.unwrap();
        assert_eq!(before.credits_used, 999);

        let outcome = ledger.track("KEY00001", "claude-opus-4").await.unwrap();
        assert!(!outcome.allowed);
        assert!(outcome.use_fallback);
        assert!(outcome.limit_reached);

        let after = ledger.usage("KEY00001").await.unwrap();
        assert_eq!(after.credits_used, 999, "rejected request must not increment usage");
    }

    #[tokio::test]
    async fn openrouter_pro_models_are_free() {
        let mut config = ProLedgerConfig::default();
        config.openrouter_pro_free = vec!["llama-3.1-70b".to_string()];
        let ledger = test_ledger(config).await;

        let outcome = ledger.track("FREEKEY1", "llama-3.1-70b-instruct").await.unwrap();
        assert_eq!(outcome.current_usage, 0);
    }

    #[tokio::test]
    async fn usage_with_no_records_is_zero() {
        let ledger = test_ledger(ProLedgerConfig::default()).await;
        let usage = ledger.usage("NEWKEY01").await.unwrap();
        assert_eq!(usage.credits_used, 0);
        assert_eq!(usage.remaining, usage.limit);
    }
}

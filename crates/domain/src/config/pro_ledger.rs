use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn d_monthly_limit() -> i64 {
    1000
}
fn d_warning_threshold() -> i64 {
    300
}
fn d_prime() -> u64 {
    match std::env::var("PRO_PRIME").ok().and_then(|s| s.parse().ok()) {
        Some(p) => p,
        None => {
            tracing::warn!("PRO_PRIME not set, using development fallback");
            982_451
        }
    }
}

/// Credit cost table used by `track()`: Sonnet costs 1 credit, Opus 4,
/// everything else defaults to 1 unless listed in `openrouter_pro_free`.
fn default_model_costs() -> HashMap<String, i64> {
    let mut m = HashMap::new();
    m.insert("sonnet".to_string(), 1);
    m.insert("opus".to_string(), 4);
    m
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProLedgerConfig {
    #[serde(default = "d_monthly_limit")]
    pub monthly_limit: i64,
    #[serde(default = "d_warning_threshold")]
    pub warning_threshold: i64,
    /// Keyed by a lowercase substring matched against the model name
    /// (e.g. `"sonnet"` matches `claude-sonnet-4`). Unmatched premium
    /// models fall back to `default_premium_cost`; models listed in
    /// `openrouter_pro_free` cost nothing.
    #[serde(default = "default_model_costs")]
    pub model_costs: HashMap<String, i64>,
    #[serde(default = "default_premium_cost")]
    pub default_premium_cost: i64,
    #[serde(default)]
    pub openrouter_pro_free: Vec<String>,
    #[serde(default = "d_prime")]
    pub prime: u64,
}

fn default_premium_cost() -> i64 {
    1
}

impl Default for ProLedgerConfig {
    fn default() -> Self {
        Self {
            monthly_limit: d_monthly_limit(),
            warning_threshold: d_warning_threshold(),
            model_costs: default_model_costs(),
            default_premium_cost: default_premium_cost(),
            openrouter_pro_free: Vec::new(),
            prime: d_prime(),
        }
    }
}

impl ProLedgerConfig {
    /// Cost in credits for invoking `model_name` under a Pro key.
    pub fn cost_for_model(&self, model_name: &str) -> i64 {
        let lower = model_name.to_lowercase();
        if self
            .openrouter_pro_free
            .iter()
            .any(|m| lower.contains(&m.to_lowercase()))
        {
            return 0;
        }
        for (needle, cost) in &self.model_costs {
            if lower.contains(needle.as_str()) {
                return *cost;
            }
        }
        self.default_premium_cost
    }
}

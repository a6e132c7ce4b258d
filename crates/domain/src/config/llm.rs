use serde::{Deserialize, Serialize};

fn d_max_retries() -> u32 {
    3
}
fn d_base_backoff_ms() -> u64 {
    500
}
fn d_outer_retries() -> u32 {
    3
}
fn d_test_mode() -> bool {
    std::env::var("AGENT_CORE_TEST_MODE").is_ok()
}
fn d_loop_window() -> usize {
    8
}

/// One entry in a model fallback chain: `"provider_id/model_name"`.
pub type ModelRef = String;

/// LLM provider/router (C6) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ordered `[primary, ...fallbacks]` chain tried per generate() call.
    #[serde(default = "default_chain")]
    pub model_chain: Vec<ModelRef>,
    /// Model swapped in for the remainder of a run when the Pro ledger
    /// reports `use_fallback` (always a free, tool-capable model).
    #[serde(default = "default_pro_fallback")]
    pub pro_fallback_model: ModelRef,
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
    #[serde(default = "d_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "d_outer_retries")]
    pub max_outer_retries: u32,
    /// When set, backoff is capped at 1s regardless of attempt count.
    #[serde(default = "d_test_mode")]
    pub test_mode: bool,
    #[serde(default = "d_loop_window")]
    pub loop_detector_window: usize,
    #[serde(default)]
    pub chutes_api_key: Option<String>,
    #[serde(default)]
    pub openrouter_api_key: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default)]
    pub moonshot_api_key: Option<String>,
}

fn default_chain() -> Vec<ModelRef> {
    vec![
        "anthropic/claude-sonnet".to_string(),
        "chutes/deepseek-v3".to_string(),
        "openrouter/llama-3.1-70b:free".to_string(),
    ]
}

fn default_pro_fallback() -> ModelRef {
    "chutes/deepseek-v3".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_chain: default_chain(),
            pro_fallback_model: default_pro_fallback(),
            max_retries: d_max_retries(),
            base_backoff_ms: d_base_backoff_ms(),
            max_outer_retries: d_outer_retries(),
            test_mode: d_test_mode(),
            loop_detector_window: d_loop_window(),
            chutes_api_key: std::env::var("CHUTES_API_KEY").ok(),
            openrouter_api_key: std::env::var("OPENROUTER_API_KEY").ok(),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            moonshot_api_key: std::env::var("MOONSHOT_API_KEY").ok(),
        }
    }
}

/// Split a `"provider_id/model_name"` reference into its two parts.
pub fn split_model_ref(model_ref: &str) -> Option<(&str, &str)> {
    model_ref.split_once('/')
}

/// Whether `model_ref` names a free-tier model that may reject tool
/// calls — the `:free` suffix convention OpenRouter lists free models
/// under (see spec §6 and the original `_is_free_model`).
pub fn is_free_model(model_ref: &str) -> bool {
    model_ref.ends_with(":free")
}

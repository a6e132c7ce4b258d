use serde::{Deserialize, Serialize};

fn d_max_turns() -> u32 {
    200
}
fn d_max_rounds() -> u32 {
    150
}
fn d_max_tokens() -> u32 {
    4096
}
fn d_temperature() -> f32 {
    0.7
}

/// Agent Runtime (C8) per-run budgets and generation defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Assistant turns in one run before it is force-ended.
    #[serde(default = "d_max_turns")]
    pub max_turns: u32,
    /// `provider.generate` invocations in one run before it is force-ended.
    #[serde(default = "d_max_rounds")]
    pub max_rounds: u32,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: d_max_turns(),
            max_rounds: d_max_rounds(),
            max_tokens: d_max_tokens(),
            temperature: d_temperature(),
        }
    }
}

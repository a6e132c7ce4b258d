use serde::{Deserialize, Serialize};

fn d_token_budget() -> u32 {
    120_000
}
fn d_preserve_tail_pairs() -> usize {
    1
}

/// Which truncation variant the context manager (C5) uses when a run is
/// constructed. `FileSpill` additionally writes evicted turns to the
/// workspace before dropping them from the live transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextVariant {
    Standard,
    FileSpill,
}

impl Default for ContextVariant {
    fn default() -> Self {
        ContextVariant::Standard
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "d_token_budget")]
    pub token_budget: u32,
    #[serde(default)]
    pub variant: ContextVariant,
    /// Number of trailing assistant+user pairs preserved verbatim by the
    /// middle-drop policy (spec default: the single last pair).
    #[serde(default = "d_preserve_tail_pairs")]
    pub preserve_tail_pairs: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: d_token_budget(),
            variant: ContextVariant::default(),
            preserve_tail_pairs: d_preserve_tail_pairs(),
        }
    }
}

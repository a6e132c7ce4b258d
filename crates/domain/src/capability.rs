use serde::{Deserialize, Serialize};

/// How a provider/model combination is asked to emit tool calls.
///
/// `Native` uses the provider's structured function-calling wire field.
/// `JsonEmulated` instructs the model via the system prompt to emit a
/// fenced JSON block that the provider parses back out of plain text —
/// used for models whose API has no native tool-calling support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallMode {
    Native,
    JsonEmulated,
}

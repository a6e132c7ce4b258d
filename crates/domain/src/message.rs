//! The agent-facing conversation model: strictly alternating user/assistant
//! turns built from typed blocks, independent of any provider's wire format.
//!
//! Providers translate `Turn`s into their own `tool::Message` shape; the
//! turn model itself never touches HTTP.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A reference to a tool the model asked to invoke. `input` is intentionally
/// left as an open JSON value — presentation-style tools sometimes pass an
/// array rather than an object, and the core must not assume otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRef {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// One piece of an assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssistantBlock {
    Text { text: String },
    ToolCall(ToolCallRef),
}

/// One piece of a user turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UserBlock {
    Text {
        text: String,
    },
    Image {
        /// Base64-encoded image bytes.
        data_base64: String,
        media_type: String,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: String,
    },
}

/// One turn in the alternating history. The discriminant IS the role;
/// there is no separate `Role` field to fall out of sync with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User(Vec<UserBlock>),
    Assistant(Vec<AssistantBlock>),
}

impl Turn {
    pub fn is_user(&self) -> bool {
        matches!(self, Turn::User(_))
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Turn::Assistant(_))
    }

    /// Concatenated text of all `Text` blocks, in order, joined with `\n`.
    pub fn text(&self) -> String {
        match self {
            Turn::User(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    UserBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Turn::Assistant(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    AssistantBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Tool calls carried by an assistant turn (empty for user turns).
    pub fn tool_calls(&self) -> Vec<&ToolCallRef> {
        match self {
            Turn::Assistant(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    AssistantBlock::ToolCall(tc) => Some(tc),
                    _ => None,
                })
                .collect(),
            Turn::User(_) => Vec::new(),
        }
    }
}

/// Canonical, hashable form of a JSON value, used as the dedup key for
/// tool calls. Recurses into arrays and objects so presentation-style
/// inputs (arrays at the top level) don't trip the historical
/// "unhashable type" defect this replaces.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Canonical {
    Null,
    Bool(bool),
    /// Numbers are compared by their canonical string form — avoids
    /// pulling in an `Eq`/`Ord` float wrapper for a key that's never
    /// arithmetically combined.
    Number(String),
    Str(String),
    Array(Vec<Canonical>),
    /// Object keys are sorted so key order never affects the key.
    Object(Vec<(String, Canonical)>),
}

fn canonicalize(v: &Value) -> Canonical {
    match v {
        Value::Null => Canonical::Null,
        Value::Bool(b) => Canonical::Bool(*b),
        Value::Number(n) => Canonical::Number(n.to_string()),
        Value::String(s) => Canonical::Str(s.clone()),
        Value::Array(items) => Canonical::Array(items.iter().map(canonicalize).collect()),
        Value::Object(map) => {
            let mut entries: Vec<(String, Canonical)> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Canonical::Object(entries)
        }
    }
}

/// Dedup key for a tool call: `(name, canonicalized_input)`. `canonicalize`
/// is total over any JSON value, so there is no stringified-input
/// fallback here — unlike the older implementation this replaces, there
/// is no case where recursion can fail and fall back to raw `to_string`.
fn dedup_key(name: &str, input: &Value) -> (String, String) {
    (name.to_string(), format!("{:?}", canonicalize(input)))
}

/// Ordered, role-alternating transcript (C4).
///
/// Invariants enforced here: turns strictly alternate user→assistant→…
/// starting with a user turn; a tool result can only be added once the
/// preceding assistant turn produced the matching `tool_call_id`.
#[derive(Debug, Clone, Default)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// Whether the next turn to add must be a user turn.
    fn expects_user(&self) -> bool {
        self.turns.len() % 2 == 0
    }

    pub fn add_user_prompt(&mut self, text: impl Into<String>, images: Vec<UserBlock>) -> Result<()> {
        let mut blocks = vec![UserBlock::Text { text: text.into() }];
        blocks.extend(images);
        self.add_user_turn(blocks)
    }

    pub fn add_user_turn(&mut self, items: Vec<UserBlock>) -> Result<()> {
        if !self.expects_user() {
            return Err(Error::TurnAlternation { expected: "assistant" });
        }
        self.turns.push(Turn::User(items));
        Ok(())
    }

    pub fn add_assistant_turn(&mut self, items: Vec<AssistantBlock>) -> Result<()> {
        if self.expects_user() {
            return Err(Error::TurnAlternation { expected: "user" });
        }
        self.turns.push(Turn::Assistant(items));
        Ok(())
    }

    /// Append one tool result as a single-block user turn, prefixed per
    /// the wire convention (`"Tool result from <name>:"` is applied by
    /// the provider translation layer, not here — this stores the raw
    /// output).
    pub fn add_tool_call_result(
        &mut self,
        call: &ToolCallRef,
        output: impl Into<String>,
    ) -> Result<()> {
        self.add_tool_call_results(std::slice::from_ref(call), vec![output.into()])
    }

    pub fn add_tool_call_results(
        &mut self,
        calls: &[ToolCallRef],
        outputs: Vec<String>,
    ) -> Result<()> {
        let blocks = calls
            .iter()
            .zip(outputs)
            .map(|(call, output)| UserBlock::ToolResult {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                output,
            })
            .collect();
        self.add_user_turn(blocks)
    }

    /// Tool calls from the last turn, iff it was an assistant turn, with
    /// `(name, canonicalized_input)` duplicates removed (first occurrence
    /// wins). Empty for every other case, including right after a user
    /// turn was just added.
    pub fn pending_tool_calls(&self) -> Vec<ToolCallRef> {
        let Some(Turn::Assistant(blocks)) = self.turns.last() else {
            return Vec::new();
        };

        let mut seen: BTreeMap<(String, String), ()> = BTreeMap::new();
        let mut out = Vec::new();
        for block in blocks {
            if let AssistantBlock::ToolCall(tc) = block {
                let key = dedup_key(&tc.name, &tc.input);
                if seen.insert(key, ()).is_none() {
                    out.push(tc.clone());
                }
            }
        }
        out
    }

    pub fn last_assistant_text(&self) -> Option<String> {
        self.turns.iter().rev().find_map(|t| match t {
            Turn::Assistant(_) => {
                let text = t.text();
                if text.is_empty() {
                    None
                } else {
                    Some(text)
                }
            }
            Turn::User(_) => None,
        })
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn messages(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Replace the live transcript, e.g. after context-manager truncation
    ///. The caller is responsible for keeping alternation intact.
    pub fn replace(&mut self, turns: Vec<Turn>) {
        self.turns = turns;
    }

    /// Last 8 assistant turns, most-recent-last — the window the loop
    /// detector inspects.
    pub fn recent_assistant_turns(&self, window: usize) -> Vec<&Turn> {
        self.turns
            .iter()
            .filter(|t| t.is_assistant())
            .rev()
            .take(window)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_text_joins_text_blocks_only() {
        let turn = Turn::Assistant(vec![
            AssistantBlock::Text { text: "a".into() },
            AssistantBlock::ToolCall(ToolCallRef {
                id: "1".into(),
                name: "calc".into(),
                input: serde_json::json!({}),
            }),
            AssistantBlock::Text { text: "b".into() },
        ]);
        assert_eq!(turn.text(), "a\nb");
    }

    #[test]
    fn tool_calls_empty_for_user_turn() {
        let turn = Turn::User(vec![UserBlock::Text { text: "hi".into() }]);
        assert!(turn.tool_calls().is_empty());
    }

    // ── History ─────────────────────────────────────────────────────

    fn tc(id: &str, name: &str, input: Value) -> ToolCallRef {
        ToolCallRef {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    #[test]
    fn history_starts_expecting_a_user_turn() {
        let mut h = History::new();
        let err = h
            .add_assistant_turn(vec![AssistantBlock::Text { text: "nope".into() }])
            .unwrap_err();
        assert!(matches!(err, Error::TurnAlternation { expected: "user" }));
    }

    #[test]
    fn history_rejects_back_to_back_user_turns() {
        let mut h = History::new();
        h.add_user_prompt("hi", vec![]).unwrap();
        let err = h.add_user_turn(vec![UserBlock::Text { text: "again".into() }]).unwrap_err();
        assert!(matches!(err, Error::TurnAlternation { expected: "assistant" }));
    }

    #[test]
    fn pending_tool_calls_empty_right_after_user_turn() {
        let mut h = History::new();
        h.add_user_prompt("hi", vec![]).unwrap();
        assert!(h.pending_tool_calls().is_empty());
    }

    #[test]
    fn pending_tool_calls_only_from_last_assistant_turn() {
        let mut h = History::new();
        h.add_user_prompt("hi", vec![]).unwrap();
        h.add_assistant_turn(vec![AssistantBlock::ToolCall(tc("1", "calc", serde_json::json!({"x":1})))])
            .unwrap();
        let pending = h.pending_tool_calls();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name, "calc");
    }

    #[test]
    fn pending_tool_calls_dedups_identical_calls() {
        let mut h = History::new();
        h.add_user_prompt("hi", vec![]).unwrap();
        h.add_assistant_turn(vec![
            AssistantBlock::ToolCall(tc("1", "search", serde_json::json!({"q": "rust"}))),
            AssistantBlock::ToolCall(tc("2", "search", serde_json::json!({"q": "rust"}))),
            AssistantBlock::ToolCall(tc("3", "search", serde_json::json!({"q": "other"}))),
        ])
        .unwrap();
        let pending = h.pending_tool_calls();
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn pending_tool_calls_dedups_array_and_nested_map_inputs_without_panicking() {
        // Historical defect: list/dict inputs raised "unhashable type".
        let input = serde_json::json!(["a", {"k": "v"}, "b"]);
        let mut h = History::new();
        h.add_user_prompt("hi", vec![]).unwrap();
        h.add_assistant_turn(vec![
            AssistantBlock::ToolCall(tc("1", "present", input.clone())),
            AssistantBlock::ToolCall(tc("2", "present", input)),
        ])
        .unwrap();
        let pending = h.pending_tool_calls();
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn dedup_key_ignores_object_key_order() {
        let a = dedup_key("t", &serde_json::json!({"a": 1, "b": 2}));
        let b = dedup_key("t", &serde_json::json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn last_assistant_text_skips_tool_only_turns() {
        let mut h = History::new();
        h.add_user_prompt("hi", vec![]).unwrap();
        h.add_assistant_turn(vec![AssistantBlock::ToolCall(tc("1", "calc", serde_json::json!({})))])
            .unwrap();
        assert_eq!(h.last_assistant_text(), None);
    }

    #[test]
    fn last_assistant_text_returns_most_recent() {
        let mut h = History::new();
        h.add_user_prompt("hi", vec![]).unwrap();
        h.add_assistant_turn(vec![AssistantBlock::Text { text: "answer".into() }]).unwrap();
        assert_eq!(h.last_assistant_text().as_deref(), Some("answer"));
    }

    #[test]
    fn recent_assistant_turns_respects_window_and_order() {
        let mut h = History::new();
        for i in 0..10 {
            h.add_user_prompt(format!("q{i}"), vec![]).unwrap();
            h.add_assistant_turn(vec![AssistantBlock::Text { text: format!("a{i}") }]).unwrap();
        }
        let recent = h.recent_assistant_turns(8);
        assert_eq!(recent.len(), 8);
        assert_eq!(recent[0].text(), "a2");
        assert_eq!(recent[7].text(), "a9");
    }

    #[test]
    fn clear_resets_alternation_to_expect_user() {
        let mut h = History::new();
        h.add_user_prompt("hi", vec![]).unwrap();
        h.add_assistant_turn(vec![AssistantBlock::Text { text: "ok".into() }]).unwrap();
        h.clear();
        assert!(h.is_empty());
        // Should accept a user turn again without error.
        h.add_user_turn(vec![UserBlock::Text { text: "restart".into() }]).unwrap();
    }
}

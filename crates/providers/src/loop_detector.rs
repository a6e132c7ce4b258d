//! Tool-call loop detector.
//!
//! Inspects the last 8 assistant turns and blocks a *candidate* tool
//! call when it would extend a loop, per tool-specific thresholds
//! grounded in the original `_is_tool_call_loop`.

use agentcore_domain::message::{AssistantBlock, ToolCallRef, Turn};
use serde_json::Value;

const SEQUENTIAL_THINKING: &str = "sequential_thinking";
const RESEARCH_TOOLS: &[&str] = &["web_search", "visit_webpage"];

/// Count occurrences of `name` among the tool calls in `recent`, and
/// separately count calls that are byte-identical to `(name, args)`.
fn counts(recent: &[&Turn], name: &str, args: &Value) -> (usize, usize) {
    let mut total = 0;
    let mut identical = 0;
    for turn in recent {
        if let Turn::Assistant(blocks) = turn {
            for block in blocks {
                if let AssistantBlock::ToolCall(tc) = block {
                    if tc.name == name {
                        total += 1;
                        if &tc.input == args {
                            identical += 1;
                        }
                    }
                }
            }
        }
    }
    (total, identical)
}

/// Whether `candidate` would be a blocked loop given the last 8
/// assistant turns (already windowed by the caller via
/// `History::recent_assistant_turns`).
pub fn is_loop(recent: &[&Turn], candidate: &ToolCallRef) -> bool {
    let (total, identical) = counts(recent, &candidate.name, &candidate.input);

    if candidate.name == SEQUENTIAL_THINKING {
        return total >= 3;
    }
    if RESEARCH_TOOLS.contains(&candidate.name.as_str()) {
        if total >= 5 {
            return true;
        }
        return total >= 4 && identical >= 2;
    }
    total >= 3
}

/// Filter a batch of candidate calls, dropping any that the detector
/// blocks. Blocking is evaluated against `recent` only (not against
/// calls earlier in the same batch) since the candidates come from a
/// single not-yet-appended assistant turn.
pub fn filter_blocked<'a>(
    recent: &[&Turn],
    candidates: &'a [ToolCallRef],
) -> (Vec<&'a ToolCallRef>, Vec<&'a ToolCallRef>) {
    let mut kept = Vec::new();
    let mut blocked = Vec::new();
    for c in candidates {
        if is_loop(recent, c) {
            blocked.push(c);
        } else {
            kept.push(c);
        }
    }
    (kept, blocked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assistant_call(name: &str, args: Value) -> Turn {
        Turn::Assistant(vec![AssistantBlock::ToolCall(ToolCallRef {
            id: "x".into(),
            name: name.into(),
            input: args,
        })])
    }

    #[test]
    fn sequential_thinking_blocked_at_three() {
        let t0 = assistant_call(SEQUENTIAL_THINKING, json!({"n": 1}));
        let t1 = assistant_call(SEQUENTIAL_THINKING, json!({"n": 2}));
        let t2 = assistant_call(SEQUENTIAL_THINKING, json!({"n": 3}));
        let recent: Vec<&Turn> = vec![&t0, &t1, &t2];
        let candidate = ToolCallRef {
            id: "y".into(),
            name: SEQUENTIAL_THINKING.into(),
            input: json!({"n": 4}),
        };
        assert!(is_loop(&recent, &candidate));
    }

    #[test]
    fn sequential_thinking_allowed_below_three() {
        let t0 = assistant_call(SEQUENTIAL_THINKING, json!({"n": 1}));
        let recent: Vec<&Turn> = vec![&t0];
        let candidate = ToolCallRef {
            id: "y".into(),
            name: SEQUENTIAL_THINKING.into(),
            input: json!({"n": 2}),
        };
        assert!(!is_loop(&recent, &candidate));
    }

    #[test]
    fn research_tool_blocked_on_identical_repeat() {
        let args = json!({"q": "rust async"});
        let turns: Vec<Turn> = (0..4)
            .map(|_| assistant_call("web_search", args.clone()))
            .collect();
        let recent: Vec<&Turn> = turns.iter().collect();
        let candidate = ToolCallRef {
            id: "y".into(),
            name: "web_search".into(),
            input: args,
        };
        assert!(is_loop(&recent, &candidate));
    }

    #[test]
    fn research_tool_allowed_with_varied_args_below_five() {
        let turns: Vec<Turn> = (0..4)
            .map(|i| assistant_call("web_search", json!({"q": format!("q{i}")})))
            .collect();
        let recent: Vec<&Turn> = turns.iter().collect();
        let candidate = ToolCallRef {
            id: "y".into(),
            name: "web_search".into(),
            input: json!({"q": "q-new"}),
        };
        assert!(!is_loop(&recent, &candidate));
    }

    #[test]
    fn research_tool_blocked_unconditionally_at_five() {
        let turns: Vec<Turn> = (0..5)
            .map(|i| assistant_call("web_search", json!({"q": format!("q{i}")})))
            .collect();
        let recent: Vec<&Turn> = turns.iter().collect();
        let candidate = ToolCallRef {
            id: "y".into(),
            name: "web_search".into(),
            input: json!({"q": "q-new"}),
        };
        assert!(is_loop(&recent, &candidate));
    }

    #[test]
    fn other_tool_blocked_at_three() {
        let turns: Vec<Turn> = (0..3).map(|_| assistant_call("calculate", json!({}))).collect();
        let recent: Vec<&Turn> = turns.iter().collect();
        let candidate = ToolCallRef {
            id: "y".into(),
            name: "calculate".into(),
            input: json!({}),
        };
        assert!(is_loop(&recent, &candidate));
    }

    #[test]
    fn filter_blocked_partitions_candidates() {
        let turns: Vec<Turn> = (0..3).map(|_| assistant_call("calculate", json!({}))).collect();
        let recent: Vec<&Turn> = turns.iter().collect();
        let candidates = vec![
            ToolCallRef { id: "1".into(), name: "calculate".into(), input: json!({}) },
            ToolCallRef { id: "2".into(), name: "other".into(), input: json!({}) },
        ];
        let (kept, blocked) = filter_blocked(&recent, &candidates);
        assert_eq!(kept.len(), 1);
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].name, "calculate");
    }
}

//! JSON-emulated tool calling: used by providers/models with no
//! native function-calling field. The model is instructed to emit a
//! fenced or inline JSON block; this module builds that instruction and
//! parses it back out of the response text.

use agentcore_domain::message::ToolCallRef;
use agentcore_domain::tool::ToolDefinition;
use regex::Regex;
use serde_json::Value;

/// Build the system-prompt suffix describing the exact JSON schema and
/// constraints the model must follow when emitting a tool call.
pub fn build_instruction(tools: &[ToolDefinition]) -> String {
    let mut out = String::from(
        "\n\nIMPORTANT: When you need to use a tool, you MUST output a JSON object in the \
         following EXACT format:\n```json\n{\"tool_call\":{\"id\":\"call_<unique_id>\",\
         \"name\":\"<tool_name>\",\"arguments\":{<tool_arguments>}}}\n```\n\nRULES:\n\
         - Use ONLY ONE tool call per response\n\
         - Do NOT repeat an identical call you've already made\n\
         - Only the tool names listed below are valid\n\
         - The JSON block MUST be complete, with matching braces\n\n\
         Available tools:\n",
    );
    for t in tools {
        out.push_str(&format!("- {}: {}\n", t.name, t.description));
    }
    if tools.iter().any(|t| t.name == "sequential_thinking") {
        out.push_str(
            "\nFor sequential_thinking: do NOT include optional fields \
             (isRevision, revisesThought, branchFromThought, branchId, \
             needsMoreThoughts) unless you are actually using them.\n",
        );
    }
    out
}

/// Attempt to balance an unterminated JSON object by appending closing
/// braces/brackets for any that were opened but never closed, ignoring
/// braces inside string literals.
fn balance_braces(s: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for ch in s.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }
    let mut repaired = s.to_string();
    while let Some(closer) = stack.pop() {
        repaired.push(closer);
    }
    repaired
}

/// A parsed tool call extracted from model text, plus the span it
/// occupied so the caller can strip it out of the presented text.
pub struct ExtractedCall {
    pub call: ToolCallRef,
    pub span: (usize, usize),
    /// Set when `call.name` isn't in the active tool registry:
    /// the span is still stripped from the presented text, but the
    /// caller must not turn this into an `AssistantBlock::ToolCall`.
    pub ignored: bool,
}

/// Scan `text` for a `{"tool_call": {...}}` block (fenced in ```json ... ```
/// or inline), repairing truncation by brace-balancing. Returns at most
/// one call, matching the "one call per response" rule.
///
/// `valid_names` is the active tool registry: a call whose `name` isn't
/// in it is ignored — the JSON span is still returned so the
/// caller can strip it from the presented text, but `ignored` is set.
pub fn extract_tool_call(text: &str, valid_names: &[String]) -> Option<ExtractedCall> {
    let fence = Regex::new(r"```(?:json)?\s*(\{[\s\S]*?\})\s*```").ok()?;
    if let Some(m) = fence.captures(text) {
        let whole = m.get(0)?;
        let inner = m.get(1)?.as_str();
        if let Some(call) = parse_tool_call_json(inner) {
            return Some(ExtractedCall {
                ignored: !valid_names.iter().any(|n| n == &call.name),
                call,
                span: (whole.start(), whole.end()),
            });
        }
    }

    // Fall back to an inline, possibly-truncated object starting at the
    // first occurrence of the tool_call key.
    let key_pos = text.find("\"tool_call\"")?;
    let obj_start = text[..key_pos].rfind('{')?;
    let rest = &text[obj_start..];
    let repaired = balance_braces(rest);
    let call = parse_tool_call_json(&repaired)?;
    Some(ExtractedCall {
        ignored: !valid_names.iter().any(|n| n == &call.name),
        call,
        span: (obj_start, text.len()),
    })
}

fn parse_tool_call_json(raw: &str) -> Option<ToolCallRef> {
    let repaired = balance_braces(raw);
    let value: Value = serde_json::from_str(&repaired).ok()?;
    let tc = value.get("tool_call")?;
    let name = tc.get("name")?.as_str()?.to_string();
    let id = tc
        .get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4()));
    let input = tc.get("arguments").cloned().unwrap_or(Value::Object(Default::default()));
    Some(ToolCallRef { id, name, input })
}

/// Strip the extracted call's span from `text`, trimming the result.
pub fn strip_call(text: &str, extracted: &ExtractedCall) -> String {
    let (start, end) = extracted.span;
    let mut out = String::new();
    out.push_str(&text[..start]);
    out.push_str(&text[end.min(text.len())..]);
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(ns: &[&str]) -> Vec<String> {
        ns.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extracts_fenced_call() {
        let text = "I'll look that up.\n```json\n{\"tool_call\": {\"id\": \"call_1\", \"name\": \"search\", \"arguments\": {\"q\": \"rust\"}}}\n```\nDone.";
        let extracted = extract_tool_call(text, &names(&["search"])).unwrap();
        assert_eq!(extracted.call.name, "search");
        assert_eq!(extracted.call.input["q"], "rust");
        assert!(!extracted.ignored);
        let stripped = strip_call(text, &extracted);
        assert!(stripped.contains("I'll look"));
        assert!(!stripped.contains("tool_call"));
    }

    #[test]
    fn repairs_truncated_inline_call() {
        let text = r#"Let me check. {"tool_call": {"id": "call_2", "name": "calc", "arguments": {"expr": "1+1""#;
        let extracted = extract_tool_call(text, &names(&["calc"])).unwrap();
        assert_eq!(extracted.call.name, "calc");
        assert_eq!(extracted.call.input["expr"], "1+1");
    }

    #[test]
    fn no_call_returns_none() {
        assert!(extract_tool_call("just a plain answer, no tools needed", &names(&[])).is_none());
    }

    #[test]
    fn missing_id_is_synthesized() {
        let text = r#"{"tool_call": {"name": "search", "arguments": {}}}"#;
        let extracted = extract_tool_call(text, &names(&["search"])).unwrap();
        assert!(!extracted.call.id.is_empty());
    }

    #[test]
    fn call_to_unregistered_tool_is_marked_ignored() {
        let text = r#"{"tool_call": {"id": "c1", "name": "delete_everything", "arguments": {}}}"#;
        let extracted = extract_tool_call(text, &names(&["calc"])).unwrap();
        assert!(extracted.ignored);
    }

    #[test]
    fn instruction_lists_tool_names() {
        let tools = vec![ToolDefinition {
            name: "calculate".into(),
            description: "do math".into(),
            parameters: serde_json::json!({}),
        }];
        let instr = build_instruction(&tools);
        assert!(instr.contains("calculate"));
        assert!(instr.contains("ONLY ONE tool call"));
    }
}

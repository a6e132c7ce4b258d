//! Translates the agent-facing [`Turn`] history into provider wire
//! `Message`s, in either native tool-calling shape or JSON-emulated
//! shape.
//!
//! Native mode keeps tool calls/results as structured content parts.
//! Emulated mode flattens them into plain text so a model with no
//! function-calling field still sees what happened.

use agentcore_domain::message::{AssistantBlock, Turn, UserBlock};
use agentcore_domain::tool::{ContentPart, Message, MessageContent};

/// Render the full turn history as wire messages for a native
/// tool-calling adapter.
pub fn to_native_messages(turns: &[Turn]) -> Vec<Message> {
    turns.iter().map(turn_to_native_message).collect()
}

fn turn_to_native_message(turn: &Turn) -> Message {
    match turn {
        Turn::User(blocks) => {
            let parts = blocks
                .iter()
                .map(|b| match b {
                    UserBlock::Text { text } => ContentPart::Text { text: text.clone() },
                    UserBlock::Image { data_base64, media_type } => ContentPart::Image {
                        url: format!("data:{media_type};base64,{data_base64}"),
                        media_type: Some(media_type.clone()),
                    },
                    UserBlock::ToolResult { tool_call_id, output, .. } => ContentPart::ToolResult {
                        tool_use_id: tool_call_id.clone(),
                        content: output.clone(),
                        is_error: false,
                    },
                })
                .collect();
            Message {
                role: agentcore_domain::tool::Role::User,
                content: MessageContent::Parts(parts),
            }
        }
        Turn::Assistant(blocks) => {
            let parts = blocks
                .iter()
                .map(|b| match b {
                    AssistantBlock::Text { text } => ContentPart::Text { text: text.clone() },
                    AssistantBlock::ToolCall(tc) => ContentPart::ToolUse {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        input: tc.input.clone(),
                    },
                })
                .collect();
            Message {
                role: agentcore_domain::tool::Role::Assistant,
                content: MessageContent::Parts(parts),
            }
        }
    }
}

/// Render the full turn history for a JSON-emulated adapter: every
/// turn becomes a single text message, with past tool calls rewritten
/// as a plain-text description ("I'll use the <name> tool with these
/// parameters: <pretty-json>") since the model has no native memory of
/// having made a structured call, and past tool results rewritten as
/// `"Tool result from <name>:\n<output>"`.
pub fn to_emulated_messages(turns: &[Turn]) -> Vec<Message> {
    turns.iter().map(turn_to_emulated_message).collect()
}

fn turn_to_emulated_message(turn: &Turn) -> Message {
    match turn {
        Turn::User(blocks) => {
            let text = blocks
                .iter()
                .map(|b| match b {
                    UserBlock::Text { text } => text.clone(),
                    UserBlock::Image { .. } => "[image attached]".to_string(),
                    UserBlock::ToolResult { tool_name, output, .. } => {
                        format!("Tool result from {tool_name}:\n{output}")
                    }
                })
                .collect::<Vec<_>>()
                .join("\n\n");
            Message::user(text)
        }
        Turn::Assistant(blocks) => {
            let text = blocks
                .iter()
                .map(|b| match b {
                    AssistantBlock::Text { text } => text.clone(),
                    AssistantBlock::ToolCall(tc) => format!(
                        "I'll use the {} tool with these parameters: {}",
                        tc.name,
                        serde_json::to_string_pretty(&tc.input).unwrap_or_else(|_| tc.input.to_string()),
                    ),
                })
                .collect::<Vec<_>>()
                .join("\n\n");
            Message::assistant(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentcore_domain::message::ToolCallRef;
    use serde_json::json;

    #[test]
    fn native_tool_result_becomes_tool_result_part() {
        let turns = vec![Turn::User(vec![UserBlock::ToolResult {
            tool_call_id: "c1".into(),
            tool_name: "calc".into(),
            output: "4".into(),
        }])];
        let messages = to_native_messages(&turns);
        match &messages[0].content {
            MessageContent::Parts(parts) => {
                assert!(matches!(&parts[0], ContentPart::ToolResult { tool_use_id, .. } if tool_use_id == "c1"));
            }
            _ => panic!("expected parts"),
        }
    }

    #[test]
    fn emulated_past_tool_call_is_rendered_as_plain_text_description() {
        let turns = vec![Turn::Assistant(vec![AssistantBlock::ToolCall(ToolCallRef {
            id: "c1".into(),
            name: "search".into(),
            input: json!({"q": "rust"}),
        })])];
        let messages = to_emulated_messages(&turns);
        let text = messages[0].content.extract_all_text();
        assert!(text.starts_with("I'll use the search tool with these parameters:"));
        assert!(text.contains("\"q\""));
        assert!(text.contains("rust"));
    }

    #[test]
    fn emulated_tool_result_is_prefixed() {
        let turns = vec![Turn::User(vec![UserBlock::ToolResult {
            tool_call_id: "c1".into(),
            tool_name: "calc".into(),
            output: "4".into(),
        }])];
        let messages = to_emulated_messages(&turns);
        let text = messages[0].content.extract_all_text();
        assert!(text.starts_with("Tool result from calc:"));
    }
}

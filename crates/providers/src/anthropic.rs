//! Anthropic-native adapter.
//!
//! Implements the Anthropic Messages API, including native tool use.
//! System messages go in a separate top-level `system` field, per
//! Anthropic's wire format.

use agentcore_domain::capability::ToolCallMode;
use agentcore_domain::error::{ProviderError, ProviderErrorKind};
use agentcore_domain::message::AssistantBlock;
use agentcore_domain::tool::ToolDefinition;
use serde_json::Value;

use crate::json_emulation;
use crate::traits::{ChatAdapter, GenerateMetadata, GenerateRequest, ToolChoice};
use crate::translate;
use crate::util::from_reqwest;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

pub struct AnthropicAdapter {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("reqwest client builds"),
        }
    }

    fn build_body(&self, model: &str, req: &GenerateRequest<'_>) -> Value {
        let native = matches!(req.tool_call_mode, ToolCallMode::Native);

        let mut system = req.system_prompt.unwrap_or_default().to_string();
        if !native {
            system.push_str(&json_emulation::build_instruction(req.tools));
        }

        let messages: Vec<Value> = if native {
            translate::to_native_messages(req.messages)
                .into_iter()
                .map(|m| message_to_wire(&m))
                .collect()
        } else {
            translate::to_emulated_messages(req.messages)
                .into_iter()
                .map(|m| message_to_wire(&m))
                .collect()
        };

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
        });

        if !system.is_empty() {
            body["system"] = Value::String(system);
        }

        if native && !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(tool_to_wire).collect());
            body["tool_choice"] = tool_choice_to_wire(&req.tool_choice);
        }

        body
    }
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

fn tool_choice_to_wire(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => serde_json::json!({"type": "auto"}),
        ToolChoice::Any => serde_json::json!({"type": "any"}),
        ToolChoice::Tool(name) => serde_json::json!({"type": "tool", "name": name}),
        ToolChoice::None => serde_json::json!({"type": "auto"}),
    }
}

fn message_to_wire(msg: &agentcore_domain::tool::Message) -> Value {
    use agentcore_domain::tool::{ContentPart, MessageContent, Role};

    let role = match msg.role {
        Role::User | Role::Tool => "user",
        Role::Assistant => "assistant",
        Role::System => "user",
    };

    let content: Vec<Value> = match &msg.content {
        MessageContent::Text(t) => vec![serde_json::json!({"type": "text", "text": t})],
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => serde_json::json!({"type": "text", "text": text}),
                ContentPart::ToolUse { id, name, input } => serde_json::json!({
                    "type": "tool_use", "id": id, "name": name, "input": input,
                }),
                ContentPart::ToolResult { tool_use_id, content, is_error } => serde_json::json!({
                    "type": "tool_result", "tool_use_id": tool_use_id, "content": content, "is_error": is_error,
                }),
                ContentPart::Image { url, media_type } => serde_json::json!({
                    "type": "image",
                    "source": {"type": "base64", "media_type": media_type.as_deref().unwrap_or("image/png"), "data": url},
                }),
            })
            .collect(),
    };

    serde_json::json!({"role": role, "content": content})
}

fn parse_response(
    provider: &str,
    model: &str,
    native: bool,
    body: &Value,
    tools: &[ToolDefinition],
) -> Result<(Vec<AssistantBlock>, GenerateMetadata), ProviderError> {
    let content_arr = body
        .get("content")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut blocks = Vec::new();
    let mut text_buf = String::new();

    for block in &content_arr {
        match block.get("type").and_then(|v| v.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    text_buf.push_str(t);
                }
            }
            Some("tool_use") if native => {
                if !text_buf.is_empty() {
                    blocks.push(AssistantBlock::Text { text: std::mem::take(&mut text_buf) });
                }
                let id = block.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let name = block.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let input = block.get("input").cloned().unwrap_or(Value::Object(Default::default()));
                blocks.push(AssistantBlock::ToolCall(agentcore_domain::message::ToolCallRef { id, name, input }));
            }
            _ => {}
        }
    }

    if !native {
        let names: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();
        if let Some(extracted) = json_emulation::extract_tool_call(&text_buf, &names) {
            let remaining = json_emulation::strip_call(&text_buf, &extracted);
            text_buf = remaining;
            if !extracted.ignored {
                if !text_buf.is_empty() {
                    blocks.push(AssistantBlock::Text { text: std::mem::take(&mut text_buf) });
                }
                blocks.push(AssistantBlock::ToolCall(extracted.call));
            }
        }
    }

    if !text_buf.is_empty() {
        blocks.push(AssistantBlock::Text { text: text_buf });
    }

    let input_tokens = body
        .get("usage")
        .and_then(|u| u.get("input_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;
    let output_tokens = body
        .get("usage")
        .and_then(|u| u.get("output_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;

    if blocks.is_empty() {
        return Err(ProviderError::new(
            provider,
            model,
            "response had no text or tool_use content",
            ProviderErrorKind::MalformedResponse,
        ));
    }

    Ok((
        blocks,
        GenerateMetadata {
            input_tokens,
            output_tokens,
            raw_response: body.clone(),
        },
    ))
}

#[async_trait::async_trait]
impl ChatAdapter for AnthropicAdapter {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn supports_native_tools(&self) -> bool {
        true
    }

    async fn generate(
        &self,
        model: &str,
        req: &GenerateRequest<'_>,
    ) -> Result<(Vec<AssistantBlock>, GenerateMetadata), ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(model, req);
        let native = matches!(req.tool_call_mode, ToolCallMode::Native);

        tracing::debug!(provider = "anthropic", model, "sending generate request");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| from_reqwest("anthropic", model, e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| from_reqwest("anthropic", model, e))?;

        if !status.is_success() {
            let kind = ProviderError::classify(Some(status.as_u16()), &text);
            return Err(ProviderError::new("anthropic", model, text, kind));
        }

        let parsed: Value = serde_json::from_str(&text).map_err(|e| {
            ProviderError::new("anthropic", model, e.to_string(), ProviderErrorKind::MalformedResponse)
        })?;

        parse_response("anthropic", model, native, &parsed, req.tools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc_tool() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "calc".into(),
            description: "do math".into(),
            parameters: serde_json::json!({}),
        }]
    }

    #[test]
    fn parse_response_extracts_native_tool_use() {
        let body = serde_json::json!({
            "content": [
                {"type": "text", "text": "let me check"},
                {"type": "tool_use", "id": "t1", "name": "search", "input": {"q": "rust"}},
            ],
            "usage": {"input_tokens": 10, "output_tokens": 5},
        });
        let (blocks, meta) = parse_response("anthropic", "claude", true, &body, &[]).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(meta.input_tokens, 10);
        assert!(matches!(blocks[1], AssistantBlock::ToolCall(_)));
    }

    #[test]
    fn parse_response_extracts_emulated_tool_call() {
        let body = serde_json::json!({
            "content": [
                {"type": "text", "text": "```json\n{\"tool_call\": {\"id\": \"c1\", \"name\": \"calc\", \"arguments\": {}}}\n```"},
            ],
        });
        let (blocks, _) = parse_response("anthropic", "claude", false, &body, &calc_tool()).unwrap();
        assert!(blocks.iter().any(|b| matches!(b, AssistantBlock::ToolCall(tc) if tc.name == "calc")));
    }

    #[test]
    fn parse_response_ignores_emulated_call_to_unregistered_tool() {
        let body = serde_json::json!({
            "content": [
                {"type": "text", "text": "Sure thing.\n```json\n{\"tool_call\": {\"id\": \"c1\", \"name\": \"rm_rf\", \"arguments\": {}}}\n```"},
            ],
        });
        let (blocks, _) = parse_response("anthropic", "claude", false, &body, &calc_tool()).unwrap();
        assert!(!blocks.iter().any(|b| matches!(b, AssistantBlock::ToolCall(_))));
        assert!(blocks.iter().any(|b| matches!(b, AssistantBlock::Text { text } if text.contains("Sure thing"))));
    }

    #[test]
    fn parse_response_errors_on_empty_content() {
        let body = serde_json::json!({"content": []});
        let err = parse_response("anthropic", "claude", true, &body, &[]).unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::MalformedResponse);
    }
}

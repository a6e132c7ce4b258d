//! Generic OpenAI-compatible adapter, parameterized by base URL and API
//! key. Backs the chutes, openrouter, and moonshot providers (each of
//! which speaks the same `/chat/completions` wire format).

use agentcore_domain::capability::ToolCallMode;
use agentcore_domain::error::{ProviderError, ProviderErrorKind};
use agentcore_domain::message::{AssistantBlock, ToolCallRef};
use agentcore_domain::tool::ToolDefinition;
use serde_json::Value;

use crate::json_emulation;
use crate::traits::{ChatAdapter, GenerateMetadata, GenerateRequest, ToolChoice};
use crate::translate;
use crate::util::from_reqwest;

pub struct OpenAiCompatAdapter {
    id: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(300))
                .build()
                .expect("reqwest client builds"),
        }
    }

    pub fn chutes(api_key: impl Into<String>) -> Self {
        Self::new("chutes", "https://llm.chutes.ai/v1", api_key)
    }

    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    pub fn moonshot(api_key: impl Into<String>) -> Self {
        Self::new("moonshot", "https://api.moonshot.cn/v1", api_key)
    }

    fn build_body(&self, model: &str, req: &GenerateRequest<'_>) -> Value {
        let native = matches!(req.tool_call_mode, ToolCallMode::Native);

        let mut system = req.system_prompt.unwrap_or_default().to_string();
        if !native {
            system.push_str(&json_emulation::build_instruction(req.tools));
        }

        let turn_messages = if native {
            translate::to_native_messages(req.messages)
        } else {
            translate::to_emulated_messages(req.messages)
        };

        let mut messages: Vec<Value> = Vec::new();
        if !system.is_empty() {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        for m in &turn_messages {
            messages.push(message_to_wire(m));
        }

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
        });

        if native && !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(tool_to_wire).collect());
            body["tool_choice"] = tool_choice_to_wire(&req.tool_choice);
        }

        body
    }
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        },
    })
}

fn tool_choice_to_wire(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::String("auto".into()),
        ToolChoice::Any => Value::String("required".into()),
        ToolChoice::Tool(name) => serde_json::json!({"type": "function", "function": {"name": name}}),
        ToolChoice::None => Value::String("none".into()),
    }
}

fn message_to_wire(msg: &agentcore_domain::tool::Message) -> Value {
    use agentcore_domain::tool::{ContentPart, MessageContent, Role};

    match &msg.content {
        MessageContent::Text(t) => {
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
                Role::Tool => "tool",
            };
            serde_json::json!({"role": role, "content": t})
        }
        MessageContent::Parts(parts) => {
            // An assistant turn with a tool_use part becomes a
            // `tool_calls` message with no content, per the OpenAI
            // wire convention this adapter family speaks.
            if let Role::Assistant = msg.role {
                if let Some(tc) = parts.iter().find_map(|p| match p {
                    ContentPart::ToolUse { id, name, input } => Some((id, name, input)),
                    _ => None,
                }) {
                    return serde_json::json!({
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": tc.0,
                            "type": "function",
                            "function": {"name": tc.1, "arguments": tc.2.to_string()},
                        }],
                    });
                }
            }
            if let Role::User | Role::Tool = msg.role {
                if let Some(ContentPart::ToolResult { tool_use_id, content, .. }) = parts.first() {
                    return serde_json::json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content,
                    });
                }
            }

            let text: String = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
                Role::Tool => "tool",
            };
            serde_json::json!({"role": role, "content": text})
        }
    }
}

fn parse_response(
    provider: &str,
    model: &str,
    native: bool,
    body: &Value,
    tools: &[ToolDefinition],
) -> Result<(Vec<AssistantBlock>, GenerateMetadata), ProviderError> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .ok_or_else(|| {
            ProviderError::new(provider, model, "response had no choices", ProviderErrorKind::MalformedResponse)
        })?;
    let message = choice.get("message").ok_or_else(|| {
        ProviderError::new(provider, model, "choice had no message", ProviderErrorKind::MalformedResponse)
    })?;

    let mut blocks = Vec::new();

    if let Some(text) = message.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            if native {
                blocks.push(AssistantBlock::Text { text: text.to_string() });
            } else {
                let names: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();
                match json_emulation::extract_tool_call(text, &names) {
                    Some(extracted) => {
                        let remaining = json_emulation::strip_call(text, &extracted);
                        if extracted.ignored {
                            if !remaining.is_empty() {
                                blocks.push(AssistantBlock::Text { text: remaining });
                            }
                        } else {
                            if !remaining.is_empty() {
                                blocks.push(AssistantBlock::Text { text: remaining });
                            }
                            blocks.push(AssistantBlock::ToolCall(extracted.call));
                        }
                    }
                    None => blocks.push(AssistantBlock::Text { text: text.to_string() }),
                }
            }
        }
    }

    if native {
        if let Some(tool_calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
            for tc in tool_calls {
                let id = tc.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let func = tc.get("function").cloned().unwrap_or_default();
                let name = func.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let raw_args = func.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}");
                let input = serde_json::from_str::<Value>(raw_args)
                    .unwrap_or_else(|_| serde_json::json!({"arguments": raw_args}));
                blocks.push(AssistantBlock::ToolCall(ToolCallRef { id, name, input }));
            }
        }
    }

    if blocks.is_empty() {
        return Err(ProviderError::new(
            provider,
            model,
            "response had no text or tool_calls",
            ProviderErrorKind::MalformedResponse,
        ));
    }

    let input_tokens = body
        .get("usage")
        .and_then(|u| u.get("prompt_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;
    let output_tokens = body
        .get("usage")
        .and_then(|u| u.get("completion_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;

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
impl ChatAdapter for OpenAiCompatAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn supports_native_tools(&self) -> bool {
        true
    }

    async fn generate(
        &self,
        model: &str,
        req: &GenerateRequest<'_>,
    ) -> Result<(Vec<AssistantBlock>, GenerateMetadata), ProviderError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = self.build_body(model, req);
        let native = matches!(req.tool_call_mode, ToolCallMode::Native);

        tracing::debug!(provider = %self.id, model, "sending generate request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| from_reqwest(&self.id, model, e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| from_reqwest(&self.id, model, e))?;

        if !status.is_success() {
            let kind = ProviderError::classify(Some(status.as_u16()), &text);
            return Err(ProviderError::new(&self.id, model, text, kind));
        }

        let parsed: Value = serde_json::from_str(&text).map_err(|e| {
            ProviderError::new(&self.id, model, e.to_string(), ProviderErrorKind::MalformedResponse)
        })?;

        parse_response(&self.id, model, native, &parsed, req.tools)
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
    fn parse_response_extracts_native_tool_calls() {
        let body = serde_json::json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{"id": "c1", "function": {"name": "search", "arguments": "{\"q\": \"rust\"}"}}],
            }}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3},
        });
        let (blocks, meta) = parse_response("chutes", "m", true, &body, &[]).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(meta.input_tokens, 12);
        assert!(matches!(&blocks[0], AssistantBlock::ToolCall(tc) if tc.name == "search"));
    }

    #[test]
    fn parse_response_wraps_malformed_arguments() {
        let body = serde_json::json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{"id": "c1", "function": {"name": "search", "arguments": "not json"}}],
            }}],
        });
        let (blocks, _) = parse_response("chutes", "m", true, &body, &[]).unwrap();
        match &blocks[0] {
            AssistantBlock::ToolCall(tc) => assert_eq!(tc.input["arguments"], "not json"),
            _ => panic!("expected tool call"),
        }
    }

    #[test]
    fn parse_response_extracts_emulated_call_from_text() {
        let body = serde_json::json!({
            "choices": [{"message": {
                "content": "```json\n{\"tool_call\": {\"id\": \"c1\", \"name\": \"calc\", \"arguments\": {}}}\n```",
            }}],
        });
        let (blocks, _) = parse_response("chutes", "m", false, &body, &calc_tool()).unwrap();
        assert!(blocks.iter().any(|b| matches!(b, AssistantBlock::ToolCall(tc) if tc.name == "calc")));
    }

    #[test]
    fn parse_response_ignores_emulated_call_to_unregistered_tool() {
        let body = serde_json::json!({
            "choices": [{"message": {
                "content": "Sure.\n```json\n{\"tool_call\": {\"id\": \"c1\", \"name\": \"rm_rf\", \"arguments\": {}}}\n```",
            }}],
        });
        let (blocks, _) = parse_response("chutes", "m", false, &body, &calc_tool()).unwrap();
        assert!(!blocks.iter().any(|b| matches!(b, AssistantBlock::ToolCall(_))));
    }

    #[test]
    fn parse_response_errors_without_content_or_calls() {
        let body = serde_json::json!({"choices": [{"message": {"content": ""}}]});
        let err = parse_response("chutes", "m", true, &body, &[]).unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::MalformedResponse);
    }
}

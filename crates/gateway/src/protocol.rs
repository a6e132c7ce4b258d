//! Wire protocol for the `/ws` endpoint.
//!
//! Frames are `{"type": <event type>, "content": <object>}` in both
//! directions. Inbound content stays loosely typed at the boundary and
//! is normalized here into [`InboundEvent`]; outbound frames are built
//! from an [`agentcore_domain::event::EventType`] plus whatever payload
//! the emitting component already constructed.

use agentcore_domain::event::{ErrorCode, ErrorPayload, EventType};
use serde::Deserialize;
use serde_json::Value;

/// Frame shape before the `type` tag has been interpreted.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Value,
}

#[derive(Debug, Clone, Default)]
pub struct QueryContent {
    pub text: String,
    /// Workspace-relative file paths explicitly attached to the prompt,
    /// in addition to whatever the text itself references.
    pub images: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum InboundEvent {
    InitAgent,
    Query(QueryContent),
    CancelProcessing,
    WorkspaceInfoRequest,
    Ping,
    TerminalCommand { command: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

impl ProtocolError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ProtocolError::InvalidJson(_) => ErrorCode::InvalidJson,
            ProtocolError::UnknownMessageType(_) => ErrorCode::UnknownMessageType,
            ProtocolError::MissingField(_) => ErrorCode::MessageProcessingError,
        }
    }
}

fn text_field(content: &Value, field: &'static str) -> Result<String, ProtocolError> {
    content
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or(ProtocolError::MissingField(field))
}

fn string_array_field(content: &Value, field: &str) -> Vec<String> {
    content
        .get(field)
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Parse one raw inbound text frame into a normalized [`InboundEvent`].
pub fn parse_inbound(raw: &str) -> Result<InboundEvent, ProtocolError> {
    let frame: RawFrame =
        serde_json::from_str(raw).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

    match frame.kind.as_str() {
        "init_agent" => Ok(InboundEvent::InitAgent),
        "query" | "user_message" => Ok(InboundEvent::Query(QueryContent {
            text: text_field(&frame.content, "text")?,
            images: string_array_field(&frame.content, "images"),
        })),
        "cancel_processing" => Ok(InboundEvent::CancelProcessing),
        "workspace_info_request" => Ok(InboundEvent::WorkspaceInfoRequest),
        "ping" => Ok(InboundEvent::Ping),
        "terminal_command" => Ok(InboundEvent::TerminalCommand {
            command: text_field(&frame.content, "command")?,
        }),
        other => Err(ProtocolError::UnknownMessageType(other.to_string())),
    }
}

/// Build the outbound wire frame for one event.
pub fn to_wire_frame(event_type: EventType, content: Value) -> Value {
    serde_json::json!({
        "type": event_type.as_str(),
        "content": content,
    })
}

pub fn error_frame(message: impl Into<String>, error_code: ErrorCode) -> (EventType, Value) {
    let payload = ErrorPayload { message: message.into(), error_code };
    (EventType::Error, serde_json::to_value(payload).unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_frame() {
        let frame = InboundEvent::Query(QueryContent::default());
        assert!(matches!(frame, InboundEvent::Query(_)));

        let raw = r#"{"type":"query","content":{"text":"what is 42*17?"}}"#;
        match parse_inbound(raw).unwrap() {
            InboundEvent::Query(q) => assert_eq!(q.text, "what is 42*17?"),
            _ => panic!("expected Query"),
        }
    }

    #[test]
    fn user_message_aliases_to_query() {
        let raw = r#"{"type":"user_message","content":{"text":"hi"}}"#;
        assert!(matches!(parse_inbound(raw).unwrap(), InboundEvent::Query(_)));
    }

    #[test]
    fn unknown_type_is_reported() {
        let raw = r#"{"type":"not_a_real_type","content":{}}"#;
        let err = parse_inbound(raw).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessageType(_)));
        assert_eq!(err.error_code(), ErrorCode::UnknownMessageType);
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = parse_inbound("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
    }

    #[test]
    fn missing_text_on_query_is_reported() {
        let raw = r#"{"type":"query","content":{}}"#;
        let err = parse_inbound(raw).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("text")));
    }

    #[test]
    fn ping_and_cancel_need_no_content() {
        assert!(matches!(parse_inbound(r#"{"type":"ping"}"#).unwrap(), InboundEvent::Ping));
        assert!(matches!(
            parse_inbound(r#"{"type":"cancel_processing"}"#).unwrap(),
            InboundEvent::CancelProcessing
        ));
    }
}

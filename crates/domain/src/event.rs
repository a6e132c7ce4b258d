use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of event types that cross the wire and/or get persisted.
///
/// `UserMessage` is the one type never forwarded to the socket by the
/// event router (it originates there, it doesn't need echoing back).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ConnectionEstablished,
    AgentInitialized,
    WorkspaceInfo,
    Processing,
    AgentThinking,
    ToolCall,
    ToolResult,
    AgentResponse,
    StreamComplete,
    Error,
    System,
    Pong,
    UploadSuccess,
    BrowserUse,
    FileEdit,
    Heartbeat,
    TerminalOutput,
    /// Persisted but never echoed back to the originating socket.
    UserMessage,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::ConnectionEstablished => "connection_established",
            EventType::AgentInitialized => "agent_initialized",
            EventType::WorkspaceInfo => "workspace_info",
            EventType::Processing => "processing",
            EventType::AgentThinking => "agent_thinking",
            EventType::ToolCall => "tool_call",
            EventType::ToolResult => "tool_result",
            EventType::AgentResponse => "agent_response",
            EventType::StreamComplete => "stream_complete",
            EventType::Error => "error",
            EventType::System => "system",
            EventType::Pong => "pong",
            EventType::UploadSuccess => "upload_success",
            EventType::BrowserUse => "browser_use",
            EventType::FileEdit => "file_edit",
            EventType::Heartbeat => "heartbeat",
            EventType::TerminalOutput => "terminal_output",
            EventType::UserMessage => "user_message",
        }
    }
}

/// A single append-only record in a session's event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub payload: serde_json::Value,
}

/// Standard error payload shape for `EventType::Error` frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    pub error_code: ErrorCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AgentNotInitialized,
    AgentInitError,
    AgentRuntimeError,
    WorkspaceCreationError,
    QueryInProgress,
    NoActiveQuery,
    InvalidJson,
    UnknownMessageType,
    MessageProcessingError,
    MissingCommand,
    BashToolUnavailable,
}

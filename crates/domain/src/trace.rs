use serde::Serialize;

/// Structured trace events emitted across all crates in this workspace.
///
/// Each variant is serialized to JSON and logged under a single
/// `tracing` field so a log pipeline can index on `event` without
/// parsing free-text messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ConnectionAccepted {
        connection_id: String,
        active_count: usize,
    },
    ConnectionClosed {
        connection_id: String,
        reason: &'static str,
    },
    SessionResolved {
        session_id: String,
        workspace_dir: String,
        is_new: bool,
    },
    AgentInitialized {
        connection_id: String,
        session_id: String,
    },
    TurnStarted {
        session_id: String,
        turn_index: usize,
        round: usize,
    },
    ToolInvoked {
        session_id: String,
        tool_name: String,
        duration_ms: u64,
        success: bool,
    },
    ToolCallBlocked {
        session_id: String,
        tool_name: String,
        reason: &'static str,
    },
    LlmRequest {
        provider: String,
        model: String,
        attempt: u32,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    LlmFallback {
        from_model: String,
        to_model: String,
        reason: String,
    },
    LlmToolModeSwitched {
        model: String,
        reason: &'static str,
    },
    TruncationApplied {
        session_id: String,
        dropped_turns: usize,
        spilled: bool,
    },
    ProCreditTracked {
        pro_key: String,
        model: String,
        allowed: bool,
        use_fallback: bool,
        credits_used: i64,
    },
    EventPersistFailed {
        session_id: String,
        event_type: &'static str,
        error: String,
    },
    RunEnded {
        session_id: String,
        turns_executed: u32,
        rounds_executed: u32,
        reason: &'static str,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "agent_core_event");
    }
}

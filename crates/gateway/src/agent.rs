//! The per-connection turn-loop orchestrator: drives one query from the
//! user's prompt through however many (LLM call, tool dispatch) rounds
//! it takes to reach a final answer, a budget limit, or a cancellation.
//!
//! One `AgentRuntime` is built per connection on `init_agent` and lives
//! for the connection's lifetime; `run_query` is called once per
//! inbound `query`/`user_message` frame and is never invoked concurrently
//! with itself (the connection manager enforces that exclusivity).

use std::path::PathBuf;
use std::sync::Arc;

use agentcore_domain::config::{AgentConfig, Config, ProLedgerConfig, split_model_ref};
use agentcore_domain::error::Result;
use agentcore_domain::event::EventType;
use agentcore_domain::message::{AssistantBlock, History, ToolCallRef, UserBlock};
use agentcore_domain::tool::ToolRegistry;
use agentcore_domain::trace::TraceEvent;
use agentcore_providers::chain::ProviderChain;
use agentcore_providers::loop_detector;
use agentcore_providers::traits::ToolChoice;
use agentcore_store::ProCreditLedger;
use agentcore_workspace::WorkspaceAllocator;
use base64::Engine;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::context::ContextManager;
use crate::protocol::QueryContent;
use crate::router::EventSender;

const SYSTEM_PROMPT: &str = "You are a helpful assistant with access to tools. \
Use them when they would help answer the user's request, and give a clear, \
complete final answer once you have everything you need.";

const CLARIFY_OR_FINISH: &str =
    "Please either state your final answer now or call one of the available tools to continue.";

const CANCELLED_MARKER: &str = "Processing was canceled before this tool call ran.";

/// Phrases that, combined, suggest the model believes it has finished
/// (English-only heuristic — see the design notes on this limitation).
const COMPLETION_PHRASES: &[&str] =
    &["task completed", "here is", "in conclusion", "to summarize", "based on", "final answer"];
const CONTINUATION_PHRASES: &[&str] =
    &["let me", "i'll", "i will", "next i", "searching", "looking into", "continuing to"];
const SHORT_RESPONSE_THRESHOLD: usize = 20;
const LONG_RESPONSE_THRESHOLD: usize = 100;

/// Literal text synthesized when a model round produces no blocks at all.
const EMPTY_RESPONSE_MARKER: &str =
    "Task completed with no further output from the model.";

fn is_terminal_response(text: &str) -> bool {
    let lower = text.to_lowercase();
    let has_completion = COMPLETION_PHRASES.iter().any(|p| lower.contains(p));
    let has_continuation = CONTINUATION_PHRASES.iter().any(|p| lower.contains(p));

    if has_completion && !has_continuation && text.len() > SHORT_RESPONSE_THRESHOLD {
        return true;
    }
    if text.len() > LONG_RESPONSE_THRESHOLD
        && !has_continuation
        && matches!(text.trim_end().chars().last(), Some('.') | Some('!') | Some('?'))
    {
        return true;
    }
    false
}

/// Why a run ended, surfaced in the final `agent_response` / `system` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    Terminal,
    MaxTurns,
    MaxRounds,
    Cancelled,
    ProviderFailed,
}

impl EndReason {
    fn as_str(self) -> &'static str {
        match self {
            EndReason::Terminal => "terminal",
            EndReason::MaxTurns => "max_turns",
            EndReason::MaxRounds => "max_rounds",
            EndReason::Cancelled => "cancelled",
            EndReason::ProviderFailed => "provider_failed",
        }
    }
}

pub struct AgentRuntime {
    session_id: Uuid,
    workspace_dir: PathBuf,
    history: History,
    tools: Arc<ToolRegistry>,
    provider: Arc<ProviderChain>,
    context: Arc<ContextManager>,
    workspace: Arc<WorkspaceAllocator>,
    effective_model_chain: Vec<String>,
    pro_fallback_model: String,
    pro_key: Option<String>,
    ledger: Option<Arc<ProCreditLedger>>,
    pro_ledger_config: Arc<ProLedgerConfig>,
    agent_config: AgentConfig,
    loop_window: usize,
    /// Mirrors the connection's `use_native_tool_calling=false` query
    /// parameter: forces every adapter in the chain onto the
    /// JSON-emulated tool-calling path regardless of its native support.
    force_json_emulated: bool,
    cancel: CancelToken,
    turns_executed: u32,
    rounds_executed: u32,
    events: EventSender,
}

impl AgentRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: Uuid,
        workspace_dir: PathBuf,
        tools: Arc<ToolRegistry>,
        provider: Arc<ProviderChain>,
        context: Arc<ContextManager>,
        workspace: Arc<WorkspaceAllocator>,
        config: &Config,
        pro_key: Option<String>,
        ledger: Option<Arc<ProCreditLedger>>,
        force_json_emulated: bool,
        cancel: CancelToken,
        events: EventSender,
    ) -> Self {
        Self {
            session_id,
            workspace_dir,
            history: History::new(),
            tools,
            provider,
            context,
            workspace,
            effective_model_chain: config.llm.model_chain.clone(),
            pro_fallback_model: config.llm.pro_fallback_model.clone(),
            pro_key,
            ledger,
            pro_ledger_config: Arc::new(config.pro_ledger.clone()),
            agent_config: config.agent.clone(),
            loop_window: config.llm.loop_detector_window,
            force_json_emulated,
            cancel,
            turns_executed: 0,
            rounds_executed: 0,
            events,
        }
    }

    fn emit(&self, event_type: EventType, payload: serde_json::Value) {
        let _ = self.events.send((event_type, payload));
    }

    /// Resolve workspace-relative image paths into `UserBlock::Image`
    /// blocks; non-image paths are instead listed by name in the prompt
    /// text, since the agent has no generic binary-attachment block.
    async fn resolve_attachments(&self, paths: &[String]) -> (Vec<UserBlock>, Vec<String>) {
        let mut blocks = Vec::new();
        let mut listed = Vec::new();
        for raw in paths {
            let resolved = match self.workspace.resolve(&self.workspace_dir, raw) {
                Ok(p) => p,
                Err(_) => continue,
            };
            if WorkspaceAllocator::is_image_path(&resolved) {
                if let Ok(bytes) = tokio::fs::read(&resolved).await {
                    let media_type = WorkspaceAllocator::media_type_for(&resolved)
                        .unwrap_or("application/octet-stream");
                    blocks.push(UserBlock::Image {
                        data_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
                        media_type: media_type.to_string(),
                    });
                }
            } else {
                listed.push(raw.clone());
            }
        }
        (blocks, listed)
    }

    /// Run one full query from a user's prompt to a terminal outcome.
    /// Emits `processing`, then `agent_response` (or `system`/`error`) at
    /// the end. Never called concurrently with itself for one connection.
    pub async fn run_query(&mut self, query: QueryContent) -> Result<()> {
        let (image_blocks, listed_files) = self.resolve_attachments(&query.images).await;
        let mut text = query.text;
        if !listed_files.is_empty() {
            text.push_str(&format!("\n\nAttached files: {}", listed_files.join(", ")));
        }

        self.emit(
            EventType::UserMessage,
            serde_json::json!({ "content": { "text": text, "images": query.images } }),
        );
        self.history.add_user_prompt(text, image_blocks)?;
        self.emit(EventType::Processing, serde_json::json!({}));

        let reason = self.turn_loop().await?;

        TraceEvent::RunEnded {
            session_id: self.session_id.to_string(),
            turns_executed: self.turns_executed,
            rounds_executed: self.rounds_executed,
            reason: reason.as_str(),
        }
        .emit();
        Ok(())
    }

    async fn turn_loop(&mut self) -> Result<EndReason> {
        loop {
            if self.cancel.is_cancelled() {
                self.emit(
                    EventType::System,
                    serde_json::json!({ "message": "Processing was canceled by the user." }),
                );
                return Ok(EndReason::Cancelled);
            }

            if self.turns_executed >= self.agent_config.max_turns {
                self.emit(
                    EventType::AgentResponse,
                    serde_json::json!({
                        "text": self.history.last_assistant_text().unwrap_or_default(),
                        "ended_reason": EndReason::MaxTurns.as_str(),
                    }),
                );
                return Ok(EndReason::MaxTurns);
            }
            if self.rounds_executed >= self.agent_config.max_rounds {
                self.emit(
                    EventType::AgentResponse,
                    serde_json::json!({
                        "text": self.history.last_assistant_text().unwrap_or_default(),
                        "ended_reason": EndReason::MaxRounds.as_str(),
                    }),
                );
                return Ok(EndReason::MaxRounds);
            }

            let truncated = self
                .context
                .apply_truncation_if_needed(self.session_id, &self.workspace_dir, self.history.messages())
                .await?;
            self.history.replace(truncated);

            self.apply_pro_ledger().await?;

            self.emit(
                EventType::AgentThinking,
                serde_json::json!({ "round": self.rounds_executed }),
            );

            let outcome = match self
                .provider
                .generate(
                    &self.effective_model_chain,
                    &self.history.messages(),
                    self.agent_config.max_tokens,
                    Some(SYSTEM_PROMPT),
                    self.agent_config.temperature,
                    &self.tools.definitions(),
                    ToolChoice::Auto,
                    self.force_json_emulated,
                )
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    let (event_type, payload) = crate::protocol::error_frame(
                        err.to_string(),
                        agentcore_domain::event::ErrorCode::AgentRuntimeError,
                    );
                    self.emit(event_type, payload);
                    return Ok(EndReason::ProviderFailed);
                }
            };
            self.rounds_executed += 1;

            let blocks = if outcome.blocks.is_empty() {
                vec![AssistantBlock::Text { text: EMPTY_RESPONSE_MARKER.to_string() }]
            } else {
                outcome.blocks
            };
            self.history.add_assistant_turn(blocks)?;
            self.turns_executed += 1;

            TraceEvent::TurnStarted {
                session_id: self.session_id.to_string(),
                turn_index: self.turns_executed as usize,
                round: self.rounds_executed as usize,
            }
            .emit();

            let pending = self.history.pending_tool_calls();
            if pending.is_empty() {
                let text = self.history.last_assistant_text().unwrap_or_default();
                if is_terminal_response(&text) {
                    self.emit(
                        EventType::AgentResponse,
                        serde_json::json!({ "text": text, "ended_reason": EndReason::Terminal.as_str() }),
                    );
                    self.emit(EventType::StreamComplete, serde_json::json!({}));
                    return Ok(EndReason::Terminal);
                }
                self.history.add_user_prompt(CLARIFY_OR_FINISH, vec![])?;
                continue;
            }

            match self.dispatch_tool_calls(&pending).await? {
                Some(reason) => return Ok(reason),
                None => continue,
            }
        }
    }

    async fn apply_pro_ledger(&mut self) -> Result<()> {
        let (Some(pro_key), Some(ledger)) = (self.pro_key.clone(), self.ledger.clone()) else {
            return Ok(());
        };
        let Some(primary) = self.effective_model_chain.first().cloned() else {
            return Ok(());
        };
        let Some((_, model_name)) = split_model_ref(&primary) else {
            return Ok(());
        };
        if self.pro_ledger_config.cost_for_model(model_name) == 0 {
            return Ok(());
        }

        let outcome = ledger.track(&pro_key, model_name).await?;
        if outcome.use_fallback {
            TraceEvent::LlmFallback {
                from_model: primary.clone(),
                to_model: self.pro_fallback_model.clone(),
                reason: "pro credit limit reached for this month".to_string(),
            }
            .emit();
            self.effective_model_chain = vec![self.pro_fallback_model.clone()];
        }
        Ok(())
    }

    /// Process the pending tool calls in order: filter loop-detector
    /// blocks, invoke the rest, and finalize immediately if a terminal
    /// tool answers. Returns `Some(reason)` if the run ended, `None` to
    /// continue the turn loop with the results appended as a user turn.
    async fn dispatch_tool_calls(&mut self, pending: &[ToolCallRef]) -> Result<Option<EndReason>> {
        let recent = self.history.recent_assistant_turns(self.loop_window);
        let (kept, blocked) = loop_detector::filter_blocked(&recent, pending);

        let mut outputs: Vec<Option<String>> = vec![None; pending.len()];
        for call in &blocked {
            let idx = pending.iter().position(|c| c.id == call.id).unwrap();
            TraceEvent::ToolCallBlocked {
                session_id: self.session_id.to_string(),
                tool_name: call.name.clone(),
                reason: "loop detector",
            }
            .emit();
            outputs[idx] = Some(format!(
                "Tool call to '{}' was blocked: it would repeat a recent call too many times.",
                call.name
            ));
        }

        for call in kept {
            if self.cancel.is_cancelled() {
                for slot in outputs.iter_mut() {
                    if slot.is_none() {
                        *slot = Some(CANCELLED_MARKER.to_string());
                    }
                }
                self.finalize_results(pending, outputs)?;
                self.history.add_assistant_turn(vec![AssistantBlock::Text {
                    text: CANCELLED_MARKER.to_string(),
                }])?;
                self.turns_executed += 1;
                self.emit(
                    EventType::AgentResponse,
                    serde_json::json!({ "text": CANCELLED_MARKER, "ended_reason": EndReason::Cancelled.as_str() }),
                );
                return Ok(Some(EndReason::Cancelled));
            }

            let idx = pending.iter().position(|c| c.id == call.id).unwrap();
            self.emit(
                EventType::ToolCall,
                serde_json::json!({ "id": call.id, "name": call.name, "input": call.input }),
            );

            let started = std::time::Instant::now();
            let (output_text, success, final_answer) = match self.tools.get(&call.name) {
                Some(tool) => {
                    let result = tool.invoke(call.input.clone()).await;
                    let success = result.message.is_none();
                    let final_answer = if tool.is_terminal() { result.final_answer.clone() } else { None };
                    (result.output, success, final_answer)
                }
                None => (format!("Unknown tool: {}", call.name), false, None),
            };

            TraceEvent::ToolInvoked {
                session_id: self.session_id.to_string(),
                tool_name: call.name.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
                success,
            }
            .emit();
            self.emit(
                EventType::ToolResult,
                serde_json::json!({ "id": call.id, "name": call.name, "output": output_text }),
            );
            outputs[idx] = Some(output_text);

            if let Some(final_answer) = final_answer {
                self.finalize_results(pending, outputs)?;
                self.history
                    .add_assistant_turn(vec![AssistantBlock::Text { text: final_answer.clone() }])?;
                self.turns_executed += 1;
                self.emit(
                    EventType::AgentResponse,
                    serde_json::json!({ "text": final_answer, "ended_reason": EndReason::Terminal.as_str() }),
                );
                self.emit(EventType::StreamComplete, serde_json::json!({}));
                return Ok(Some(EndReason::Terminal));
            }
        }

        self.finalize_results(pending, outputs)?;
        Ok(None)
    }

    fn finalize_results(&mut self, calls: &[ToolCallRef], outputs: Vec<Option<String>>) -> Result<()> {
        let outputs: Vec<String> = outputs
            .into_iter()
            .map(|o| o.unwrap_or_else(|| "(tool call not reached)".to_string()))
            .collect();
        self.history.add_tool_call_results(calls, outputs)
    }

    /// Move a connection-requested model to the front of the chain, per
    /// the `model_id`/`use_chutes`/`use_openrouter`/`use_moonshot`
    /// query parameters. A no-op if the model is already the primary.
    pub fn set_model_override(&mut self, model_ref: String) {
        if self.effective_model_chain.first() == Some(&model_ref) {
            return;
        }
        self.effective_model_chain.retain(|m| m != &model_ref);
        self.effective_model_chain.insert(0, model_ref);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_response_needs_completion_phrase_and_no_continuation() {
        assert!(is_terminal_response(
            "Here is the final answer to your question about Rust ownership."
        ));
        assert!(!is_terminal_response("Let me search for that and get back to you."));
        assert!(!is_terminal_response("ok"));
    }

    #[test]
    fn long_declarative_response_without_hedging_is_terminal() {
        let text = "The quick brown fox jumps over the lazy dog in a very long sentence that goes on and on.";
        assert!(is_terminal_response(text));
    }
}

//! Connection Manager (C9): WebSocket lifecycle, session binding,
//! heartbeats, idle reaping, cancellation.
//!
//! One [`ConnectionEntry`] per accepted socket, tracked in the shared
//! [`ConnectionRegistry`]. The connection's own task owns the actual
//! `WebSocket`; every other task (heartbeat, periodic cleanup, an
//! in-flight query) only ever touches the entry's `Arc`-shared fields,
//! never the socket directly — outbound frames flow exclusively through
//! the per-agent event queue and the Event Router (C10).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentcore_domain::config::ConnectionConfig;
use agentcore_domain::event::{ErrorCode, EventType};
use agentcore_domain::tool::ToolRegistry;
use agentcore_domain::trace::TraceEvent;
use agentcore_store::validate_pro_key;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::agent::AgentRuntime;
use crate::cancel::CancelToken;
use crate::context::ContextManager;
use crate::protocol::{self, InboundEvent};
use crate::router::{self, EventSender, SocketSlot};
use crate::state::AppState;

fn default_true() -> bool {
    true
}

/// `/ws` query parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectParams {
    pub device_id: Option<String>,
    #[serde(default)]
    pub use_chutes: bool,
    #[serde(default)]
    pub use_openrouter: bool,
    #[serde(default)]
    pub use_moonshot: bool,
    #[serde(default = "default_true")]
    pub use_native_tool_calling: bool,
    pub model_id: Option<String>,
    pub pro_user_key: Option<String>,
}

impl ConnectParams {
    /// Provider id implied by the `use_*` flags, highest priority first.
    /// Falls back to `anthropic` (Anthropic-direct) when none are set.
    fn provider_id(&self) -> &'static str {
        if self.use_chutes {
            "chutes"
        } else if self.use_openrouter {
            "openrouter"
        } else if self.use_moonshot {
            "moonshot"
        } else {
            "anthropic"
        }
    }

    fn pro_key(&self, prime: u64) -> Option<String> {
        self.pro_user_key
            .as_ref()
            .filter(|k| validate_pro_key(k, prime))
            .cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Accepted,
    AgentBound,
    QueryRunning,
    Disconnected,
}

struct ConnectionEntry {
    id: Uuid,
    session_id: Uuid,
    created_at: std::time::Instant,
    state: Mutex<ConnectionState>,
    agent_bound: AtomicBool,
    agent: tokio::sync::Mutex<Option<AgentRuntime>>,
    /// Mirrors the active agent's tool registry so `terminal_command`
    /// can run the `bash` tool without waiting on the agent lock
    /// a concurrent query run might be holding for its whole duration.
    tools: Mutex<Option<Arc<ToolRegistry>>>,
    query_task: Mutex<Option<JoinHandle<()>>>,
    /// Resolved once at connection accept time from the `pro_user_key`
    /// query parameter — not re-derived on every `init_agent`.
    pro_key: Option<String>,
    cancel: CancelToken,
    events: EventSender,
    socket: SocketSlot,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    sender_pump: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
}

/// Tracks every live connection and enforces the process-wide cap.
pub struct ConnectionRegistry {
    config: ConnectionConfig,
    connections: Mutex<HashMap<Uuid, Arc<ConnectionEntry>>>,
}

impl ConnectionRegistry {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn active_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn max_connections(&self) -> usize {
        self.config.max_connections
    }

    fn register(&self, entry: Arc<ConnectionEntry>) {
        self.connections.lock().insert(entry.id, entry);
    }

    fn remove(&self, id: Uuid) {
        self.connections.lock().remove(&id);
    }

    /// Periodic sweep, every `cleanup_interval_secs`: notifies any
    /// connection's own task to break out of its receive loop and clean
    /// up if it is disconnected, too old, idle with nothing bound, or —
    /// on the hot path, once the registry is crowded — merely older than
    /// the shorter pre-emptive threshold.
    pub fn run_periodic_cleanup(&self) {
        let now = std::time::Instant::now();
        let max_age = Duration::from_secs(self.config.max_age_secs);
        let preemptive_age = Duration::from_secs(self.config.preemptive_age_secs);
        // Grace window before an unbound connection (never called
        // init_agent, never ran a query) is considered abandoned.
        let idle_grace = Duration::from_secs(self.config.cleanup_interval_secs * 2);

        let entries: Vec<Arc<ConnectionEntry>> = self.connections.lock().values().cloned().collect();
        let over_threshold = entries.len() > self.config.preemptive_threshold;

        for entry in &entries {
            let age = now.duration_since(entry.created_at);
            let disconnected = *entry.state.lock() == ConnectionState::Disconnected;
            let idle_unbound = !entry.agent_bound.load(Ordering::SeqCst)
                && entry.query_task.lock().is_none()
                && age > idle_grace;

            let should_close = disconnected
                || age > max_age
                || idle_unbound
                || (over_threshold && age > preemptive_age);

            if should_close {
                entry.shutdown.notify_one();
            }
        }
    }
}

/// Axum handler for `GET /ws`. Rejects at the HTTP layer (no upgrade
/// performed) once the registry is at its hard connection cap.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    if state.connections.active_count() >= state.connections.max_connections() {
        tracing::warn!(
            active = state.connections.active_count(),
            max = state.connections.max_connections(),
            "rejecting connection: server overloaded"
        );
        return (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "server overloaded, try again later",
        )
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

async fn handle_socket(socket: WebSocket, state: AppState, params: ConnectParams) {
    let connection_id = Uuid::new_v4();
    let workspace_dir = match state.workspace.allocate(connection_id).await {
        Ok(dir) => dir,
        Err(e) => {
            tracing::error!(connection_id = %connection_id, error = %e, "workspace allocation failed");
            return;
        }
    };

    let session_id = match state
        .event_store
        .create_session(
            connection_id,
            &workspace_dir.to_string_lossy(),
            params.device_id.as_deref(),
        )
        .await
    {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(connection_id = %connection_id, error = %e, "session creation failed");
            return;
        }
    };

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (raw_tx, mut raw_rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
    let socket_slot: SocketSlot = Arc::new(Mutex::new(Some(raw_tx)));
    let sender_pump = tokio::spawn(async move {
        while let Some(msg) = raw_rx.recv().await {
            if ws_sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let (events, rx) = router::event_channel();
    router::spawn_event_router(session_id, state.event_store.clone(), rx, socket_slot.clone());

    let pro_key = params.pro_key(state.config.pro_ledger.prime);

    let entry = Arc::new(ConnectionEntry {
        id: connection_id,
        session_id,
        created_at: std::time::Instant::now(),
        state: Mutex::new(ConnectionState::Accepted),
        agent_bound: AtomicBool::new(false),
        agent: tokio::sync::Mutex::new(None),
        tools: Mutex::new(None),
        query_task: Mutex::new(None),
        pro_key,
        cancel: CancelToken::new(),
        events: events.clone(),
        socket: socket_slot,
        heartbeat: Mutex::new(None),
        sender_pump: Mutex::new(Some(sender_pump)),
        shutdown: Arc::new(Notify::new()),
    });
    state.connections.register(entry.clone());

    TraceEvent::ConnectionAccepted {
        connection_id: connection_id.to_string(),
        active_count: state.connections.active_count(),
    }
    .emit();

    let _ = events.send((
        EventType::ConnectionEstablished,
        json!({
            "workspace_path": workspace_dir.to_string_lossy(),
            "connection_id": connection_id,
            "session_uuid": session_id,
            "active_connections": state.connections.active_count(),
        }),
    ));

    *entry.heartbeat.lock() = Some(spawn_heartbeat(
        events.clone(),
        Duration::from_secs(state.config.connection.heartbeat_interval_secs),
    ));

    run_receive_loop(&entry, &state, &params, &workspace_dir, &mut ws_stream).await;

    cleanup(&entry, &state).await;
}

fn spawn_heartbeat(events: EventSender, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            if events.send((EventType::Heartbeat, json!({}))).is_err() {
                // Event router is gone — nothing left to heartbeat.
                return;
            }
        }
    })
}

async fn run_receive_loop(
    entry: &Arc<ConnectionEntry>,
    state: &AppState,
    params: &ConnectParams,
    workspace_dir: &std::path::Path,
    stream: &mut SplitStream<WebSocket>,
) {
    let read_timeout = Duration::from_secs(state.config.connection.read_timeout_secs);
    let mut deadline = tokio::time::Instant::now() + read_timeout;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                tracing::debug!(connection_id = %entry.id, "read timeout, closing connection");
                break;
            }
            _ = entry.shutdown.notified() => {
                tracing::debug!(connection_id = %entry.id, "periodic cleanup requested shutdown");
                break;
            }
            next = stream.next() => {
                match next {
                    None => break,
                    Some(Err(_)) => break,
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Text(text))) => {
                        deadline = tokio::time::Instant::now() + read_timeout;
                        dispatch(entry, state, params, workspace_dir, &text).await;
                    }
                    Some(Ok(_)) => {
                        deadline = tokio::time::Instant::now() + read_timeout;
                    }
                }
            }
        }
    }
}

async fn dispatch(
    entry: &Arc<ConnectionEntry>,
    state: &AppState,
    params: &ConnectParams,
    workspace_dir: &std::path::Path,
    text: &str,
) {
    let inbound = match protocol::parse_inbound(text) {
        Ok(event) => event,
        Err(err) => {
            let (ty, payload) = protocol::error_frame(err.to_string(), err.error_code());
            let _ = entry.events.send((ty, payload));
            return;
        }
    };

    match inbound {
        InboundEvent::InitAgent => {
            init_agent(entry, state, params, workspace_dir).await;
        }
        InboundEvent::Query(query) => {
            if entry.query_task.lock().is_some() {
                emit_error(entry, "A query is already in progress", ErrorCode::QueryInProgress);
                return;
            }
            if entry.agent.lock().await.is_none() {
                init_agent(entry, state, params, workspace_dir).await;
            }
            spawn_query(entry.clone(), query);
        }
        InboundEvent::CancelProcessing => {
            if entry.query_task.lock().is_some() {
                entry.cancel.cancel();
            } else {
                emit_error(entry, "No active query to cancel", ErrorCode::NoActiveQuery);
            }
        }
        InboundEvent::WorkspaceInfoRequest => {
            let files = list_workspace_files(workspace_dir).await;
            let _ = entry.events.send((
                EventType::WorkspaceInfo,
                json!({
                    "workspace_path": workspace_dir.to_string_lossy(),
                    "session_uuid": entry.session_id,
                    "files": files,
                }),
            ));
        }
        InboundEvent::Ping => {
            let _ = entry.events.send((EventType::Pong, json!({})));
        }
        InboundEvent::TerminalCommand { command } => {
            run_terminal_command(entry, &command).await;
        }
    }
}

async fn init_agent(
    entry: &Arc<ConnectionEntry>,
    state: &AppState,
    params: &ConnectParams,
    workspace_dir: &std::path::Path,
) {
    // Re-init discards any previous agent outright; a query that
    // was still running against it is aborted first.
    if let Some(handle) = entry.query_task.lock().take() {
        handle.abort();
    }

    let tools: Arc<ToolRegistry> = match ToolRegistry::build(vec![
        Arc::new(agentcore_tools::CalculateTool),
        Arc::new(agentcore_tools::BashTool::new(workspace_dir.to_path_buf())),
    ]) {
        Ok(reg) => Arc::new(reg),
        Err(e) => {
            emit_error(entry, &e.to_string(), ErrorCode::AgentInitError);
            return;
        }
    };

    let context = Arc::new(ContextManager::new(&state.config.context, state.workspace.clone()));
    let pro_key = entry.pro_key.clone();
    let ledger = pro_key.as_ref().map(|_| state.ledger.clone());
    let force_json_emulated = !params.use_native_tool_calling;

    let mut agent = AgentRuntime::new(
        entry.session_id,
        workspace_dir.to_path_buf(),
        tools.clone(),
        state.provider.clone(),
        context,
        state.workspace.clone(),
        &state.config,
        pro_key,
        ledger,
        force_json_emulated,
        entry.cancel.clone(),
        entry.events.clone(),
    );

    if let Some(model_id) = &params.model_id {
        agent.set_model_override(format!("{}/{model_id}", params.provider_id()));
    }

    *entry.agent.lock().await = Some(agent);
    *entry.tools.lock() = Some(tools);
    entry.agent_bound.store(true, Ordering::SeqCst);
    *entry.state.lock() = ConnectionState::AgentBound;

    TraceEvent::AgentInitialized {
        connection_id: entry.id.to_string(),
        session_id: entry.session_id.to_string(),
    }
    .emit();

    let _ = entry.events.send((
        EventType::AgentInitialized,
        json!({ "connection_id": entry.id, "session_uuid": entry.session_id }),
    ));
}

/// Launch one query run as a detached task so the receive loop stays
/// responsive to `cancel_processing`/`ping` while it executes.
fn spawn_query(entry: Arc<ConnectionEntry>, query: protocol::QueryContent) {
    entry.cancel.reset();
    *entry.state.lock() = ConnectionState::QueryRunning;

    let events = entry.events.clone();
    let entry_for_task = entry.clone();
    let handle = tokio::spawn(async move {
        let mut guard = entry_for_task.agent.lock().await;
        if let Some(agent) = guard.as_mut() {
            if let Err(e) = agent.run_query(query).await {
                let (ty, payload) =
                    protocol::error_frame(e.to_string(), ErrorCode::AgentRuntimeError);
                let _ = events.send((ty, payload));
            }
        }
        drop(guard);
        *entry_for_task.query_task.lock() = None;
        *entry_for_task.state.lock() = ConnectionState::AgentBound;
    });
    *entry.query_task.lock() = Some(handle);
}

async fn run_terminal_command(entry: &Arc<ConnectionEntry>, command: &str) {
    let tool = {
        let guard = entry.tools.lock();
        match guard.as_ref() {
            Some(tools) => tools.get("bash").cloned(),
            None => {
                emit_error(entry, "Agent not initialized", ErrorCode::AgentNotInitialized);
                return;
            }
        }
    };

    let Some(tool) = tool else {
        emit_error(entry, "bash tool is not registered", ErrorCode::BashToolUnavailable);
        return;
    };

    let result = tool.invoke(json!({ "command": command })).await;
    let success = result.message.is_none();
    let _ = entry.events.send((
        EventType::TerminalOutput,
        json!({ "output": result.output, "success": success }),
    ));
}

/// One-level-deep directory listing for `workspace_info` replies.
/// Best-effort: an unreadable workspace directory yields an empty list
/// rather than surfacing an error for what is, at worst, a UI nicety.
async fn list_workspace_files(workspace_dir: &std::path::Path) -> Vec<String> {
    let mut names = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(workspace_dir).await else {
        return names;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    names
}

fn emit_error(entry: &Arc<ConnectionEntry>, message: &str, code: ErrorCode) {
    let (ty, payload) = protocol::error_frame(message, code);
    let _ = entry.events.send((ty, payload));
}

/// Cleanup of a connection: remove from the active set, cancel
/// any running query and the heartbeat, clear the socket slot so the
/// Event Router stops trying to forward, and let every task wind down.
async fn cleanup(entry: &Arc<ConnectionEntry>, state: &AppState) {
    *entry.state.lock() = ConnectionState::Disconnected;

    if let Some(handle) = entry.query_task.lock().take() {
        handle.abort();
    }
    if let Some(handle) = entry.heartbeat.lock().take() {
        handle.abort();
    }
    *entry.socket.lock() = None;
    if let Some(handle) = entry.sender_pump.lock().take() {
        handle.abort();
    }

    state.connections.remove(entry.id);

    TraceEvent::ConnectionClosed {
        connection_id: entry.id.to_string(),
        reason: "receive loop ended",
    }
    .emit();
}

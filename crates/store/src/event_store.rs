use crate::schema::store_err;
use agentcore_domain::error::Result;
use agentcore_domain::event::{Event, EventType};
use agentcore_domain::session::{Session, SessionSummary};
use agentcore_domain::trace::TraceEvent;
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Append-only persistence of sessions and typed events (C1).
///
/// Every operation here is one transaction; on failure the transaction
/// rolls back and the error propagates — the store never silently drops
/// an event.
pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a session, or return the existing one if `workspace_path`
    /// is already claimed (idempotent on workspace path, logged as a
    /// notice — not an error).
    pub async fn create_session(
        &self,
        id: Uuid,
        workspace_path: &str,
        device_id: Option<&str>,
    ) -> Result<Uuid> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT id FROM session WHERE workspace_dir = ?")
                .bind(workspace_path)
                .fetch_optional(&mut *tx)
                .await
                .map_err(store_err)?;

        if let Some((existing_id,)) = existing {
            tx.commit().await.map_err(store_err)?;
            let existing_id = Uuid::parse_str(&existing_id)
                .map_err(|e| agentcore_domain::Error::Store(e.to_string()))?;
            tracing::info!(session_id = %existing_id, workspace_path, "session already exists, reusing");
            return Ok(existing_id);
        }

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO session (id, workspace_dir, created_at, device_id, summary) VALUES (?, ?, ?, ?, NULL)",
        )
        .bind(id.to_string())
        .bind(workspace_path)
        .bind(now)
        .bind(device_id)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;

        TraceEvent::SessionResolved {
            session_id: id.to_string(),
            workspace_dir: workspace_path.to_string(),
            is_new: true,
        }
        .emit();

        Ok(id)
    }

    pub async fn save_event(
        &self,
        session_id: Uuid,
        event_type: EventType,
        payload: Value,
    ) -> Result<Uuid> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let event_id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO event (id, session_id, timestamp, event_type, event_payload) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(event_id.to_string())
        .bind(session_id.to_string())
        .bind(now)
        .bind(event_type.as_str())
        .bind(&payload)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(event_id)
    }

    /// All events for a session in ascending timestamp order. Replaying
    /// this to a reconnecting client MUST preserve that order.
    pub async fn list_events(&self, session_id: Uuid) -> Result<Vec<Event>> {
        let rows: Vec<(String, String, chrono::DateTime<Utc>, String, Value)> = sqlx::query_as(
            "SELECT id, session_id, timestamp, event_type, event_payload FROM event WHERE session_id = ? ORDER BY timestamp ASC",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter()
            .map(|(id, sid, ts, ty, payload)| {
                Ok(Event {
                    id: Uuid::parse_str(&id).map_err(|e| agentcore_domain::Error::Store(e.to_string()))?,
                    session_id: Uuid::parse_str(&sid)
                        .map_err(|e| agentcore_domain::Error::Store(e.to_string()))?,
                    timestamp: ts,
                    event_type: parse_event_type(&ty),
                    payload,
                })
            })
            .collect()
    }

    /// Most recent sessions for a device, each augmented with the text of
    /// its first `user_message` event.
    ///
    /// Uses one bulk query with a windowed minimum over timestamp rather
    /// than a per-session round trip; the per-session fallback below is
    /// only acceptable (and must be logged) if this query fails.
    pub async fn list_sessions_by_device(
        &self,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<SessionSummary>> {
        let bulk = self.list_sessions_by_device_bulk(device_id, limit).await;
        match bulk {
            Ok(rows) => Ok(rows),
            Err(e) => {
                tracing::error!(error = %e, device_id, "bulk first-message query failed, falling back to per-session lookup");
                self.list_sessions_by_device_fallback(device_id, limit).await
            }
        }
    }

    async fn list_sessions_by_device_bulk(
        &self,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<SessionSummary>> {
        let rows: Vec<(
            String,
            String,
            chrono::DateTime<Utc>,
            Option<String>,
            Option<String>,
            Option<Value>,
        )> = sqlx::query_as(
            r#"
            SELECT s.id, s.workspace_dir, s.created_at, s.device_id, s.summary, fm.event_payload
            FROM session s
            LEFT JOIN (
                SELECT e.session_id, e.event_payload,
                       ROW_NUMBER() OVER (PARTITION BY e.session_id ORDER BY e.timestamp ASC) AS rn
                FROM event e
                WHERE e.event_type = 'user_message'
            ) fm ON fm.session_id = s.id AND fm.rn = 1
            WHERE s.device_id = ?
            ORDER BY s.created_at DESC
            LIMIT ?
            "#,
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter()
            .map(|(id, dir, created_at, dev, summary, payload)| {
                let first_message = payload
                    .and_then(|p| p.get("content").and_then(|c| c.get("text")).cloned())
                    .and_then(|v| v.as_str().map(|s| s.to_string()));
                Ok(SessionSummary {
                    session: Session {
                        id: Uuid::parse_str(&id)
                            .map_err(|e| agentcore_domain::Error::Store(e.to_string()))?,
                        workspace_dir: dir,
                        created_at,
                        device_id: dev,
                        summary,
                    },
                    first_message,
                })
            })
            .collect()
    }

    async fn list_sessions_by_device_fallback(
        &self,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<SessionSummary>> {
        let sessions: Vec<(String, String, chrono::DateTime<Utc>, Option<String>, Option<String>)> =
            sqlx::query_as(
                "SELECT id, workspace_dir, created_at, device_id, summary FROM session WHERE device_id = ? ORDER BY created_at DESC LIMIT ?",
            )
            .bind(device_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        let mut out = Vec::with_capacity(sessions.len());
        for (id, dir, created_at, dev, summary) in sessions {
            let session_id =
                Uuid::parse_str(&id).map_err(|e| agentcore_domain::Error::Store(e.to_string()))?;
            let first: Option<(Value,)> = sqlx::query_as(
                "SELECT event_payload FROM event WHERE session_id = ? AND event_type = 'user_message' ORDER BY timestamp ASC LIMIT 1",
            )
            .bind(session_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

            let first_message = first
                .and_then(|(p,)| p.get("content").and_then(|c| c.get("text")).cloned())
                .and_then(|v| v.as_str().map(|s| s.to_string()));

            out.push(SessionSummary {
                session: Session {
                    id: session_id,
                    workspace_dir: dir,
                    created_at,
                    device_id: dev,
                    summary,
                },
                first_message,
            });
        }
        Ok(out)
    }
}

fn parse_event_type(s: &str) -> EventType {
    match s {
        "connection_established" => EventType::ConnectionEstablished,
        "agent_initialized" => EventType::AgentInitialized,
        "workspace_info" => EventType::WorkspaceInfo,
        "processing" => EventType::Processing,
        "agent_thinking" => EventType::AgentThinking,
        "tool_call" => EventType::ToolCall,
        "tool_result" => EventType::ToolResult,
        "agent_response" => EventType::AgentResponse,
        "stream_complete" => EventType::StreamComplete,
        "error" => EventType::Error,
        "system" => EventType::System,
        "pong" => EventType::Pong,
        "upload_success" => EventType::UploadSuccess,
        "browser_use" => EventType::BrowserUse,
        "file_edit" => EventType::FileEdit,
        "heartbeat" => EventType::Heartbeat,
        "terminal_output" => EventType::TerminalOutput,
        _ => EventType::UserMessage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> EventStore {
        let pool = crate::connect(":memory:").await.unwrap();
        EventStore::new(pool)
    }

    #[tokio::test]
    async fn create_session_is_idempotent_on_workspace_path() {
        let store = test_store().await;
        let id1 = store
            .create_session(Uuid::new_v4(), "/workspaces/a", None)
            .await
            .unwrap();
        let id2 = store
            .create_session(Uuid::new_v4(), "/workspaces/a", None)
            .await
            .unwrap();
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn events_replay_in_timestamp_order() {
        let store = test_store().await;
        let session_id = store
            .create_session(Uuid::new_v4(), "/workspaces/b", Some("dev1"))
            .await
            .unwrap();

        for i in 0..5 {
            store
                .save_event(
                    session_id,
                    EventType::AgentThinking,
                    serde_json::json!({ "i": i }),
                )
                .await
                .unwrap();
        }

        let events = store.list_events(session_id).await.unwrap();
        assert_eq!(events.len(), 5);
        for w in events.windows(2) {
            assert!(w[0].timestamp <= w[1].timestamp);
        }
    }

    #[tokio::test]
    async fn first_message_extraction_via_bulk_query() {
        let store = test_store().await;
        let session_id = store
            .create_session(Uuid::new_v4(), "/workspaces/c", Some("dev2"))
            .await
            .unwrap();

        store
            .save_event(
                session_id,
                EventType::UserMessage,
                serde_json::json!({ "content": { "text": "first question" } }),
            )
            .await
            .unwrap();
        store
            .save_event(
                session_id,
                EventType::UserMessage,
                serde_json::json!({ "content": { "text": "second question" } }),
            )
            .await
            .unwrap();

        let sessions = store.list_sessions_by_device("dev2", 50).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].first_message.as_deref(), Some("first question"));
    }
}

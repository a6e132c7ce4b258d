//! Event Router (C10): the single consumer of an agent's event queue.
//!
//! Persists every event to the Event Store, then forwards it to the
//! bound socket unless it is a `user_message` (never echoed back) or no
//! socket is currently bound. A send failure clears the socket
//! reference rather than dropping the event — the event has already
//! been persisted by that point.

use std::sync::Arc;

use agentcore_domain::event::EventType;
use agentcore_domain::trace::TraceEvent;
use agentcore_store::EventStore;
use axum::extract::ws::Message;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::to_wire_frame;

pub type EventSender = mpsc::UnboundedSender<(EventType, Value)>;
pub type EventReceiver = mpsc::UnboundedReceiver<(EventType, Value)>;

/// The outbound half of a connection's socket, shared between the Event
/// Router and the Connection Manager. `None` once the socket is gone —
/// the router still persists events, it just stops trying to send.
pub type SocketSlot = Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Spawn the per-connection event router task. Runs until `tx`'s last
/// clone is dropped.
pub fn spawn_event_router(
    session_id: Uuid,
    store: Arc<EventStore>,
    mut rx: EventReceiver,
    socket: SocketSlot,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((event_type, payload)) = rx.recv().await {
            if let Err(e) = store.save_event(session_id, event_type, payload.clone()).await {
                tracing::error!(session_id = %session_id, error = %e, "failed to persist event");
                TraceEvent::EventPersistFailed {
                    session_id: session_id.to_string(),
                    event_type: event_type.as_str(),
                    error: e.to_string(),
                }
                .emit();
            }

            if event_type == EventType::UserMessage {
                continue;
            }

            let send_failed = {
                let guard = socket.lock();
                match guard.as_ref() {
                    Some(tx) => {
                        let frame = to_wire_frame(event_type, payload);
                        tx.send(Message::Text(frame.to_string())).is_err()
                    }
                    None => false,
                }
            };
            if send_failed {
                *socket.lock() = None;
            }
        }
    })
}

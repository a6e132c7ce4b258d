use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A session: a device's standing claim on one workspace directory and
/// event stream. Created on first workspace request, mutated only to set
/// `summary`, and destroyed only by administrative cleanup (out of scope
/// for this core).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub workspace_dir: String,
    pub created_at: DateTime<Utc>,
    pub device_id: Option<String>,
    pub summary: Option<String>,
}

/// A session row as returned by `list_sessions_by_device`, augmented with
/// the text of its first user message (or `None` if it has none yet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: Session,
    pub first_message: Option<String>,
}

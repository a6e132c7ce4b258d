use serde::{Deserialize, Serialize};

fn d_root() -> String {
    std::env::var("AGENT_WORKSPACE_ROOT").unwrap_or_else(|_| "./workspaces".to_string())
}

/// Workspace allocator (C2) configuration.
///
/// `root` prefers a persistent path if one exists at startup (`AGENT_WORKSPACE_ROOT`),
/// falling back to a local relative directory otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "d_root")]
    pub root: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self { root: d_root() }
    }
}

mod agent;
mod connection;
mod context;
mod llm;
mod pro_ledger;
mod server;
mod workspace;

pub use agent::*;
pub use connection::*;
pub use context::*;
pub use llm::*;
pub use pro_ledger::*;
pub use server::*;
pub use workspace::*;

use serde::{Deserialize, Serialize};

/// Top-level configuration, assembled from environment variables and an
/// optional TOML file at startup and then handed down by reference to
/// the connection manager and every agent it constructs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pro_ledger: ProLedgerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

use serde::{Deserialize, Serialize};

fn d_host() -> String {
    "0.0.0.0".to_string()
}
fn d_port() -> u16 {
    8000
}
fn d_admin_key() -> Option<String> {
    std::env::var("ADMIN_KEY").ok()
}
fn d_db_path() -> String {
    "agent_core.db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Shared secret gating admin endpoints. Per-user auth is out of scope.
    #[serde(default = "d_admin_key")]
    pub admin_key: Option<String>,
    /// SQLite file backing the event store and the Pro credit ledger.
    #[serde(default = "d_db_path")]
    pub db_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            admin_key: d_admin_key(),
            db_path: d_db_path(),
        }
    }
}

use serde::{Deserialize, Serialize};

fn d_max_connections() -> usize {
    500
}
fn d_preemptive_threshold() -> usize {
    200
}
fn d_heartbeat_secs() -> u64 {
    30
}
fn d_read_timeout_secs() -> u64 {
    300
}
fn d_cleanup_interval_secs() -> u64 {
    60
}
fn d_max_age_secs() -> u64 {
    3600
}
fn d_preemptive_age_secs() -> u64 {
    1800
}

/// Connection manager (C9) tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "d_max_connections")]
    pub max_connections: usize,
    /// Above this active count, pre-emptively close connections older than
    /// `preemptive_age_secs` on the hot path (see periodic cleanup).
    #[serde(default = "d_preemptive_threshold")]
    pub preemptive_threshold: usize,
    #[serde(default = "d_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "d_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "d_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "d_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "d_preemptive_age_secs")]
    pub preemptive_age_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_connections: d_max_connections(),
            preemptive_threshold: d_preemptive_threshold(),
            heartbeat_interval_secs: d_heartbeat_secs(),
            read_timeout_secs: d_read_timeout_secs(),
            cleanup_interval_secs: d_cleanup_interval_secs(),
            max_age_secs: d_max_age_secs(),
            preemptive_age_secs: d_preemptive_age_secs(),
        }
    }
}

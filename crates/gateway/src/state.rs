//! Process-wide shared state, assembled once at startup and handed down
//! by reference into every connection the manager accepts: global
//! singletons become injected dependencies, not module-level statics.

use std::sync::Arc;

use agentcore_domain::config::Config;
use agentcore_providers::ProviderChain;
use agentcore_store::{EventStore, ProCreditLedger};
use agentcore_workspace::WorkspaceAllocator;

use crate::connection::ConnectionRegistry;

/// Shared services every connection task borrows from. Cloning is cheap —
/// every field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub event_store: Arc<EventStore>,
    pub ledger: Arc<ProCreditLedger>,
    pub workspace: Arc<WorkspaceAllocator>,
    pub provider: Arc<ProviderChain>,
    pub connections: Arc<ConnectionRegistry>,
}

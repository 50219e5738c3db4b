//! Shared daemon state handed to the IPC server and background tasks.

use std::sync::Arc;

use crate::config::GlobalConfig;
use crate::orchestrator::auto_recovery::AutoRecoveryController;
use crate::orchestrator::process_controller::ProcessSessionController;
use crate::registry::SessionRegistry;
use crate::router::MessageRouter;

/// Everything a command handler needs, built once at startup.
pub struct AppState {
    /// Validated configuration.
    pub config: Arc<GlobalConfig>,
    /// Channel ↔ session mapping.
    pub registry: Arc<SessionRegistry>,
    /// Backend session lifecycle.
    pub controller: Arc<ProcessSessionController>,
    /// Health supervision.
    pub monitor: Arc<AutoRecoveryController>,
    /// Chat message routing.
    pub router: MessageRouter,
}

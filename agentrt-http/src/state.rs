//! Shared application state injected into every route via `axum::State`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentrt_engine::Engine;
use agentrt_shared::heartbeat::HeartbeatRegistry;
use agentrt_store::MetaStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Inbound chat turn handed to the configured gateway after the inbound log
/// entry has been appended.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub workspace_id: String,
    pub context_id: String,
    pub connector: String,
    pub external_id: String,
    pub display_name: Option<String>,
    pub from_user_id: Option<String>,
    pub text: String,
}

/// Routes an inbound chat message to whatever answers chat turns (an agent
/// loop, a canned responder, …) and returns the reply text. Left unwired
/// (`AppState::gateway = None`) is a legitimate deployment — `/api/v1/chat`
/// then reports 503.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    async fn handle(&self, turn: ChatTurn) -> Result<String, String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoConfig {
    pub name: String,
    pub environment: String,
    pub public_host: Option<String>,
    pub admin_host: Option<String>,
    pub mcp_summary: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetaStore>,
    pub engine: Arc<Engine>,
    pub workspace_root: std::path::PathBuf,
    pub heartbeat: Option<Arc<HeartbeatRegistry>>,
    pub heartbeat_stale_after: Duration,
    pub info: InfoConfig,
    pub gateway: Option<Arc<dyn MessageGateway>>,
    pub max_task_list_limit: i64,
    /// Workspace a brand-new (connector, external_id) pairing is bound into
    /// when no context already exists for it (open question: the chat
    /// request carries no explicit `workspace_id`).
    pub default_workspace_id: String,
    /// Flipped to `true` once startup recovery has finished; `/readyz`
    /// reports 503 while `false` so a load balancer doesn't route traffic
    /// into the stale-task rescue window.
    ready: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn MetaStore>,
        engine: Arc<Engine>,
        workspace_root: impl Into<std::path::PathBuf>,
        info: InfoConfig,
    ) -> Self {
        Self {
            store,
            engine,
            workspace_root: workspace_root.into(),
            heartbeat: None,
            heartbeat_stale_after: Duration::from_secs(30),
            info,
            gateway: None,
            max_task_list_limit: 200,
            default_workspace_id: "default".to_string(),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_heartbeat(mut self, registry: Arc<HeartbeatRegistry>, stale_after: Duration) -> Self {
        self.heartbeat = Some(registry);
        self.heartbeat_stale_after = stale_after;
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn MessageGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_default_workspace_id(mut self, workspace_id: impl Into<String>) -> Self {
        self.default_workspace_id = workspace_id.into();
        self
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

//! Context: a binding of an external channel (connector + external id) to a
//! workspace, optionally flagged administrative.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub context_id: String,
    pub workspace_id: String,
    pub connector: String,
    pub external_id: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Context {
    /// The deduplication key the notifier uses to collapse targets reachable
    /// through more than one context row: `lower(connector)::external_id`.
    pub fn target_key(&self) -> String {
        format!("{}::{}", self.connector.to_lowercase(), self.external_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_key_lowercases_connector_only() {
        let ctx = Context {
            context_id: "c1".into(),
            workspace_id: "ws".into(),
            connector: "Telegram".into(),
            external_id: "UserABC".into(),
            is_admin: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(ctx.target_key(), "telegram::UserABC");
    }
}

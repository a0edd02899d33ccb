//! Optional IMAP ingestion dedupe marker: at most one marker per
//! `(account_key, uid)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapMarker {
    pub account_key: String,
    pub uid: i64,
    pub message_id: String,
    pub workspace_id: String,
    pub context_id: String,
    pub file_path: String,
    pub created_at: DateTime<Utc>,
}

//! Objective: a recurring (`schedule`) or event-triggered (`event`) task
//! template maintained by the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Schedule,
    Event,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Schedule => "schedule",
            TriggerType::Event => "event",
        }
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schedule" => Ok(TriggerType::Schedule),
            "event" => Ok(TriggerType::Event),
            other => Err(format!("unknown trigger type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Objective {
    pub id: String,
    pub workspace_id: String,
    pub context_id: String,
    pub title: String,
    pub prompt: String,
    pub trigger_type: TriggerType,
    pub cron_expr: Option<String>,
    pub timezone: Option<String>,
    pub event_key: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub run_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub consecutive_failures: i32,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub auto_paused_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Objective {
    /// Run-key used for idempotent enqueue of a scheduled firing of this
    /// objective: `objective:<id>:<unix(scheduled_for)>`.
    pub fn run_key_for(&self, scheduled_for: DateTime<Utc>) -> String {
        format!("objective:{}:{}", self.id, scheduled_for.timestamp())
    }

    /// Recovers the objective id encoded in a run key produced by
    /// `run_key_for`, so a completed/failed objective task can be traced
    /// back to the objective whose run counters it should update.
    pub fn id_from_run_key(run_key: &str) -> Option<String> {
        let mut parts = run_key.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("objective"), Some(id), Some(_)) if !id.is_empty() => Some(id.to_string()),
            _ => None,
        }
    }
}

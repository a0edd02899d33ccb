//! Flat row shapes mirroring the SQLite column layout, and conversions to and
//! from the domain types in `agentrt-shared`. Kept separate from `sqlite.rs`
//! so the query bodies read as plain SQL without field-mapping noise.

use agentrt_shared::{
    Context, ImapMarker, Objective, StoreError, StoreResult, Task, TaskKind, TaskStatus,
    TriggerType,
};
use agentrt_shared::task::{RoutingMetadata, SourceTrace};
use chrono::{DateTime, Utc};

fn parse_ts(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Database(format!("bad timestamp {s:?}: {e}")))
}

fn parse_opt_ts(s: Option<&str>) -> StoreResult<Option<DateTime<Utc>>> {
    s.map(parse_ts).transpose()
}

fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn fmt_opt_ts(t: Option<DateTime<Utc>>) -> Option<String> {
    t.map(fmt_ts)
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TaskRow {
    pub id: String,
    pub workspace_id: String,
    pub context_id: String,
    pub kind: String,
    pub title: String,
    pub prompt: String,
    pub status: String,
    pub attempts: i64,
    pub worker_id: i64,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub result_summary: Option<String>,
    pub result_path: Option<String>,
    pub error_message: Option<String>,
    pub route_class: Option<String>,
    pub priority: Option<i64>,
    pub assigned_lane: Option<String>,
    pub due_at: Option<String>,
    pub source_connector: Option<String>,
    pub source_external_id: Option<String>,
    pub source_user_id: Option<String>,
    pub source_text: Option<String>,
    pub run_key: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskRow {
    pub(crate) fn into_task(self) -> StoreResult<Task> {
        Ok(Task {
            id: self.id,
            workspace_id: self.workspace_id,
            context_id: self.context_id,
            kind: self
                .kind
                .parse::<TaskKind>()
                .map_err(StoreError::Database)?,
            title: self.title,
            prompt: self.prompt,
            status: self
                .status
                .parse::<TaskStatus>()
                .map_err(StoreError::Database)?,
            attempts: self.attempts as i32,
            worker_id: self.worker_id,
            started_at: parse_opt_ts(self.started_at.as_deref())?,
            finished_at: parse_opt_ts(self.finished_at.as_deref())?,
            result_summary: self.result_summary,
            result_path: self.result_path,
            error_message: self.error_message,
            routing: RoutingMetadata {
                route_class: self.route_class,
                priority: self.priority.map(|p| p as i32),
                assigned_lane: self.assigned_lane,
                due_at: parse_opt_ts(self.due_at.as_deref())?,
            },
            source: SourceTrace {
                source_connector: self.source_connector,
                source_external_id: self.source_external_id,
                source_user_id: self.source_user_id,
                source_text: self.source_text,
            },
            run_key: self.run_key,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

pub(crate) struct TaskBind {
    pub id: String,
    pub workspace_id: String,
    pub context_id: String,
    pub kind: String,
    pub title: String,
    pub prompt: String,
    pub status: String,
    pub attempts: i64,
    pub worker_id: i64,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub result_summary: Option<String>,
    pub result_path: Option<String>,
    pub error_message: Option<String>,
    pub route_class: Option<String>,
    pub priority: Option<i64>,
    pub assigned_lane: Option<String>,
    pub due_at: Option<String>,
    pub source_connector: Option<String>,
    pub source_external_id: Option<String>,
    pub source_user_id: Option<String>,
    pub source_text: Option<String>,
    pub run_key: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Task> for TaskBind {
    fn from(t: &Task) -> Self {
        Self {
            id: t.id.clone(),
            workspace_id: t.workspace_id.clone(),
            context_id: t.context_id.clone(),
            kind: t.kind.as_str().to_string(),
            title: t.title.clone(),
            prompt: t.prompt.clone(),
            status: t.status.as_str().to_string(),
            attempts: t.attempts as i64,
            worker_id: t.worker_id,
            started_at: fmt_opt_ts(t.started_at),
            finished_at: fmt_opt_ts(t.finished_at),
            result_summary: t.result_summary.clone(),
            result_path: t.result_path.clone(),
            error_message: t.error_message.clone(),
            route_class: t.routing.route_class.clone(),
            priority: t.routing.priority.map(|p| p as i64),
            assigned_lane: t.routing.assigned_lane.clone(),
            due_at: fmt_opt_ts(t.routing.due_at),
            source_connector: t.source.source_connector.clone(),
            source_external_id: t.source.source_external_id.clone(),
            source_user_id: t.source.source_user_id.clone(),
            source_text: t.source.source_text.clone(),
            run_key: t.run_key.clone(),
            created_at: fmt_ts(t.created_at),
            updated_at: fmt_ts(t.updated_at),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ContextRow {
    pub context_id: String,
    pub workspace_id: String,
    pub connector: String,
    pub external_id: String,
    pub is_admin: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl ContextRow {
    pub(crate) fn into_context(self) -> StoreResult<Context> {
        Ok(Context {
            context_id: self.context_id,
            workspace_id: self.workspace_id,
            connector: self.connector,
            external_id: self.external_id,
            is_admin: self.is_admin != 0,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ObjectiveRow {
    pub id: String,
    pub workspace_id: String,
    pub context_id: String,
    pub title: String,
    pub prompt: String,
    pub trigger_type: String,
    pub cron_expr: Option<String>,
    pub timezone: Option<String>,
    pub event_key: Option<String>,
    pub next_run_at: Option<String>,
    pub run_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub consecutive_failures: i64,
    pub last_error: Option<String>,
    pub last_success_at: Option<String>,
    pub last_failure_at: Option<String>,
    pub active: i64,
    pub auto_paused_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ObjectiveRow {
    pub(crate) fn into_objective(self) -> StoreResult<Objective> {
        Ok(Objective {
            id: self.id,
            workspace_id: self.workspace_id,
            context_id: self.context_id,
            title: self.title,
            prompt: self.prompt,
            trigger_type: self
                .trigger_type
                .parse::<TriggerType>()
                .map_err(StoreError::Database)?,
            cron_expr: self.cron_expr,
            timezone: self.timezone,
            event_key: self.event_key,
            next_run_at: parse_opt_ts(self.next_run_at.as_deref())?,
            run_count: self.run_count,
            success_count: self.success_count,
            failure_count: self.failure_count,
            consecutive_failures: self.consecutive_failures as i32,
            last_error: self.last_error,
            last_success_at: parse_opt_ts(self.last_success_at.as_deref())?,
            last_failure_at: parse_opt_ts(self.last_failure_at.as_deref())?,
            active: self.active != 0,
            auto_paused_reason: self.auto_paused_reason,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

pub(crate) struct ObjectiveBind {
    pub id: String,
    pub workspace_id: String,
    pub context_id: String,
    pub title: String,
    pub prompt: String,
    pub trigger_type: String,
    pub cron_expr: Option<String>,
    pub timezone: Option<String>,
    pub event_key: Option<String>,
    pub next_run_at: Option<String>,
    pub run_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub consecutive_failures: i64,
    pub last_error: Option<String>,
    pub last_success_at: Option<String>,
    pub last_failure_at: Option<String>,
    pub active: i64,
    pub auto_paused_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Objective> for ObjectiveBind {
    fn from(o: &Objective) -> Self {
        Self {
            id: o.id.clone(),
            workspace_id: o.workspace_id.clone(),
            context_id: o.context_id.clone(),
            title: o.title.clone(),
            prompt: o.prompt.clone(),
            trigger_type: o.trigger_type.as_str().to_string(),
            cron_expr: o.cron_expr.clone(),
            timezone: o.timezone.clone(),
            event_key: o.event_key.clone(),
            next_run_at: fmt_opt_ts(o.next_run_at),
            run_count: o.run_count,
            success_count: o.success_count,
            failure_count: o.failure_count,
            consecutive_failures: o.consecutive_failures as i64,
            last_error: o.last_error.clone(),
            last_success_at: fmt_opt_ts(o.last_success_at),
            last_failure_at: fmt_opt_ts(o.last_failure_at),
            active: o.active as i64,
            auto_paused_reason: o.auto_paused_reason.clone(),
            created_at: fmt_ts(o.created_at),
            updated_at: fmt_ts(o.updated_at),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ImapMarkerRow {
    pub account_key: String,
    pub uid: i64,
    pub message_id: String,
    pub workspace_id: String,
    pub context_id: String,
    pub file_path: String,
    pub created_at: String,
}

impl ImapMarkerRow {
    pub(crate) fn into_marker(self) -> StoreResult<ImapMarker> {
        Ok(ImapMarker {
            account_key: self.account_key,
            uid: self.uid,
            message_id: self.message_id,
            workspace_id: self.workspace_id,
            context_id: self.context_id,
            file_path: self.file_path,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub(crate) fn fmt_now(t: DateTime<Utc>) -> String {
    fmt_ts(t)
}

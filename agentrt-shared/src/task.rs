//! Task domain type.
//!
//! A `Task` is the durable unit of work in the runtime: every background
//! task submitted by a connector, the HTTP surface, the objective scheduler,
//! or the filesystem watcher is represented as one row in MetaStore and one
//! value of this type in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of work a task represents. Drives dispatch in the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    General,
    ReindexMarkdown,
    Objective,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::General => "general",
            TaskKind::ReindexMarkdown => "reindex_markdown",
            TaskKind::Objective => "objective",
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(TaskKind::General),
            "reindex_markdown" => Ok(TaskKind::ReindexMarkdown),
            "objective" => Ok(TaskKind::Objective),
            other => Err(format!("unknown task kind: {other}")),
        }
    }
}

/// Lifecycle state. Transitions are `queued -> running -> {succeeded, failed}`,
/// with `failed -> queued` only via explicit requeue (retry or recovery).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "succeeded" => Ok(TaskStatus::Succeeded),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Optional chat-origin trace carried by connector-originated tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceTrace {
    pub source_connector: Option<String>,
    pub source_external_id: Option<String>,
    pub source_user_id: Option<String>,
    pub source_text: Option<String>,
}

/// Optional routing metadata set on chat-originated ("routed") tasks; alters
/// notification policy and summary formatting (see `agentrt-notifier`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingMetadata {
    pub route_class: Option<String>,
    pub priority: Option<i32>,
    pub assigned_lane: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub workspace_id: String,
    pub context_id: String,
    pub kind: TaskKind,
    pub title: String,
    pub prompt: String,
    pub status: TaskStatus,
    pub attempts: i32,
    /// Zero when not running; non-zero iff `status == Running`.
    pub worker_id: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result_summary: Option<String>,
    pub result_path: Option<String>,
    pub error_message: Option<String>,
    pub routing: RoutingMetadata,
    pub source: SourceTrace,
    /// Uniqueness token across non-terminal tasks of the same kind; used by
    /// the scheduler to make duplicate ticks idempotent.
    pub run_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a new queued task with a fresh id and timestamps, the shape
    /// `Engine::enqueue` assigns to a caller-constructed task that omitted
    /// them.
    pub fn new(
        workspace_id: impl Into<String>,
        context_id: impl Into<String>,
        kind: TaskKind,
        title: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            context_id: context_id.into(),
            kind,
            title: title.into(),
            prompt: prompt.into(),
            status: TaskStatus::Queued,
            attempts: 0,
            worker_id: 0,
            started_at: None,
            finished_at: None,
            result_summary: None,
            result_path: None,
            error_message: None,
            routing: RoutingMetadata::default(),
            source: SourceTrace::default(),
            run_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this task originated from routed chat (non-empty `route_class`).
    pub fn is_routed(&self) -> bool {
        self.routing
            .route_class
            .as_deref()
            .is_some_and(|c| !c.is_empty())
    }

    /// `context_id` starting with `system:` denotes a synthetic, non-chat
    /// context (e.g. `system:filewatcher`, `system:task-worker`).
    pub fn is_system_context(&self) -> bool {
        self.context_id.starts_with("system:")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_queued_with_zero_worker() {
        let t = Task::new("ws", "ctx", TaskKind::General, "title", "prompt");
        assert_eq!(t.status, TaskStatus::Queued);
        assert_eq!(t.worker_id, 0);
        assert_eq!(t.attempts, 0);
        assert!(!t.id.is_empty());
    }

    #[test]
    fn is_routed_requires_non_empty_class() {
        let mut t = Task::new("ws", "ctx", TaskKind::General, "t", "p");
        assert!(!t.is_routed());
        t.routing.route_class = Some("".to_string());
        assert!(!t.is_routed());
        t.routing.route_class = Some("issue".to_string());
        assert!(t.is_routed());
    }

    #[test]
    fn system_context_prefix_detected() {
        let mut t = Task::new("ws", "system:filewatcher", TaskKind::ReindexMarkdown, "t", "p");
        assert!(t.is_system_context());
        t.context_id = "chan-123".to_string();
        assert!(!t.is_system_context());
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [TaskKind::General, TaskKind::ReindexMarkdown, TaskKind::Objective] {
            let parsed: TaskKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("bogus".parse::<TaskKind>().is_err());
    }

    #[test]
    fn status_is_terminal() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }
}

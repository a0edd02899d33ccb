//! Durable MetaStore: the relational record of tasks, contexts, objectives,
//! and IMAP dedupe markers that backs the runtime's durability guarantees.
//! Transactions are hidden behind typed methods — callers never see a raw
//! connection or transaction handle.

mod row;
mod sqlite;

pub use sqlite::SqliteMetaStore;

use agentrt_shared::{Context, ImapMarker, Objective, StoreResult, Task};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Outcome recorded by `update_objective_run`, driving success/failure
/// counters and consecutive-failure-based auto-pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure,
}

/// Parameters for an objective run update (distilled spec §4.4 step 5).
#[derive(Debug, Clone)]
pub struct ObjectiveRunUpdate {
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub outcome: Option<RunOutcome>,
}

/// Filters for listing tasks scoped to a workspace (HTTP `GET /api/v1/tasks`).
#[derive(Debug, Clone, Default)]
pub struct TaskListFilter {
    pub workspace_id: Option<String>,
    pub context_id: Option<String>,
    pub kind: Option<agentrt_shared::TaskKind>,
    pub status: Option<agentrt_shared::TaskStatus>,
    pub limit: i64,
}

#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Lightweight liveness ping for `/readyz`.
    async fn ping(&self) -> StoreResult<()>;

    // ---- Tasks ----

    /// Insert a new task row. Fails with `AlreadyExists` if `run_key` is set
    /// and already used by a non-terminal task.
    async fn insert_task(&self, task: Task) -> StoreResult<Task>;

    async fn get_task(&self, task_id: &str) -> StoreResult<Task>;

    async fn list_tasks_by_status(
        &self,
        status: agentrt_shared::TaskStatus,
        limit: i64,
    ) -> StoreResult<Vec<Task>>;

    async fn list_tasks(&self, filter: TaskListFilter) -> StoreResult<Vec<Task>>;

    /// `status=running, worker_id=worker_id, started_at=now, attempts+=1`.
    async fn mark_task_running(
        &self,
        task_id: &str,
        worker_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Task>;

    /// Fails with `NotRunningForWorker` (row untouched) if the task is not
    /// currently running under `worker_id`.
    async fn mark_task_completed_by_worker(
        &self,
        task_id: &str,
        worker_id: i64,
        now: DateTime<Utc>,
        summary: Option<String>,
        artifact_path: Option<String>,
    ) -> StoreResult<Task>;

    async fn mark_task_failed_by_worker(
        &self,
        task_id: &str,
        worker_id: i64,
        now: DateTime<Utc>,
        error_message: String,
    ) -> StoreResult<Task>;

    /// `status=queued`, clears `worker_id`/`started_at`/`finished_at`/
    /// `error_message`; `attempts` is left intact.
    async fn requeue_task(&self, task_id: &str) -> StoreResult<Task>;

    /// Count of tasks with `status IN (queued, running)` — used for the
    /// queue-length + running-count invariant in distilled spec §8.3.
    async fn count_non_terminal(&self) -> StoreResult<i64>;

    // ---- Contexts ----

    async fn ensure_context_for_external_channel(
        &self,
        connector: &str,
        external_id: &str,
        workspace_id: &str,
        context_id: &str,
        is_admin: bool,
    ) -> StoreResult<Context>;

    async fn find_context_by_channel(
        &self,
        connector: &str,
        external_id: &str,
    ) -> StoreResult<Option<Context>>;

    async fn get_context(&self, context_id: &str) -> StoreResult<Context>;

    async fn list_admin_contexts(&self, workspace_id: &str, cap: i64) -> StoreResult<Vec<Context>>;

    // ---- Objectives ----

    async fn create_objective(&self, objective: Objective) -> StoreResult<Objective>;

    async fn update_objective(&self, objective: Objective) -> StoreResult<Objective>;

    async fn get_objective(&self, id: &str) -> StoreResult<Objective>;

    async fn list_objectives(&self, workspace_id: &str) -> StoreResult<Vec<Objective>>;

    async fn set_objective_active(&self, id: &str, active: bool) -> StoreResult<Objective>;

    async fn delete_objective(&self, id: &str) -> StoreResult<()>;

    /// `active=true, trigger_type=schedule, next_run_at <= now`.
    async fn list_due_objectives(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Objective>>;

    async fn list_event_objectives(
        &self,
        workspace_id: &str,
        event_key: &str,
        limit: i64,
    ) -> StoreResult<Vec<Objective>>;

    async fn update_objective_run(&self, id: &str, update: ObjectiveRunUpdate) -> StoreResult<Objective>;

    // ---- IMAP dedupe markers ----

    async fn find_imap_marker(&self, account_key: &str, uid: i64) -> StoreResult<Option<ImapMarker>>;

    async fn insert_imap_marker(&self, marker: ImapMarker) -> StoreResult<()>;
}

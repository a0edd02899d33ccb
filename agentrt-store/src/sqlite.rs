//! SQLite-backed `MetaStore`. Every write goes through a single `SqlitePool`;
//! SQLite's own single-writer semantics give us the durability guarantees the
//! distilled spec asks for without an explicit transaction manager for the
//! simple single-row mutations below.

use agentrt_shared::{Context, ImapMarker, Objective, StoreError, StoreResult, Task, TaskStatus};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::row::{fmt_now, ContextRow, ImapMarkerRow, ObjectiveBind, ObjectiveRow, TaskBind, TaskRow};
use crate::{MetaStore, ObjectiveRunUpdate, RunOutcome, TaskListFilter};

pub struct SqliteMetaStore {
    pool: SqlitePool,
    /// Consecutive-failure threshold at which `update_objective_run` auto-pauses
    /// an objective (open question #1, resolved in SPEC_FULL.md). Defaults to
    /// 5, overridable via `with_pause_threshold`.
    pause_threshold: i32,
}

impl SqliteMetaStore {
    /// Open (creating if absent) the database at `path` and apply migrations.
    pub async fn connect(path: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        sqlx::migrate!("src/migrations").run(&pool).await.map_err(|e| {
            StoreError::Database(format!("migration failed: {e}"))
        })?;
        Ok(Self {
            pool,
            pause_threshold: 5,
        })
    }

    /// Open an in-memory database with migrations applied, for tests.
    pub async fn connect_in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("src/migrations").run(&pool).await.map_err(|e| {
            StoreError::Database(format!("migration failed: {e}"))
        })?;
        Ok(Self {
            pool,
            pause_threshold: 5,
        })
    }

    pub fn with_pause_threshold(mut self, threshold: u32) -> Self {
        self.pause_threshold = threshold as i32;
        self
    }

    fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
    }
}

#[async_trait]
impl MetaStore for SqliteMetaStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    // ---- Tasks ----

    async fn insert_task(&self, task: Task) -> StoreResult<Task> {
        let bind: TaskBind = (&task).into();
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (
                id, workspace_id, context_id, kind, title, prompt, status, attempts,
                worker_id, started_at, finished_at, result_summary, result_path,
                error_message, route_class, priority, assigned_lane, due_at,
                source_connector, source_external_id, source_user_id, source_text,
                run_key, created_at, updated_at
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(&bind.id)
        .bind(&bind.workspace_id)
        .bind(&bind.context_id)
        .bind(&bind.kind)
        .bind(&bind.title)
        .bind(&bind.prompt)
        .bind(&bind.status)
        .bind(bind.attempts)
        .bind(bind.worker_id)
        .bind(&bind.started_at)
        .bind(&bind.finished_at)
        .bind(&bind.result_summary)
        .bind(&bind.result_path)
        .bind(&bind.error_message)
        .bind(&bind.route_class)
        .bind(bind.priority)
        .bind(&bind.assigned_lane)
        .bind(&bind.due_at)
        .bind(&bind.source_connector)
        .bind(&bind.source_external_id)
        .bind(&bind.source_user_id)
        .bind(&bind.source_text)
        .bind(&bind.run_key)
        .bind(&bind.created_at)
        .bind(&bind.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(task),
            Err(e) if Self::is_unique_violation(&e) => Err(StoreError::AlreadyExists(
                task.run_key.unwrap_or_default(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_task(&self, task_id: &str) -> StoreResult<Task> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?
            .into_task()
    }

    async fn list_tasks_by_status(
        &self,
        status: TaskStatus,
        limit: i64,
    ) -> StoreResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks WHERE status = ? ORDER BY created_at ASC LIMIT ?",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    async fn list_tasks(&self, filter: TaskListFilter) -> StoreResult<Vec<Task>> {
        let limit = if filter.limit > 0 { filter.limit } else { 50 };
        let mut sql = String::from("SELECT * FROM tasks WHERE 1=1");
        if filter.workspace_id.is_some() {
            sql.push_str(" AND workspace_id = ?");
        }
        if filter.context_id.is_some() {
            sql.push_str(" AND context_id = ?");
        }
        if filter.kind.is_some() {
            sql.push_str(" AND kind = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");

        let mut q = sqlx::query_as::<_, TaskRow>(&sql);
        if let Some(ws) = &filter.workspace_id {
            q = q.bind(ws);
        }
        if let Some(ctx) = &filter.context_id {
            q = q.bind(ctx);
        }
        if let Some(kind) = &filter.kind {
            q = q.bind(kind.as_str());
        }
        if let Some(status) = &filter.status {
            q = q.bind(status.as_str());
        }
        q = q.bind(limit);

        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    async fn mark_task_running(
        &self,
        task_id: &str,
        worker_id: i64,
        now: chrono::DateTime<Utc>,
    ) -> StoreResult<Task> {
        let now_s = fmt_now(now);
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'running', worker_id = ?, started_at = ?, finished_at = NULL,
                attempts = attempts + 1, updated_at = ?
            WHERE id = ? AND status = 'queued'
            "#,
        )
        .bind(worker_id)
        .bind(&now_s)
        .bind(&now_s)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(task_id.to_string()));
        }
        self.get_task(task_id).await
    }

    async fn mark_task_completed_by_worker(
        &self,
        task_id: &str,
        worker_id: i64,
        now: chrono::DateTime<Utc>,
        summary: Option<String>,
        artifact_path: Option<String>,
    ) -> StoreResult<Task> {
        let now_s = fmt_now(now);
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'succeeded', finished_at = ?, result_summary = ?,
                result_path = ?, error_message = NULL, updated_at = ?
            WHERE id = ? AND status = 'running' AND worker_id = ?
            "#,
        )
        .bind(&now_s)
        .bind(&summary)
        .bind(&artifact_path)
        .bind(&now_s)
        .bind(task_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotRunningForWorker {
                task_id: task_id.to_string(),
                worker_id,
            });
        }
        self.get_task(task_id).await
    }

    async fn mark_task_failed_by_worker(
        &self,
        task_id: &str,
        worker_id: i64,
        now: chrono::DateTime<Utc>,
        error_message: String,
    ) -> StoreResult<Task> {
        let now_s = fmt_now(now);
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed', finished_at = ?, error_message = ?, updated_at = ?
            WHERE id = ? AND status = 'running' AND worker_id = ?
            "#,
        )
        .bind(&now_s)
        .bind(&error_message)
        .bind(&now_s)
        .bind(task_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotRunningForWorker {
                task_id: task_id.to_string(),
                worker_id,
            });
        }
        self.get_task(task_id).await
    }

    async fn requeue_task(&self, task_id: &str) -> StoreResult<Task> {
        let now_s = fmt_now(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'queued', worker_id = 0, started_at = NULL, finished_at = NULL,
                error_message = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&now_s)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(task_id.to_string()));
        }
        self.get_task(task_id).await
    }

    async fn count_non_terminal(&self) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM tasks WHERE status IN ('queued', 'running')")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")?)
    }

    // ---- Contexts ----

    async fn ensure_context_for_external_channel(
        &self,
        connector: &str,
        external_id: &str,
        workspace_id: &str,
        context_id: &str,
        is_admin: bool,
    ) -> StoreResult<Context> {
        if let Some(existing) = self.find_context_by_channel(connector, external_id).await? {
            return Ok(existing);
        }
        let now_s = fmt_now(Utc::now());
        let insert = sqlx::query(
            r#"
            INSERT INTO contexts (context_id, workspace_id, connector, external_id, is_admin, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(context_id)
        .bind(workspace_id)
        .bind(connector)
        .bind(external_id)
        .bind(is_admin as i64)
        .bind(&now_s)
        .bind(&now_s)
        .execute(&self.pool)
        .await;

        match insert {
            Ok(_) => self.get_context(context_id).await,
            Err(e) if Self::is_unique_violation(&e) => self
                .find_context_by_channel(connector, external_id)
                .await?
                .ok_or_else(|| StoreError::ContextNotFound(context_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_context_by_channel(
        &self,
        connector: &str,
        external_id: &str,
    ) -> StoreResult<Option<Context>> {
        let row: Option<ContextRow> = sqlx::query_as(
            "SELECT * FROM contexts WHERE connector = ? AND external_id = ?",
        )
        .bind(connector)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ContextRow::into_context).transpose()
    }

    async fn get_context(&self, context_id: &str) -> StoreResult<Context> {
        let row: Option<ContextRow> = sqlx::query_as("SELECT * FROM contexts WHERE context_id = ?")
            .bind(context_id)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or_else(|| StoreError::ContextNotFound(context_id.to_string()))?
            .into_context()
    }

    async fn list_admin_contexts(&self, workspace_id: &str, cap: i64) -> StoreResult<Vec<Context>> {
        let rows: Vec<ContextRow> = sqlx::query_as(
            "SELECT * FROM contexts WHERE workspace_id = ? AND is_admin = 1 ORDER BY created_at ASC LIMIT ?",
        )
        .bind(workspace_id)
        .bind(cap)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ContextRow::into_context).collect()
    }

    // ---- Objectives ----

    async fn create_objective(&self, objective: Objective) -> StoreResult<Objective> {
        let bind: ObjectiveBind = (&objective).into();
        sqlx::query(
            r#"
            INSERT INTO objectives (
                id, workspace_id, context_id, title, prompt, trigger_type, cron_expr,
                timezone, event_key, next_run_at, run_count, success_count, failure_count,
                consecutive_failures, last_error, last_success_at, last_failure_at,
                active, auto_paused_reason, created_at, updated_at
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(&bind.id)
        .bind(&bind.workspace_id)
        .bind(&bind.context_id)
        .bind(&bind.title)
        .bind(&bind.prompt)
        .bind(&bind.trigger_type)
        .bind(&bind.cron_expr)
        .bind(&bind.timezone)
        .bind(&bind.event_key)
        .bind(&bind.next_run_at)
        .bind(bind.run_count)
        .bind(bind.success_count)
        .bind(bind.failure_count)
        .bind(bind.consecutive_failures)
        .bind(&bind.last_error)
        .bind(&bind.last_success_at)
        .bind(&bind.last_failure_at)
        .bind(bind.active)
        .bind(&bind.auto_paused_reason)
        .bind(&bind.created_at)
        .bind(&bind.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(objective)
    }

    async fn update_objective(&self, objective: Objective) -> StoreResult<Objective> {
        let bind: ObjectiveBind = (&objective).into();
        let result = sqlx::query(
            r#"
            UPDATE objectives
            SET title = ?, prompt = ?, trigger_type = ?, cron_expr = ?, timezone = ?,
                event_key = ?, next_run_at = ?, active = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&bind.title)
        .bind(&bind.prompt)
        .bind(&bind.trigger_type)
        .bind(&bind.cron_expr)
        .bind(&bind.timezone)
        .bind(&bind.event_key)
        .bind(&bind.next_run_at)
        .bind(bind.active)
        .bind(fmt_now(Utc::now()))
        .bind(&bind.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ObjectiveNotFound(objective.id));
        }
        self.get_objective(&bind.id).await
    }

    async fn get_objective(&self, id: &str) -> StoreResult<Objective> {
        let row: Option<ObjectiveRow> = sqlx::query_as("SELECT * FROM objectives WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or_else(|| StoreError::ObjectiveNotFound(id.to_string()))?
            .into_objective()
    }

    async fn list_objectives(&self, workspace_id: &str) -> StoreResult<Vec<Objective>> {
        let rows: Vec<ObjectiveRow> = sqlx::query_as(
            "SELECT * FROM objectives WHERE workspace_id = ? ORDER BY created_at ASC",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ObjectiveRow::into_objective).collect()
    }

    async fn set_objective_active(&self, id: &str, active: bool) -> StoreResult<Objective> {
        let result = sqlx::query(
            "UPDATE objectives SET active = ?, auto_paused_reason = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(active as i64)
        .bind(fmt_now(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ObjectiveNotFound(id.to_string()));
        }
        self.get_objective(id).await
    }

    async fn delete_objective(&self, id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM objectives WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ObjectiveNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list_due_objectives(
        &self,
        now: chrono::DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Objective>> {
        let rows: Vec<ObjectiveRow> = sqlx::query_as(
            r#"
            SELECT * FROM objectives
            WHERE active = 1 AND trigger_type = 'schedule' AND next_run_at IS NOT NULL AND next_run_at <= ?
            ORDER BY next_run_at ASC
            LIMIT ?
            "#,
        )
        .bind(fmt_now(now))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ObjectiveRow::into_objective).collect()
    }

    async fn list_event_objectives(
        &self,
        workspace_id: &str,
        event_key: &str,
        limit: i64,
    ) -> StoreResult<Vec<Objective>> {
        let rows: Vec<ObjectiveRow> = sqlx::query_as(
            r#"
            SELECT * FROM objectives
            WHERE active = 1 AND trigger_type = 'event' AND workspace_id = ? AND event_key = ?
            ORDER BY created_at ASC
            LIMIT ?
            "#,
        )
        .bind(workspace_id)
        .bind(event_key)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ObjectiveRow::into_objective).collect()
    }

    async fn update_objective_run(
        &self,
        id: &str,
        update: ObjectiveRunUpdate,
    ) -> StoreResult<Objective> {
        let mut objective = self.get_objective(id).await?;

        objective.next_run_at = update.next_run_at.or(objective.next_run_at);
        objective.last_error = update.last_error.clone();

        match update.outcome {
            Some(RunOutcome::Success) => {
                objective.run_count += 1;
                objective.success_count += 1;
                objective.consecutive_failures = 0;
                objective.last_success_at = update.last_run_at;
            }
            Some(RunOutcome::Failure) => {
                objective.run_count += 1;
                objective.failure_count += 1;
                objective.consecutive_failures += 1;
                objective.last_failure_at = update.last_run_at;
            }
            None => {}
        }

        if matches!(update.outcome, Some(RunOutcome::Failure))
            && objective.consecutive_failures >= self.pause_threshold
            && objective.active
        {
            objective.active = false;
            objective.auto_paused_reason = Some(format!(
                "auto-paused after {} consecutive failures",
                objective.consecutive_failures
            ));
        }

        objective.updated_at = Utc::now();

        let bind: ObjectiveBind = (&objective).into();
        sqlx::query(
            r#"
            UPDATE objectives
            SET next_run_at = ?, run_count = ?, success_count = ?, failure_count = ?,
                consecutive_failures = ?, last_error = ?, last_success_at = ?,
                last_failure_at = ?, active = ?, auto_paused_reason = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&bind.next_run_at)
        .bind(bind.run_count)
        .bind(bind.success_count)
        .bind(bind.failure_count)
        .bind(bind.consecutive_failures)
        .bind(&bind.last_error)
        .bind(&bind.last_success_at)
        .bind(&bind.last_failure_at)
        .bind(bind.active)
        .bind(&bind.auto_paused_reason)
        .bind(&bind.updated_at)
        .bind(&bind.id)
        .execute(&self.pool)
        .await?;

        self.get_objective(id).await
    }

    // ---- IMAP dedupe markers ----

    async fn find_imap_marker(&self, account_key: &str, uid: i64) -> StoreResult<Option<ImapMarker>> {
        let row: Option<ImapMarkerRow> = sqlx::query_as(
            "SELECT * FROM imap_markers WHERE account_key = ? AND uid = ?",
        )
        .bind(account_key)
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ImapMarkerRow::into_marker).transpose()
    }

    async fn insert_imap_marker(&self, marker: ImapMarker) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO imap_markers (account_key, uid, message_id, workspace_id, context_id, file_path, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&marker.account_key)
        .bind(marker.uid)
        .bind(&marker.message_id)
        .bind(&marker.workspace_id)
        .bind(&marker.context_id)
        .bind(&marker.file_path)
        .bind(fmt_now(marker.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if Self::is_unique_violation(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

//! Bridges `Engine` lifecycle events to durable state (`MetaStore`) and
//! outbound notification (`Notifier`), per distilled spec §4.2. Every store
//! call is wrapped in a short timeout derived from a background token —
//! the engine's own cancellation must not prevent a terminal write during
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use agentrt_engine::{ExecutionResult, TaskObserver};
use agentrt_notifier::Notifier;
use agentrt_shared::{Objective, StoreError, Task, TaskKind};
use agentrt_store::{MetaStore, ObjectiveRunUpdate, RunOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

/// Terminal-write timeout, independent of the caller's own cancellation
/// (distilled spec §4.2, §5 "fresh background context with ≤3s timeout").
const STORE_WRITE_TIMEOUT: Duration = Duration::from_secs(3);

pub struct StoreNotifyObserver {
    store: Arc<dyn MetaStore>,
    notifier: Arc<Notifier>,
    max_error_message_len: usize,
}

impl StoreNotifyObserver {
    pub fn new(store: Arc<dyn MetaStore>, notifier: Arc<Notifier>, max_error_message_len: usize) -> Self {
        Self {
            store,
            notifier,
            max_error_message_len,
        }
    }

    fn truncate_error(&self, err: &str) -> String {
        if err.chars().count() <= self.max_error_message_len {
            err.to_string()
        } else {
            err.chars().take(self.max_error_message_len).collect()
        }
    }

    /// Resolves a completed/failed objective task back to the objective that
    /// produced it (via the `objective:<id>:<ts>` run-key convention) and
    /// records the terminal outcome, so run counters, consecutive-failure
    /// streaks, and auto-pause (`agentrt-store`'s `update_objective_run`)
    /// actually advance for scheduled objective firings (distilled spec
    /// §4.4 step 5). Event-triggered objective tasks carry no run key and
    /// are skipped — there's no way back to the objective from the task
    /// alone in that path.
    async fn record_objective_outcome(&self, task: &Task, now: DateTime<Utc>, outcome: RunOutcome, error: Option<String>) {
        if task.kind != TaskKind::Objective {
            return;
        }
        let Some(objective_id) = task.run_key.as_deref().and_then(Objective::id_from_run_key) else {
            return;
        };

        let result = tokio::time::timeout(
            STORE_WRITE_TIMEOUT,
            self.store.update_objective_run(
                &objective_id,
                ObjectiveRunUpdate {
                    last_run_at: Some(now),
                    next_run_at: None,
                    last_error: error,
                    outcome: Some(outcome),
                },
            ),
        )
        .await;

        match result {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                warn!(objective_id = %objective_id, task_id = %task.id, error = %err, "observer: failed to record objective run outcome");
            }
            Err(_) => {
                warn!(objective_id = %objective_id, task_id = %task.id, "observer: update_objective_run timed out");
            }
        }
    }
}

#[async_trait]
impl TaskObserver for StoreNotifyObserver {
    async fn on_task_queued(&self, _task: &Task) {}

    async fn on_task_started(&self, task: &Task, worker_id: i64) {
        let now = Utc::now();
        let result = tokio::time::timeout(
            STORE_WRITE_TIMEOUT,
            self.store.mark_task_running(&task.id, worker_id, now),
        )
        .await;

        match result {
            Ok(Ok(updated)) => {
                self.notifier.notify_started(&updated).await;
            }
            Ok(Err(err)) => {
                warn!(task_id = %task.id, worker_id, error = %err, "observer: mark_task_running failed");
            }
            Err(_) => {
                warn!(task_id = %task.id, worker_id, "observer: mark_task_running timed out");
            }
        }
    }

    async fn on_task_completed(&self, task: &Task, worker_id: i64, result: &ExecutionResult) {
        let now = Utc::now();
        let updated = tokio::time::timeout(
            STORE_WRITE_TIMEOUT,
            self.store.mark_task_completed_by_worker(
                &task.id,
                worker_id,
                now,
                result.summary.clone(),
                result.artifact_path.clone(),
            ),
        )
        .await;

        match updated {
            Ok(Ok(updated)) => {
                self.record_objective_outcome(&updated, now, RunOutcome::Success, None).await;
                self.notifier
                    .notify_completed(&updated, result.summary.as_deref())
                    .await;
            }
            Ok(Err(StoreError::NotRunningForWorker { task_id, worker_id })) => {
                warn!(task_id, worker_id, "observer: stale completion from superseded executor, skipping notify");
            }
            Ok(Err(err)) => {
                warn!(task_id = %task.id, worker_id, error = %err, "observer: mark_task_completed_by_worker failed");
            }
            Err(_) => {
                warn!(task_id = %task.id, worker_id, "observer: mark_task_completed_by_worker timed out");
            }
        }
    }

    async fn on_task_failed(&self, task: &Task, worker_id: i64, err: &str) {
        let now = Utc::now();
        let error_message = self.truncate_error(err);
        let updated = tokio::time::timeout(
            STORE_WRITE_TIMEOUT,
            self.store
                .mark_task_failed_by_worker(&task.id, worker_id, now, error_message.clone()),
        )
        .await;

        match updated {
            Ok(Ok(updated)) => {
                self.record_objective_outcome(&updated, now, RunOutcome::Failure, Some(error_message.clone())).await;
                self.notifier.notify_failed(&updated, &error_message).await;
            }
            Ok(Err(StoreError::NotRunningForWorker { task_id, worker_id })) => {
                warn!(task_id, worker_id, "observer: stale failure from superseded executor, skipping notify");
            }
            Ok(Err(err)) => {
                warn!(task_id = %task.id, worker_id, error = %err, "observer: mark_task_failed_by_worker failed");
            }
            Err(_) => {
                warn!(task_id = %task.id, worker_id, "observer: mark_task_failed_by_worker timed out");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrt_notifier::{NotifyPolicy, PolicyConfig, PublisherRegistry};
    use agentrt_shared::TaskKind;

    async fn observer() -> (StoreNotifyObserver, Arc<dyn MetaStore>) {
        let store: Arc<dyn MetaStore> =
            Arc::new(agentrt_store::SqliteMetaStore::connect_in_memory().await.unwrap());
        let notifier = Arc::new(Notifier::new(
            store.clone(),
            PublisherRegistry::new(),
            PolicyConfig {
                default: NotifyPolicy::Both,
                success: None,
                failure: None,
            },
            tempfile::tempdir().unwrap().into_path(),
        ));
        (StoreNotifyObserver::new(store.clone(), notifier, 4000), store)
    }

    #[tokio::test]
    async fn started_then_completed_marks_row_terminal() {
        let (observer, store) = observer().await;
        let task = Task::new("ws", "chan-1", TaskKind::General, "t", "p");
        let task = store.insert_task(task).await.unwrap();

        observer.on_task_started(&task, 1).await;
        let running = store.get_task(&task.id).await.unwrap();
        assert_eq!(running.status, agentrt_shared::TaskStatus::Running);
        assert_eq!(running.attempts, 1);

        observer
            .on_task_completed(
                &task,
                1,
                &ExecutionResult {
                    summary: Some("done".to_string()),
                    artifact_path: None,
                },
            )
            .await;
        let completed = store.get_task(&task.id).await.unwrap();
        assert_eq!(completed.status, agentrt_shared::TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn completion_from_superseded_worker_is_ignored() {
        let (observer, store) = observer().await;
        let task = Task::new("ws", "chan-1", TaskKind::General, "t", "p");
        let task = store.insert_task(task).await.unwrap();
        store.mark_task_running(&task.id, 1, Utc::now()).await.unwrap();

        observer
            .on_task_completed(
                &task,
                2,
                &ExecutionResult {
                    summary: Some("done".to_string()),
                    artifact_path: None,
                },
            )
            .await;

        let row = store.get_task(&task.id).await.unwrap();
        assert_eq!(row.status, agentrt_shared::TaskStatus::Running);
        assert_eq!(row.worker_id, 1);
    }

    async fn seed_objective(store: &Arc<dyn MetaStore>) -> Objective {
        let now = Utc::now();
        let objective = Objective {
            id: "obj-1".to_string(),
            workspace_id: "ws".to_string(),
            context_id: "system:scheduler".to_string(),
            title: "t".to_string(),
            prompt: "p".to_string(),
            trigger_type: agentrt_shared::TriggerType::Schedule,
            cron_expr: Some("* * * * *".to_string()),
            timezone: Some("UTC".to_string()),
            event_key: None,
            next_run_at: Some(now),
            run_count: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            last_error: None,
            last_success_at: None,
            last_failure_at: None,
            active: true,
            auto_paused_reason: None,
            created_at: now,
            updated_at: now,
        };
        store.create_objective(objective).await.unwrap()
    }

    #[tokio::test]
    async fn completed_objective_task_updates_success_counters() {
        let (observer, store) = observer().await;
        let objective = seed_objective(&store).await;

        let mut task = Task::new("ws", "system:scheduler", TaskKind::Objective, "t", "p");
        task.run_key = Some(objective.run_key_for(Utc::now()));
        let task = store.insert_task(task).await.unwrap();
        store.mark_task_running(&task.id, 1, Utc::now()).await.unwrap();

        observer
            .on_task_completed(
                &task,
                1,
                &ExecutionResult {
                    summary: Some("done".to_string()),
                    artifact_path: None,
                },
            )
            .await;

        let updated = store.get_objective(&objective.id).await.unwrap();
        assert_eq!(updated.run_count, 1);
        assert_eq!(updated.success_count, 1);
        assert_eq!(updated.consecutive_failures, 0);
        assert!(updated.last_success_at.is_some());
    }

    #[tokio::test]
    async fn failed_objective_task_updates_failure_counters() {
        let (observer, store) = observer().await;
        let objective = seed_objective(&store).await;

        let mut task = Task::new("ws", "system:scheduler", TaskKind::Objective, "t", "p");
        task.run_key = Some(objective.run_key_for(Utc::now()));
        let task = store.insert_task(task).await.unwrap();
        store.mark_task_running(&task.id, 1, Utc::now()).await.unwrap();

        observer.on_task_failed(&task, 1, "boom").await;

        let updated = store.get_objective(&objective.id).await.unwrap();
        assert_eq!(updated.run_count, 1);
        assert_eq!(updated.failure_count, 1);
        assert_eq!(updated.consecutive_failures, 1);
        assert_eq!(updated.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn objective_task_without_run_key_leaves_counters_untouched() {
        let (observer, store) = observer().await;
        let objective = seed_objective(&store).await;

        let task = Task::new("ws", "system:scheduler", TaskKind::Objective, "t", "p");
        let task = store.insert_task(task).await.unwrap();
        store.mark_task_running(&task.id, 1, Utc::now()).await.unwrap();

        observer.on_task_failed(&task, 1, "boom").await;

        let untouched = store.get_objective(&objective.id).await.unwrap();
        assert_eq!(untouched.run_count, 0);
        assert_eq!(untouched.failure_count, 0);
    }
}

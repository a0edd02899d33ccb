//! Objective scheduler: polls due objectives on a ticker and enqueues
//! idempotent task rows, plus an event path for filesystem-pulse-triggered
//! objectives (distilled spec §4.4).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use agentrt_engine::Engine;
use agentrt_shared::heartbeat::Reporter;
use agentrt_shared::{StoreError, Task, TaskKind};
use agentrt_store::{MetaStore, ObjectiveRunUpdate};
use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DUE_OBJECTIVES_LIMIT: i64 = 20;
const EVENT_OBJECTIVES_LIMIT: i64 = 20;
const MARKDOWN_UPDATED_EVENT: &str = "markdown.updated";

pub struct Scheduler {
    store: Arc<dyn MetaStore>,
    engine: Arc<Engine>,
    poll_interval: Duration,
    heartbeat: Option<Arc<dyn Reporter>>,
}

impl Scheduler {
    /// `poll_interval` is clamped to a minimum of 1s per distilled spec §4.4.
    pub fn new(store: Arc<dyn MetaStore>, engine: Arc<Engine>, poll_interval: Duration) -> Self {
        Self {
            store,
            engine,
            poll_interval: poll_interval.max(Duration::from_secs(1)),
            heartbeat: None,
        }
    }

    pub fn with_heartbeat(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.heartbeat = Some(reporter);
        self
    }

    /// Runs the poll loop until `cancel` fires. Owns its own ticker.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        if let Some(reporter) = &self.heartbeat {
            reporter.beat("scheduler started");
        }
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Utc::now()).await;
                    if let Some(reporter) = &self.heartbeat {
                        reporter.beat("poll tick complete");
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("scheduler received cancellation, stopping");
                    if let Some(reporter) = &self.heartbeat {
                        reporter.stopped("cancelled");
                    }
                    return;
                }
            }
        }
    }

    /// One poll iteration, exposed directly for deterministic tests.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let due = match self.store.list_due_objectives(now, DUE_OBJECTIVES_LIMIT).await {
            Ok(objectives) => objectives,
            Err(err) => {
                warn!(error = %err, "scheduler: failed to list due objectives");
                return;
            }
        };

        for objective in due {
            self.fire_scheduled(objective, now).await;
        }
    }

    async fn fire_scheduled(&self, objective: agentrt_shared::Objective, now: DateTime<Utc>) {
        let scheduled_for = objective.next_run_at.unwrap_or(now);

        let next_run_at = match compute_next_run(&objective) {
            Ok(next) => Some(next),
            Err(err) => {
                warn!(objective_id = %objective.id, error = %err, "scheduler: failed to parse cron expression, clearing next_run_at");
                let _ = self
                    .store
                    .update_objective_run(
                        &objective.id,
                        ObjectiveRunUpdate {
                            last_run_at: Some(now),
                            next_run_at: None,
                            last_error: Some(err),
                            outcome: None,
                        },
                    )
                    .await;
                return;
            }
        };

        if objective.prompt.trim().is_empty() {
            let _ = self
                .store
                .update_objective_run(
                    &objective.id,
                    ObjectiveRunUpdate {
                        last_run_at: Some(now),
                        next_run_at,
                        last_error: Some("objective prompt is empty".to_string()),
                        outcome: None,
                    },
                )
                .await;
            return;
        }

        let run_key = objective.run_key_for(scheduled_for);
        self.enqueue_objective_task(&objective, run_key).await;

        let _ = self
            .store
            .update_objective_run(
                &objective.id,
                ObjectiveRunUpdate {
                    last_run_at: Some(now),
                    next_run_at,
                    last_error: None,
                    outcome: None,
                },
            )
            .await;
    }

    async fn enqueue_objective_task(&self, objective: &agentrt_shared::Objective, run_key: String) {
        let mut task = Task::new(
            &objective.workspace_id,
            &objective.context_id,
            TaskKind::Objective,
            &objective.title,
            &objective.prompt,
        );
        task.id = format!("task-{}", uuid::Uuid::new_v4());
        task.run_key = Some(run_key.clone());

        let inserted = match self.store.insert_task(task).await {
            Ok(task) => task,
            Err(StoreError::AlreadyExists(_)) => {
                info!(run_key = %run_key, "scheduler: objective firing already enqueued, treating as success");
                return;
            }
            Err(err) => {
                warn!(objective_id = %objective.id, error = %err, "scheduler: failed to persist objective task");
                return;
            }
        };

        if let Err(err) = self.engine.enqueue(inserted).await {
            warn!(objective_id = %objective.id, error = %err, "scheduler: enqueue failed, durable row remains for recovery");
        }
    }

    /// Event path: fires every event-triggered objective subscribed to
    /// `event_key = "markdown.updated"` for the workspace.
    pub async fn handle_markdown_update(&self, workspace_id: &str, changed_path: &str) {
        let objectives = match self
            .store
            .list_event_objectives(workspace_id, MARKDOWN_UPDATED_EVENT, EVENT_OBJECTIVES_LIMIT)
            .await
        {
            Ok(objectives) => objectives,
            Err(err) => {
                warn!(workspace_id = %workspace_id, error = %err, "scheduler: failed to list event objectives");
                return;
            }
        };

        for objective in objectives {
            let prompt = format!(
                "{}\nChanged markdown file: `{changed_path}`.",
                objective.prompt
            );
            let mut task = Task::new(
                &objective.workspace_id,
                &objective.context_id,
                TaskKind::Objective,
                &objective.title,
                prompt,
            );
            task.id = format!("task-{}", uuid::Uuid::new_v4());

            match self.store.insert_task(task).await {
                Ok(task) => {
                    if let Err(err) = self.engine.enqueue(task).await {
                        warn!(objective_id = %objective.id, error = %err, "scheduler: event-triggered enqueue failed");
                    }
                }
                Err(err) => {
                    warn!(objective_id = %objective.id, error = %err, "scheduler: failed to persist event-triggered task");
                }
            }
        }
    }
}

/// Computes the next cron occurrence for a schedule-triggered objective.
/// Exposed for callers that need to seed `next_run_at` at creation time
/// (the HTTP objective-creation route) without duplicating the cron parse.
pub fn compute_next_run(objective: &agentrt_shared::Objective) -> Result<DateTime<Utc>, String> {
    let expr = objective
        .cron_expr
        .as_deref()
        .ok_or_else(|| "objective has no cron_expr".to_string())?;
    let schedule = Schedule::from_str(expr).map_err(|e| e.to_string())?;

    let tz: chrono_tz::Tz = objective
        .timezone
        .as_deref()
        .unwrap_or("UTC")
        .parse()
        .map_err(|_| format!("invalid timezone: {:?}", objective.timezone))?;

    schedule
        .upcoming(tz)
        .next()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| "cron schedule has no upcoming occurrence".to_string())
}

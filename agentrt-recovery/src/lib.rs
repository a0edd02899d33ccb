//! Startup and periodic recovery: rescues queued and stale-running tasks
//! after a crash (distilled spec §4.5).

use std::sync::Arc;
use std::time::Duration;

use agentrt_engine::Engine;
use agentrt_shared::heartbeat::Reporter;
use agentrt_shared::{Task, TaskStatus};
use agentrt_store::MetaStore;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LIST_LIMIT: i64 = 500;

pub struct RecoveryController {
    store: Arc<dyn MetaStore>,
    engine: Arc<Engine>,
    stale_after: Duration,
    heartbeat: Option<Arc<dyn Reporter>>,
}

impl RecoveryController {
    pub fn new(store: Arc<dyn MetaStore>, engine: Arc<Engine>, stale_after: Duration) -> Self {
        Self {
            store,
            engine,
            stale_after,
            heartbeat: None,
        }
    }

    pub fn with_heartbeat(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.heartbeat = Some(reporter);
        self
    }

    /// Periodic recovery loop interval: `clamp(stale_after / 2, 30s, 10min)`.
    pub fn periodic_interval(&self) -> Duration {
        (self.stale_after / 2).clamp(Duration::from_secs(30), Duration::from_secs(600))
    }

    /// Startup recovery: requeues lingering queued tasks and stale running
    /// tasks, sorted by `created_at` then id, and enqueues each. Must be
    /// invoked once before workers accept new external input.
    pub async fn run_startup_recovery(&self) {
        let queued = self
            .store
            .list_tasks_by_status(TaskStatus::Queued, LIST_LIMIT)
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "recovery: failed to list queued tasks");
                Vec::new()
            });
        let running = self
            .store
            .list_tasks_by_status(TaskStatus::Running, LIST_LIMIT)
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "recovery: failed to list running tasks");
                Vec::new()
            });

        let now = Utc::now();
        let mut stale_requeued = Vec::new();
        for task in running {
            let Some(started_at) = task.started_at else {
                continue;
            };
            let elapsed = (now - started_at).to_std().unwrap_or(Duration::ZERO);
            if elapsed >= self.stale_after {
                match self.store.requeue_task(&task.id).await {
                    Ok(requeued) => stale_requeued.push(requeued),
                    Err(err) => warn!(task_id = %task.id, error = %err, "recovery: failed to requeue stale task"),
                }
            }
        }

        let queued_count = queued.len();
        let stale_count = stale_requeued.len();

        let mut candidates: Vec<Task> = queued.into_iter().chain(stale_requeued).collect();
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut recovered = 0usize;
        for task in candidates {
            if self.engine.enqueue(task).await.is_ok() {
                recovered += 1;
            } else {
                warn!("recovery: enqueue failed during startup recovery, row remains durable");
            }
        }

        info!(
            queued = queued_count,
            stale_requeued = stale_count,
            recovered,
            "startup recovery complete"
        );
    }

    /// Periodic recovery: repeats only the stale-running half, so a task
    /// whose worker silently died is rescued within one interval.
    pub async fn run_periodic_pass(&self) {
        let running = match self
            .store
            .list_tasks_by_status(TaskStatus::Running, LIST_LIMIT)
            .await
        {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(error = %err, "recovery: periodic pass failed to list running tasks");
                return;
            }
        };

        let now = Utc::now();
        let mut rescued = 0usize;
        for task in running {
            let Some(started_at) = task.started_at else {
                continue;
            };
            let elapsed = (now - started_at).to_std().unwrap_or(Duration::ZERO);
            if elapsed < self.stale_after {
                continue;
            }
            match self.store.requeue_task(&task.id).await {
                Ok(requeued) => {
                    if self.engine.enqueue(requeued).await.is_ok() {
                        rescued += 1;
                    }
                }
                Err(err) => warn!(task_id = %task.id, error = %err, "recovery: periodic requeue failed"),
            }
        }
        if rescued > 0 {
            info!(rescued, "periodic recovery rescued stale running tasks");
        }
    }

    /// Runs the periodic pass on a ticker until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.periodic_interval());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_periodic_pass().await;
                    if let Some(reporter) = &self.heartbeat {
                        reporter.beat("periodic recovery pass complete");
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("recovery loop received cancellation, stopping");
                    if let Some(reporter) = &self.heartbeat {
                        reporter.stopped("cancelled");
                    }
                    return;
                }
            }
        }
    }
}

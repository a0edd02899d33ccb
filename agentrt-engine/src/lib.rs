//! Bounded in-process task queue and fixed-size worker pool.
//!
//! `Engine` owns the channel producers submit to and the consumers that pull
//! from it. It knows nothing about how a task is executed or how its
//! lifecycle is persisted — those are the pluggable `TaskExecutor` and
//! `TaskObserver` capability traits, wired in once before `start`.

use agentrt_shared::heartbeat::Reporter;
use agentrt_shared::{StoreError, Task};
use async_trait::async_trait;
use futures::FutureExt;
use once_cell::sync::OnceCell;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of a successful `TaskExecutor::execute` call.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub summary: Option<String>,
    pub artifact_path: Option<String>,
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<ExecutionResult, String>;
}

/// Bridges engine lifecycle events to durable state and notification.
/// Object-safe so the engine can hold it as `Arc<dyn TaskObserver>`.
#[async_trait]
pub trait TaskObserver: Send + Sync {
    async fn on_task_queued(&self, task: &Task);
    async fn on_task_started(&self, task: &Task, worker_id: i64);
    async fn on_task_completed(&self, task: &Task, worker_id: i64, result: &ExecutionResult);
    async fn on_task_failed(&self, task: &Task, worker_id: i64, err: &str);
}

#[cfg(test)]
fn _assert_object_safe(_e: &dyn TaskExecutor, _o: &dyn TaskObserver) {}

struct WorkItem {
    task: Task,
}

pub struct Engine {
    tx: mpsc::Sender<WorkItem>,
    rx: tokio::sync::Mutex<Option<mpsc::Receiver<WorkItem>>>,
    workers: usize,
    executor: OnceCell<Arc<dyn TaskExecutor>>,
    observer: OnceCell<Arc<dyn TaskObserver>>,
    heartbeat: OnceCell<Arc<dyn Reporter>>,
}

impl Engine {
    /// `workers` long-lived consumers share a channel of capacity `workers * 50`.
    pub fn new(workers: usize) -> Arc<Self> {
        let capacity = workers.max(1) * 50;
        let (tx, rx) = mpsc::channel(capacity);
        Arc::new(Self {
            tx,
            rx: tokio::sync::Mutex::new(Some(rx)),
            workers: workers.max(1),
            executor: OnceCell::new(),
            observer: OnceCell::new(),
            heartbeat: OnceCell::new(),
        })
    }

    /// Must be called before `start`.
    pub fn set_executor(&self, executor: Arc<dyn TaskExecutor>) {
        let _ = self.executor.set(executor);
    }

    /// Must be called before `start`.
    pub fn set_observer(&self, observer: Arc<dyn TaskObserver>) {
        let _ = self.observer.set(observer);
    }

    /// Optional liveness reporter; each worker beats after finishing a task.
    pub fn set_heartbeat(&self, reporter: Arc<dyn Reporter>) {
        let _ = self.heartbeat.set(reporter);
    }

    /// Non-blocking enqueue. Fails fast with `QueueFull` rather than
    /// backpressuring the caller.
    pub async fn enqueue(&self, task: Task) -> Result<Task, StoreError> {
        match self.tx.try_send(WorkItem { task: task.clone() }) {
            Ok(()) => {
                if let Some(observer) = self.observer.get() {
                    observer.on_task_queued(&task).await;
                }
                Ok(task)
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(StoreError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(StoreError::QueueFull),
        }
    }

    /// Current in-memory channel depth (queued, not yet picked up by a worker).
    pub fn queue_len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Spawns `workers` consumers and blocks until `cancel` fires and every
    /// worker has drained its current task.
    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) {
        let executor = self
            .executor
            .get()
            .cloned()
            .expect("Engine::set_executor must be called before start");
        let observer = self
            .observer
            .get()
            .cloned()
            .expect("Engine::set_observer must be called before start");

        let rx = self
            .rx
            .lock()
            .await
            .take()
            .expect("Engine::start called more than once");
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let heartbeat = self.heartbeat.get().cloned();
        if let Some(reporter) = &heartbeat {
            reporter.beat("worker pool started");
        }

        let mut handles = Vec::with_capacity(self.workers);
        for worker_id in 1..=self.workers as i64 {
            let rx = rx.clone();
            let executor = executor.clone();
            let observer = observer.clone();
            let cancel = cancel.clone();
            let heartbeat = heartbeat.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, rx, executor, observer, heartbeat, cancel).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    worker_id: i64,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>,
    executor: Arc<dyn TaskExecutor>,
    observer: Arc<dyn TaskObserver>,
    heartbeat: Option<Arc<dyn Reporter>>,
    cancel: CancellationToken,
) {
    loop {
        let item = {
            let mut guard = rx.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = guard.recv() => item,
            }
        };
        let Some(WorkItem { task }) = item else {
            break;
        };

        info!(task_id = %task.id, worker_id, "task started");
        observer.on_task_started(&task, worker_id).await;

        let outcome = AssertUnwindSafe(executor.execute(&task))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => {
                observer.on_task_completed(&task, worker_id, &result).await;
            }
            Ok(Err(err)) => {
                warn!(task_id = %task.id, worker_id, error = %err, "task failed");
                observer.on_task_failed(&task, worker_id, &err).await;
            }
            Err(panic) => {
                let message = panic_message(&panic);
                warn!(task_id = %task.id, worker_id, error = %message, "task executor panicked");
                observer.on_task_failed(&task, worker_id, &message).await;
            }
        }
        if let Some(reporter) = &heartbeat {
            reporter.beat(&format!("worker {worker_id} drained a task"));
        }
    }
    info!(worker_id, "worker drained and exiting");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("executor panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("executor panicked: {s}")
    } else {
        "executor panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrt_shared::TaskKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct EchoExecutor;

    #[async_trait]
    impl TaskExecutor for EchoExecutor {
        async fn execute(&self, task: &Task) -> Result<ExecutionResult, String> {
            if task.prompt == "panic" {
                panic!("boom");
            }
            if task.prompt == "fail" {
                return Err("deliberate failure".to_string());
            }
            Ok(ExecutionResult {
                summary: Some(format!("echo: {}", task.prompt)),
                artifact_path: None,
            })
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        started: AtomicUsize,
        completed: AtomicUsize,
        failed: AtomicUsize,
    }

    #[async_trait]
    impl TaskObserver for CountingObserver {
        async fn on_task_queued(&self, _task: &Task) {}
        async fn on_task_started(&self, _task: &Task, _worker_id: i64) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_task_completed(&self, _task: &Task, _worker_id: i64, _result: &ExecutionResult) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_task_failed(&self, _task: &Task, _worker_id: i64, _err: &str) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn enqueue_beyond_capacity_returns_queue_full() {
        let engine = Engine::new(1);
        engine.set_executor(Arc::new(EchoExecutor));
        engine.set_observer(Arc::new(CountingObserver::default()));

        for i in 0..50 {
            let task = Task::new("ws", "ctx", TaskKind::General, "t", format!("job-{i}"));
            engine.enqueue(task).await.unwrap();
        }
        let overflow = Task::new("ws", "ctx", TaskKind::General, "t", "overflow");
        let err = engine.enqueue(overflow).await.unwrap_err();
        assert!(matches!(err, StoreError::QueueFull));
    }

    #[tokio::test]
    async fn heartbeat_beats_after_each_drained_task() {
        let engine = Engine::new(1);
        engine.set_executor(Arc::new(EchoExecutor));
        engine.set_observer(Arc::new(CountingObserver::default()));
        let registry = agentrt_shared::heartbeat::HeartbeatRegistry::new();
        engine.set_heartbeat(registry.register("engine"));

        engine
            .enqueue(Task::new("ws", "ctx", TaskKind::General, "t", "hello"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let engine_clone = engine.clone();
        let handle = tokio::spawn(async move { engine_clone.start(cancel_clone).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let _ = handle.await;

        let snapshot = registry.snapshot(Duration::from_secs(60));
        let engine_component = snapshot.components.iter().find(|c| c.name == "engine").unwrap();
        assert!(engine_component.last_beat_at.is_some());
    }

    #[tokio::test]
    async fn worker_processes_success_failure_and_panic() {
        let engine = Engine::new(2);
        let observer = Arc::new(CountingObserver::default());
        engine.set_executor(Arc::new(EchoExecutor));
        engine.set_observer(observer.clone());

        engine
            .enqueue(Task::new("ws", "ctx", TaskKind::General, "t", "hello"))
            .await
            .unwrap();
        engine
            .enqueue(Task::new("ws", "ctx", TaskKind::General, "t", "fail"))
            .await
            .unwrap();
        engine
            .enqueue(Task::new("ws", "ctx", TaskKind::General, "t", "panic"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let engine_clone = engine.clone();
        let handle = tokio::spawn(async move { engine_clone.start(cancel_clone).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        let _ = handle.await;

        assert_eq!(observer.started.load(Ordering::SeqCst), 3);
        assert_eq!(observer.completed.load(Ordering::SeqCst), 1);
        assert_eq!(observer.failed.load(Ordering::SeqCst), 2);
    }
}

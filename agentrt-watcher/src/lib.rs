//! Filesystem event fan-in: watches a workspace root for markdown changes,
//! debounces per-workspace reindex tasks, and routes non-ignored events to
//! the scheduler (distilled spec §4.4, §5).
//!
//! The watcher owns its own `notify` watcher thread; events cross into async
//! land over an unbounded channel, mirroring the standard bridging pattern
//! for callback-based watchers in an async runtime.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use agentrt_engine::Engine;
use agentrt_shared::heartbeat::Reporter;
use agentrt_shared::{Task, TaskKind};
use agentrt_store::MetaStore;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcherTrait};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SYSTEM_WATCHER_CONTEXT: &str = "system:filewatcher";

/// Receives markdown-changed pulses routed by the watcher. Implemented by an
/// adapter over the scheduler, wired in the runtime supervisor — kept as a
/// trait here so this crate does not depend on `agentrt-scheduler`.
#[async_trait]
pub trait MarkdownEventSink: Send + Sync {
    async fn handle_markdown_update(&self, workspace_id: &str, changed_path: &str);
}

pub struct FileWatcher {
    workspace_root: PathBuf,
    store: Arc<dyn MetaStore>,
    engine: Arc<Engine>,
    debounce: Duration,
    last_queued: DashMap<String, chrono::DateTime<Utc>>,
    sink: Option<Arc<dyn MarkdownEventSink>>,
    heartbeat: Option<Arc<dyn Reporter>>,
}

impl FileWatcher {
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        store: Arc<dyn MetaStore>,
        engine: Arc<Engine>,
        debounce: Duration,
    ) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            store,
            engine,
            debounce,
            last_queued: DashMap::new(),
            sink: None,
            heartbeat: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn MarkdownEventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_heartbeat(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.heartbeat = Some(reporter);
        self
    }

    /// Starts the OS-level watch and processes events until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

        let mut watcher: RecommendedWatcher = match notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        }) {
            Ok(w) => w,
            Err(err) => {
                warn!(error = %err, "watcher: failed to construct filesystem watcher");
                return;
            }
        };

        if let Err(err) = watcher.watch(&self.workspace_root, RecursiveMode::Recursive) {
            warn!(error = %err, path = %self.workspace_root.display(), "watcher: failed to watch workspace root");
            if let Some(reporter) = &self.heartbeat {
                reporter.degrade("failed to watch workspace root", Some(&err.to_string()));
            }
            return;
        }
        if let Some(reporter) = &self.heartbeat {
            reporter.beat("watching workspace root");
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("watcher received cancellation, stopping");
                    if let Some(reporter) = &self.heartbeat {
                        reporter.stopped("cancelled");
                    }
                    return;
                }
                event = rx.recv() => {
                    match event {
                        Some(Ok(event)) => {
                            self.handle_event(event).await;
                            if let Some(reporter) = &self.heartbeat {
                                reporter.beat("processed filesystem event");
                            }
                        }
                        Some(Err(err)) => warn!(error = %err, "watcher: received error from filesystem watcher"),
                        None => {
                            debug!("watcher: event channel closed, stopping");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn handle_event(&self, event: Event) {
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) {
            return;
        }
        for path in event.paths {
            self.handle_path_event(&path).await;
        }
    }

    /// Processes one raw path change. Exposed directly so tests can drive it
    /// without relying on real filesystem notifications.
    pub async fn handle_path_event(&self, path: &Path) {
        if is_ignored_path(path) {
            return;
        }
        let Some(workspace_id) = workspace_id_for(&self.workspace_root, path) else {
            return;
        };

        if self.should_debounce(&workspace_id) {
            return;
        }
        self.last_queued.insert(workspace_id.clone(), Utc::now());

        let relative_path = path
            .strip_prefix(self.workspace_root.join(&workspace_id))
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();

        self.enqueue_reindex(&workspace_id, &relative_path).await;

        if let Some(sink) = &self.sink {
            sink.handle_markdown_update(&workspace_id, &relative_path).await;
        }
    }

    fn should_debounce(&self, workspace_id: &str) -> bool {
        match self.last_queued.get(workspace_id) {
            Some(last) => {
                (Utc::now() - *last)
                    .to_std()
                    .map(|d| d < self.debounce)
                    .unwrap_or(false)
            }
            None => false,
        }
    }

    async fn enqueue_reindex(&self, workspace_id: &str, relative_path: &str) {
        let task = Task::new(
            workspace_id,
            SYSTEM_WATCHER_CONTEXT,
            TaskKind::ReindexMarkdown,
            "Reindex workspace",
            format!("markdown file changed: {relative_path}"),
        );

        match self.store.insert_task(task).await {
            Ok(task) => {
                if let Err(err) = self.engine.enqueue(task).await {
                    warn!(workspace_id = %workspace_id, error = %err, "watcher: reindex enqueue failed");
                } else {
                    info!(workspace_id = %workspace_id, path = %relative_path, "watcher: reindex task queued");
                }
            }
            Err(err) => {
                warn!(workspace_id = %workspace_id, error = %err, "watcher: failed to persist reindex task");
            }
        }
    }
}

/// Workspace is the first path segment relative to `workspace_root`
/// (glossary: "Workspace").
fn workspace_id_for(workspace_root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(workspace_root).ok()?;
    relative
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
}

/// Ignores dotfiles/dot-directories, non-markdown files, and anything under
/// a `logs/` or `tasks/` directory (the engine's own output, not user
/// content worth reindexing).
fn is_ignored_path(path: &Path) -> bool {
    if path
        .components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
    {
        return true;
    }
    if path.components().any(|c| {
        let s = c.as_os_str().to_string_lossy();
        s == "logs" || s == "tasks"
    }) {
        return true;
    }
    !matches!(path.extension().and_then(|e| e.to_str()), Some("md"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopExecutor;
    #[async_trait]
    impl agentrt_engine::TaskExecutor for NoopExecutor {
        async fn execute(&self, _task: &Task) -> Result<agentrt_engine::ExecutionResult, String> {
            Ok(agentrt_engine::ExecutionResult::default())
        }
    }

    struct NoopObserver;
    #[async_trait]
    impl agentrt_engine::TaskObserver for NoopObserver {
        async fn on_task_queued(&self, _task: &Task) {}
        async fn on_task_started(&self, _task: &Task, _worker_id: i64) {}
        async fn on_task_completed(&self, _task: &Task, _worker_id: i64, _result: &agentrt_engine::ExecutionResult) {}
        async fn on_task_failed(&self, _task: &Task, _worker_id: i64, _err: &str) {}
    }

    #[derive(Default)]
    struct CountingSink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarkdownEventSink for CountingSink {
        async fn handle_markdown_update(&self, _workspace_id: &str, _changed_path: &str) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn watcher_with_sink(root: &Path, sink: Arc<CountingSink>) -> (Arc<FileWatcher>, Arc<dyn MetaStore>) {
        let store: Arc<dyn MetaStore> =
            Arc::new(agentrt_store::SqliteMetaStore::connect_in_memory().await.unwrap());
        let engine = Engine::new(1);
        engine.set_executor(Arc::new(NoopExecutor));
        engine.set_observer(Arc::new(NoopObserver));
        let watcher = Arc::new(
            FileWatcher::new(root, store.clone(), engine, Duration::from_secs(2)).with_sink(sink),
        );
        (watcher, store)
    }

    #[test]
    fn ignores_dotfiles_and_non_markdown() {
        assert!(is_ignored_path(Path::new("/root/ws1/.git/HEAD")));
        assert!(is_ignored_path(Path::new("/root/ws1/notes/data.json")));
        assert!(!is_ignored_path(Path::new("/root/ws1/notes/a.md")));
        assert!(is_ignored_path(Path::new("/root/ws1/logs/chats/telegram/1.md")));
        assert!(is_ignored_path(Path::new("/root/ws1/tasks/2026/01/01/x.md")));
    }

    #[test]
    fn workspace_id_is_first_relative_segment() {
        let root = Path::new("/var/agentrt/workspaces");
        let path = root.join("ws1").join("notes").join("a.md");
        assert_eq!(workspace_id_for(root, &path), Some("ws1".to_string()));
    }

    #[tokio::test]
    async fn single_event_enqueues_and_routes_to_sink() {
        let root = tempfile::tempdir().unwrap();
        let sink = Arc::new(CountingSink::default());
        let (watcher, store) = watcher_with_sink(root.path(), sink.clone()).await;

        let path = root.path().join("ws1").join("notes").join("a.md");
        watcher.handle_path_event(&path).await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        let tasks = store
            .list_tasks(agentrt_store::TaskListFilter {
                workspace_id: Some("ws1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].context_id, SYSTEM_WATCHER_CONTEXT);
        assert!(tasks[0].prompt.contains("markdown file changed:"));
    }

    #[tokio::test]
    async fn repeated_events_within_debounce_window_enqueue_once() {
        let root = tempfile::tempdir().unwrap();
        let sink = Arc::new(CountingSink::default());
        let (watcher, store) = watcher_with_sink(root.path(), sink.clone()).await;

        let path = root.path().join("ws1").join("notes").join("a.md");
        for _ in 0..5 {
            watcher.handle_path_event(&path).await;
        }

        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        let tasks = store
            .list_tasks(agentrt_store::TaskListFilter {
                workspace_id: Some("ws1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test]
    async fn non_markdown_path_is_ignored_entirely() {
        let root = tempfile::tempdir().unwrap();
        let sink = Arc::new(CountingSink::default());
        let (watcher, store) = watcher_with_sink(root.path(), sink.clone()).await;

        let path = root.path().join("ws1").join("data.bin");
        watcher.handle_path_event(&path).await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
        let tasks = store
            .list_tasks(agentrt_store::TaskListFilter {
                workspace_id: Some("ws1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(tasks.is_empty());
    }
}

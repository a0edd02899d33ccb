//! Wires every component into one process and drives graceful shutdown.
//! Mirrors the production server's bootstrap-then-select-shutdown-signal
//! shape: build every piece, start the long-lived loops under one shared
//! cancellation, wait on Ctrl+C/SIGTERM, then cancel and drain.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agentrt_engine::Engine;
use agentrt_http::{AppState, InfoConfig, MessageGateway};
use agentrt_notifier::{NotifyPolicy, Notifier, PolicyConfig, PublisherRegistry};
use agentrt_recovery::RecoveryController;
use agentrt_scheduler::Scheduler;
use agentrt_shared::heartbeat::{HeartbeatRegistry, Monitor};
use agentrt_shared::RuntimeConfig;
use agentrt_store::{MetaStore, SqliteMetaStore};
use agentrt_watcher::FileWatcher;
use agentrt_worker::{Indexer, Responder, ToolRegistry, WorkerExecutor};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::heartbeat_sink::LoggingTransitionSink;
use crate::observer::StoreNotifyObserver;
use crate::watcher_sink::SchedulerEventSink;

/// Pluggable capabilities the supervisor does not implement itself — agent
/// responders, tool dispatch, search indexing, outbound publishers, and the
/// chat gateway are integration points supplied by the embedding deployment.
#[derive(Default)]
pub struct RuntimeDeps {
    pub responder: Option<Arc<dyn Responder>>,
    pub tools: Option<Arc<dyn ToolRegistry>>,
    pub indexer: Option<Arc<dyn Indexer>>,
    pub publishers: PublisherRegistry,
    pub gateway: Option<Arc<dyn MessageGateway>>,
}

pub struct Supervisor {
    config: RuntimeConfig,
    store: Arc<dyn MetaStore>,
    engine: Arc<Engine>,
    scheduler: Arc<Scheduler>,
    watcher: Arc<FileWatcher>,
    recovery: Arc<RecoveryController>,
    heartbeat: Arc<HeartbeatRegistry>,
    http_state: AppState,
}

impl Supervisor {
    pub async fn bootstrap(config: RuntimeConfig, deps: RuntimeDeps, info: InfoConfig) -> anyhow::Result<Self> {
        let workspace_root = PathBuf::from(&config.workspace_root);
        tokio::fs::create_dir_all(&workspace_root).await?;

        let store: Arc<dyn MetaStore> = Arc::new(
            SqliteMetaStore::connect(&config.db_path)
                .await?
                .with_pause_threshold(config.consecutive_failure_pause_threshold),
        );

        let heartbeat = HeartbeatRegistry::new();

        let engine = Engine::new(config.default_concurrency);
        engine.set_heartbeat(heartbeat.register("engine"));

        let policy = PolicyConfig {
            default: NotifyPolicy::parse(&config.task_notify_policy),
            success: config.task_notify_success_policy.as_deref().map(NotifyPolicy::parse),
            failure: config.task_notify_failure_policy.as_deref().map(NotifyPolicy::parse),
        };
        let notifier = Arc::new(Notifier::new(
            store.clone(),
            deps.publishers,
            policy,
            workspace_root.clone(),
        ));

        let observer = Arc::new(StoreNotifyObserver::new(
            store.clone(),
            notifier,
            config.max_error_message_len,
        ));
        engine.set_observer(observer);

        let mut executor = WorkerExecutor::new(workspace_root.clone(), (&config.agent_loop).into());
        if let Some(indexer) = deps.indexer.clone() {
            executor = executor.with_indexer(indexer);
        }
        if let Some(responder) = deps.responder {
            executor = executor.with_responder(responder);
        }
        if let Some(tools) = deps.tools {
            executor = executor.with_tools(tools);
        }
        engine.set_executor(Arc::new(executor));

        let scheduler = Arc::new(
            Scheduler::new(
                store.clone(),
                engine.clone(),
                Duration::from_secs(config.scheduler_poll_interval_sec),
            )
            .with_heartbeat(heartbeat.register("scheduler")),
        );

        let watcher = Arc::new(
            FileWatcher::new(
                workspace_root.clone(),
                store.clone(),
                engine.clone(),
                Duration::from_secs(config.watcher_debounce_sec),
            )
            .with_sink(Arc::new(SchedulerEventSink::new(scheduler.clone())))
            .with_heartbeat(heartbeat.register("watcher")),
        );

        let recovery = Arc::new(
            RecoveryController::new(
                store.clone(),
                engine.clone(),
                Duration::from_secs(config.task_recovery_running_stale_sec),
            )
            .with_heartbeat(heartbeat.register("recovery")),
        );

        let mut http_state = AppState::new(store.clone(), engine.clone(), workspace_root.clone(), info)
            .with_heartbeat(heartbeat.clone(), Duration::from_secs(config.heartbeat_stale_sec));
        if let Some(gateway) = deps.gateway {
            http_state = http_state.with_gateway(gateway);
        }

        Ok(Self {
            config,
            store,
            engine,
            scheduler,
            watcher,
            recovery,
            heartbeat,
            http_state,
        })
    }

    /// Runs startup recovery, then every long-lived loop, until `cancel`
    /// fires. Returns once everything has drained.
    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let startup_reporter = self.heartbeat.register("recovery");
        startup_reporter.starting("running startup recovery");
        self.recovery.run_startup_recovery().await;
        startup_reporter.beat("startup recovery complete");
        self.http_state.mark_ready();
        info!("startup recovery complete, accepting traffic");

        let listener = tokio::net::TcpListener::bind(&self.config.http_bind_addr).await?;
        info!(addr = %self.config.http_bind_addr, "http listening");
        let router = agentrt_http::build_router(self.http_state.clone());
        let shutdown_timeout = Duration::from_secs(self.config.http_shutdown_timeout_sec);
        let http_cancel = cancel.clone();
        let http_handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                http_cancel.cancelled().await;
            });
            if let Err(err) = tokio::time::timeout(shutdown_timeout + Duration::from_secs(1), serve).await {
                tracing::warn!(error = %err, "http server did not shut down within timeout");
            }
        });

        let engine_handle = {
            let engine = self.engine.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { engine.start(cancel).await })
        };
        let scheduler_handle = {
            let scheduler = self.scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };
        let watcher_handle = {
            let watcher = self.watcher.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { watcher.run(cancel).await })
        };
        let recovery_handle = {
            let recovery = self.recovery.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { recovery.run(cancel).await })
        };

        let monitor_handle = {
            let registry = self.heartbeat.clone();
            let interval = Duration::from_secs(self.config.heartbeat_interval_sec);
            let stale_after = Duration::from_secs(self.config.heartbeat_stale_sec);
            let sink = Arc::new(LoggingTransitionSink);
            let (monitor_cancel_tx, monitor_cancel_rx) = tokio::sync::oneshot::channel();
            let cancel = cancel.clone();
            tokio::spawn(async move { cancel.cancelled().await; let _ = monitor_cancel_tx.send(()); });
            tokio::spawn(async move {
                Monitor::new(registry, interval, stale_after, sink)
                    .run(monitor_cancel_rx)
                    .await
            })
        };

        let _ = tokio::join!(
            engine_handle,
            scheduler_handle,
            watcher_handle,
            recovery_handle,
            monitor_handle,
            http_handle,
        );

        Ok(())
    }

    pub fn store(&self) -> Arc<dyn MetaStore> {
        self.store.clone()
    }
}

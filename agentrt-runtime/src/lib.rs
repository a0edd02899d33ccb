//! Supervisor: assembles every component crate into one process and drives
//! a shared cancellation group for graceful shutdown (distilled spec §5,
//! §6 exit codes).

pub mod heartbeat_sink;
pub mod observer;
pub mod supervisor;
pub mod watcher_sink;

pub use heartbeat_sink::LoggingTransitionSink;
pub use observer::StoreNotifyObserver;
pub use supervisor::{RuntimeDeps, Supervisor};
pub use watcher_sink::SchedulerEventSink;

use tokio::signal;
use tracing::info;

/// Waits for Ctrl+C or SIGTERM, whichever comes first.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}

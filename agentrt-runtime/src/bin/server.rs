//! Standalone supervisor binary: loads configuration, bootstraps every
//! component, and runs until an operator signal arrives.
//!
//! ```bash
//! AGENTRT_HTTP_BIND_ADDR=0.0.0.0:8080 cargo run --bin agentrt-server
//! ```

use std::env;

use agentrt_http::InfoConfig;
use agentrt_notifier::PublisherRegistry;
use agentrt_runtime::{shutdown_signal, RuntimeDeps, Supervisor};
use agentrt_shared::{logging, RuntimeConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_tracing();

    let config_path = env::var("AGENTRT_CONFIG_FILE").unwrap_or_else(|_| "agentrt.toml".to_string());
    let config = RuntimeConfig::load(Some(&config_path)).map_err(|e| format!("failed to load configuration: {e}"))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.http_bind_addr,
        "starting agent task runtime"
    );

    let deps = RuntimeDeps {
        responder: None,
        tools: None,
        indexer: None,
        publishers: PublisherRegistry::new(),
        gateway: None,
    };
    let info_config = InfoConfig {
        name: "agentrt".to_string(),
        environment: env::var("AGENTRT_ENVIRONMENT").unwrap_or_else(|_| "production".to_string()),
        public_host: env::var("AGENTRT_PUBLIC_HOST").ok(),
        admin_host: env::var("AGENTRT_ADMIN_HOST").ok(),
        mcp_summary: None,
    };

    let supervisor = match Supervisor::bootstrap(config, deps, info_config).await {
        Ok(supervisor) => supervisor,
        Err(err) => {
            error!(error = %err, "failed to bootstrap runtime");
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let run_handle = tokio::spawn(async move {
        if let Err(err) = supervisor.run(run_cancel).await {
            error!(error = %err, "supervisor loop exited with error");
        }
    });

    shutdown_signal().await;
    info!("shutdown signal received, draining");
    cancel.cancel();
    let _ = run_handle.await;

    info!("shutdown complete");
    Ok(())
}

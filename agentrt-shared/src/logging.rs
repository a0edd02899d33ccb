//! Tracing initialization, called once from each binary's `main` before
//! anything else runs.

use tracing_subscriber::{EnvFilter, fmt};

/// Initialize the global tracing subscriber. Honors `RUST_LOG` (defaulting
/// to `info`), and switches to JSON output when `AGENTRT_LOG_FORMAT=json`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_format = std::env::var("AGENTRT_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let subscriber = fmt().with_env_filter(filter);
    if json_format {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}

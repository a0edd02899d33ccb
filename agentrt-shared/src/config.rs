//! Layered runtime configuration: built-in defaults, an optional TOML file,
//! then `AGENTRT_`-prefixed environment variables, mirroring the reference
//! system's `ConfigManager` wrapper around the `config` crate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub workspace_root: String,
    pub db_path: String,
    pub default_concurrency: usize,
    pub task_recovery_running_stale_sec: u64,
    pub task_notify_policy: String,
    pub task_notify_success_policy: Option<String>,
    pub task_notify_failure_policy: Option<String>,
    pub heartbeat_interval_sec: u64,
    pub heartbeat_stale_sec: u64,
    pub scheduler_poll_interval_sec: u64,
    pub watcher_debounce_sec: u64,
    pub http_bind_addr: String,
    pub http_shutdown_timeout_sec: u64,
    pub max_error_message_len: usize,
    /// Named threshold for auto-pausing an objective after repeated
    /// consecutive failures (open question #1, resolved in SPEC_FULL.md).
    pub consecutive_failure_pause_threshold: u32,
    pub agent_loop: AgentLoopLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentLoopLimits {
    pub max_steps: u32,
    pub max_turn_duration_sec: u64,
    pub max_tool_calls_per_turn: u32,
    pub min_final_confidence: f64,
}

impl Default for AgentLoopLimits {
    fn default() -> Self {
        Self {
            max_steps: 20,
            max_turn_duration_sec: 300,
            max_tool_calls_per_turn: 50,
            min_final_confidence: 0.1,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workspace_root: "./workspaces".to_string(),
            db_path: "./agentrt.db".to_string(),
            default_concurrency: 4,
            task_recovery_running_stale_sec: 600,
            task_notify_policy: "both".to_string(),
            task_notify_success_policy: None,
            task_notify_failure_policy: None,
            heartbeat_interval_sec: 10,
            heartbeat_stale_sec: 30,
            scheduler_poll_interval_sec: 15,
            watcher_debounce_sec: 2,
            http_bind_addr: "0.0.0.0:8080".to_string(),
            http_shutdown_timeout_sec: 10,
            max_error_message_len: 4000,
            consecutive_failure_pause_threshold: 5,
            agent_loop: AgentLoopLimits::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load defaults, then an optional file at `path` (if it exists), then
    /// `AGENTRT_`-prefixed environment overrides with `__` as the nesting
    /// separator (e.g. `AGENTRT_AGENT_LOOP__MAX_STEPS`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&RuntimeConfig::default())?);

        if let Some(path) = path {
            if std::path::Path::new(path).exists() {
                builder = builder.add_source(config::File::with_name(path));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("AGENTRT")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.default_concurrency, 4);
        assert_eq!(cfg.agent_loop.max_steps, 20);
        assert_eq!(cfg.task_notify_policy, "both");
    }

    #[test]
    fn load_with_missing_file_falls_back_to_defaults() {
        let cfg = RuntimeConfig::load(Some("/nonexistent/path/agentrt.toml")).unwrap();
        assert_eq!(cfg.default_concurrency, 4);
    }

    #[test]
    #[serial_test::serial]
    fn env_override_applies() {
        std::env::set_var("AGENTRT_DEFAULT_CONCURRENCY", "9");
        let cfg = RuntimeConfig::load(None).unwrap();
        assert_eq!(cfg.default_concurrency, 9);
        std::env::remove_var("AGENTRT_DEFAULT_CONCURRENCY");
    }
}

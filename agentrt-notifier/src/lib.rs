//! Completion notifier: fans task lifecycle outcomes back to the originating
//! channel and/or admin channels under the policy matrix in distilled spec
//! §4.6, and appends an outbound chat log entry for every message actually
//! delivered.

pub mod chatlog;
pub mod policy;
pub mod publisher;

pub use policy::{NotifyPolicy, PolicyConfig};
pub use publisher::{Publisher, PublisherRegistry, WebhookPublisher};

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use agentrt_shared::Task;
use agentrt_store::MetaStore;
use tracing::warn;

const STARTED_MESSAGE: &str = "I ran some tools and I'm still working on this.";
const WHOLE_NOTIFY_TIMEOUT: Duration = Duration::from_secs(12);
const PER_PUBLISH_TIMEOUT: Duration = Duration::from_secs(8);

/// One resolved delivery target: a connector + external id pair, tagged with
/// whether it is an admin context (affects failure-message wording).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Target {
    connector: String,
    external_id: String,
    is_admin: bool,
}

pub struct Notifier {
    store: std::sync::Arc<dyn MetaStore>,
    publishers: PublisherRegistry,
    policy: PolicyConfig,
    workspace_root: PathBuf,
}

impl Notifier {
    pub fn new(
        store: std::sync::Arc<dyn MetaStore>,
        publishers: PublisherRegistry,
        policy: PolicyConfig,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            publishers,
            policy,
            workspace_root: workspace_root.into(),
        }
    }

    /// Fires only for a chat-originated routed task being picked up for the
    /// first time (`route_class` non-empty and `attempts == 1`). Admin
    /// targets are filtered out — only the origin channel sees this message.
    pub async fn notify_started(&self, task: &Task) {
        if !task.is_routed() || task.attempts != 1 {
            return;
        }
        let targets = self
            .resolve_targets(task, self.policy.effective_success())
            .await;
        let origin_only: Vec<Target> = targets.into_iter().filter(|t| !t.is_admin).collect();
        self.dispatch(task, origin_only, STARTED_MESSAGE.to_string())
            .await;
    }

    pub async fn notify_completed(&self, task: &Task, summary: Option<&str>) {
        let targets = self
            .resolve_targets(task, self.policy.effective_success())
            .await;
        for target in targets {
            let message = success_message(task, summary);
            self.dispatch(task, vec![target], message).await;
        }
    }

    /// Routed-task failures are forced to admin-only regardless of the
    /// configured failure policy (distilled spec §4.6).
    pub async fn notify_failed(&self, task: &Task, error_message: &str) {
        let effective_policy = if task.is_routed() {
            NotifyPolicy::Admin
        } else {
            self.policy.effective_failure()
        };
        let targets = self.resolve_targets(task, effective_policy).await;
        for target in targets {
            let Some(message) = failure_message(task, error_message, &target) else {
                continue;
            };
            self.dispatch(task, vec![target], message).await;
        }
    }

    async fn resolve_targets(&self, task: &Task, policy: NotifyPolicy) -> Vec<Target> {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();

        if policy::wants_origin(policy) && !task.is_system_context() && !task.context_id.is_empty()
        {
            if let Some(connector) = task.source.source_connector.clone() {
                let external_id = task
                    .source
                    .source_external_id
                    .clone()
                    .unwrap_or_default();
                if !external_id.is_empty() {
                    let key = format!("{}::{}", connector.to_lowercase(), external_id);
                    if seen.insert(key) {
                        targets.push(Target {
                            connector,
                            external_id,
                            is_admin: false,
                        });
                    }
                }
            } else {
                match self.store.get_context(&task.context_id).await {
                    Ok(ctx) => {
                        if seen.insert(ctx.target_key()) {
                            targets.push(Target {
                                connector: ctx.connector,
                                external_id: ctx.external_id,
                                is_admin: false,
                            });
                        }
                    }
                    Err(err) => {
                        warn!(task_id = %task.id, context_id = %task.context_id, error = %err, "notifier: origin context lookup failed");
                    }
                }
            }
        }

        if policy::wants_admin(policy) {
            match self.store.list_admin_contexts(&task.workspace_id, 50).await {
                Ok(contexts) => {
                    for ctx in contexts {
                        if seen.insert(ctx.target_key()) {
                            targets.push(Target {
                                connector: ctx.connector,
                                external_id: ctx.external_id,
                                is_admin: true,
                            });
                        }
                    }
                }
                Err(err) => {
                    warn!(task_id = %task.id, workspace_id = %task.workspace_id, error = %err, "notifier: admin context lookup failed");
                }
            }
        }

        targets
    }

    async fn dispatch(&self, task: &Task, targets: Vec<Target>, message: String) {
        if targets.is_empty() || message.is_empty() {
            return;
        }
        let _ = tokio::time::timeout(WHOLE_NOTIFY_TIMEOUT, async {
            for target in &targets {
                self.publish_one(task, target, &message).await;
            }
        })
        .await;
    }

    async fn publish_one(&self, task: &Task, target: &Target, message: &str) {
        let Some(publisher) = self.publishers.get(&target.connector) else {
            warn!(connector = %target.connector, "notifier: no publisher registered, skipping target");
            return;
        };

        let result = tokio::time::timeout(
            PER_PUBLISH_TIMEOUT,
            publisher.publish(&target.external_id, message),
        )
        .await;

        match result {
            Ok(Ok(())) => {
                if let Err(err) = chatlog::append(
                    &self.workspace_root,
                    &task.workspace_id,
                    &target.connector,
                    &target.external_id,
                    chatlog::Direction::Outbound,
                    message,
                )
                .await
                {
                    warn!(task_id = %task.id, error = %err, "notifier: failed to append outbound chat log");
                }
            }
            Ok(Err(err)) => {
                warn!(task_id = %task.id, connector = %target.connector, external_id = %target.external_id, error = %err, "notifier: publish failed");
            }
            Err(_) => {
                warn!(task_id = %task.id, connector = %target.connector, external_id = %target.external_id, "notifier: publish timed out");
            }
        }
    }
}

fn success_message(task: &Task, summary: Option<&str>) -> String {
    let summary = summary.unwrap_or_default();
    if task.is_routed() {
        truncate_preserving_breaks(summary, 1400)
    } else {
        let raw = format!("{} ({}): {}", task.title, task.kind.as_str(), summary);
        truncate_single_line(&raw, 1200)
    }
}

fn failure_message(task: &Task, error_message: &str, target: &Target) -> Option<String> {
    if !target.is_admin {
        return None;
    }
    let raw = if let Some(class) = task.routing.route_class.as_deref().filter(|c| !c.is_empty()) {
        format!("Routed {class} follow-up failed (`{}`): {error_message}", task.id)
    } else {
        format!("Task `{}` failed: {error_message}", task.id)
    };
    Some(truncate_single_line(&raw, 1100))
}

fn truncate_preserving_breaks(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        truncated
    }
}

fn truncate_single_line(s: &str, max: usize) -> String {
    let collapsed: String = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max {
        collapsed
    } else {
        let truncated: String = collapsed.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrt_shared::TaskKind;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, external_id: &str, message: &str) -> Result<(), String> {
            self.sent
                .lock()
                .unwrap()
                .push((external_id.to_string(), message.to_string()));
            Ok(())
        }
    }

    async fn store_with_admin(workspace_id: &str, admin_external_id: &str) -> Arc<dyn MetaStore> {
        let store = agentrt_store::SqliteMetaStore::connect_in_memory()
            .await
            .unwrap();
        store
            .ensure_context_for_external_channel(
                "telegram",
                admin_external_id,
                workspace_id,
                "admin-ctx",
                true,
            )
            .await
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn routed_failure_notifies_admin_only_not_origin() {
        let store = store_with_admin("ws1", "500").await;
        let mut registry = PublisherRegistry::new();
        let publisher = Arc::new(RecordingPublisher::default());
        registry.register("telegram", publisher.clone());

        let notifier = Notifier::new(
            store,
            registry,
            PolicyConfig {
                default: NotifyPolicy::Both,
                success: None,
                failure: None,
            },
            tempfile::tempdir().unwrap().path(),
        );

        let mut task = Task::new("ws1", "chan-120", TaskKind::General, "t", "p");
        task.routing.route_class = Some("issue".to_string());
        task.source.source_connector = Some("telegram".to_string());
        task.source.source_external_id = Some("120".to_string());

        notifier.notify_failed(&task, "DeadlineExceeded").await;

        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "500");
        assert!(sent[0].1.contains("issue"));
    }

    #[tokio::test]
    async fn notify_started_only_fires_on_first_attempt_of_routed_task() {
        let store = store_with_admin("ws1", "500").await;
        let mut registry = PublisherRegistry::new();
        let publisher = Arc::new(RecordingPublisher::default());
        registry.register("telegram", publisher.clone());

        let notifier = Notifier::new(
            store,
            registry,
            PolicyConfig {
                default: NotifyPolicy::Both,
                success: None,
                failure: None,
            },
            tempfile::tempdir().unwrap().path(),
        );

        let mut task = Task::new("ws1", "chan-120", TaskKind::General, "t", "p");
        task.routing.route_class = Some("issue".to_string());
        task.source.source_connector = Some("telegram".to_string());
        task.source.source_external_id = Some("120".to_string());
        task.attempts = 1;

        notifier.notify_started(&task).await;
        assert_eq!(publisher.sent.lock().unwrap().len(), 1);
        assert_eq!(publisher.sent.lock().unwrap()[0].0, "120");

        publisher.sent.lock().unwrap().clear();
        task.attempts = 2;
        notifier.notify_started(&task).await;
        assert!(publisher.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn system_context_with_origin_policy_publishes_nothing() {
        let store = store_with_admin("ws1", "500").await;
        let mut registry = PublisherRegistry::new();
        let publisher = Arc::new(RecordingPublisher::default());
        registry.register("telegram", publisher.clone());

        let notifier = Notifier::new(
            store,
            registry,
            PolicyConfig {
                default: NotifyPolicy::Origin,
                success: None,
                failure: None,
            },
            tempfile::tempdir().unwrap().path(),
        );

        let task = Task::new("ws1", "system:filewatcher", TaskKind::ReindexMarkdown, "t", "p");
        notifier.notify_completed(&task, Some("done")).await;
        assert!(publisher.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn success_message_formats_single_line_for_unrouted_task() {
        let task = Task::new("ws", "ctx", TaskKind::General, "Do thing", "p");
        let msg = success_message(&task, Some("all good\nmultiline"));
        assert!(!msg.contains('\n'));
        assert!(msg.starts_with("Do thing (general):"));
    }

    #[test]
    fn success_message_preserves_breaks_for_routed_task() {
        let mut task = Task::new("ws", "ctx", TaskKind::General, "Do thing", "p");
        task.routing.route_class = Some("issue".to_string());
        let msg = success_message(&task, Some("line one\nline two"));
        assert!(msg.contains('\n'));
    }
}

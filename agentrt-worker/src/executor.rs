//! `TaskExecutor` implementation: dispatches on `task.kind` per distilled
//! spec §4.3.

use crate::agent::{self, AgentLoopContext, AgentLoopLimits, Responder, ToolRegistry};
use crate::artifact;
use crate::indexer::Indexer;
use agentrt_engine::{ExecutionResult, TaskExecutor};
use agentrt_shared::{Task, TaskKind};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

const REINDEX_SKIPPED: &str = "qmd indexing skipped: service unavailable";
const CHANGED_FILE_PREFIX: &str = "markdown file changed: ";

pub struct WorkerExecutor {
    workspace_root: PathBuf,
    indexer: Option<Arc<dyn Indexer>>,
    responder: Option<Arc<dyn Responder>>,
    tools: Option<Arc<dyn ToolRegistry>>,
    limits: AgentLoopLimits,
}

impl WorkerExecutor {
    pub fn new(workspace_root: impl Into<PathBuf>, limits: AgentLoopLimits) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            indexer: None,
            responder: None,
            tools: None,
            limits,
        }
    }

    pub fn with_indexer(mut self, indexer: Arc<dyn Indexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    pub fn with_responder(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    async fn execute_reindex(&self, task: &Task) -> Result<ExecutionResult, String> {
        let Some(indexer) = &self.indexer else {
            return Ok(ExecutionResult {
                summary: Some(REINDEX_SKIPPED.to_string()),
                artifact_path: None,
            });
        };

        if task.context_id == "system:filewatcher" {
            return Ok(ExecutionResult {
                summary: Some(format!(
                    "workspace {} reindex already queued by watcher",
                    task.workspace_id
                )),
                artifact_path: None,
            });
        }

        let path = task
            .prompt
            .strip_prefix(CHANGED_FILE_PREFIX)
            .map(|s| s.trim().to_string());

        let result = match &path {
            Some(path) => {
                indexer
                    .queue_workspace_index_for_path(&task.workspace_id, path)
                    .await
            }
            None => Ok(()),
        };

        if result.is_err() || path.is_none() {
            indexer.queue_workspace_index(&task.workspace_id).await?;
        }

        Ok(ExecutionResult {
            summary: Some(format!("workspace {} reindex scheduled", task.workspace_id)),
            artifact_path: None,
        })
    }

    async fn execute_agentic(&self, task: &Task) -> Result<ExecutionResult, String> {
        let responder = self
            .responder
            .as_ref()
            .ok_or_else(|| "no responder configured".to_string())?;
        let tools = self
            .tools
            .as_ref()
            .ok_or_else(|| "no tool registry configured".to_string())?;

        let prompt = if !task.prompt.trim().is_empty() {
            task.prompt.clone()
        } else if !task.title.trim().is_empty() {
            task.title.clone()
        } else {
            return Err("EmptyPrompt".to_string());
        };

        let routed = task.is_routed();
        let ctx = AgentLoopContext {
            connector: task
                .source
                .source_connector
                .clone()
                .unwrap_or_else(|| "orchestrator".to_string()),
            workspace_id: task.workspace_id.clone(),
            context_id: if task.context_id.is_empty() {
                "system:task-worker".to_string()
            } else {
                task.context_id.clone()
            },
            external_id: task
                .source
                .source_external_id
                .clone()
                .unwrap_or_else(|| "system:task-worker".to_string()),
            display_name: task
                .source
                .source_user_id
                .clone()
                .unwrap_or_else(|| "system".to_string()),
            user_id: task
                .source
                .source_user_id
                .clone()
                .unwrap_or_else(|| "system".to_string()),
            allow_sensitive_tools: !routed,
            ground_first_step: true,
            ground_every_step: false,
        };

        let outcome = agent::run(&ctx, &prompt, responder.as_ref(), tools.as_ref(), &self.limits).await;

        let now = Utc::now();
        let relative_path = artifact::write_artifact(
            &self.workspace_root,
            &task.workspace_id,
            &task.id,
            now,
            &prompt,
            &outcome.trace,
            &outcome.final_reply,
        )
        .await
        .map_err(|e| e.to_string())?;

        if let Some(indexer) = &self.indexer {
            let _ = indexer.queue_workspace_index(&task.workspace_id).await;
        }

        Ok(ExecutionResult {
            summary: Some(summarize(task, &outcome.final_reply)),
            artifact_path: Some(relative_path),
        })
    }
}

#[async_trait]
impl TaskExecutor for WorkerExecutor {
    async fn execute(&self, task: &Task) -> Result<ExecutionResult, String> {
        match task.kind {
            TaskKind::ReindexMarkdown => self.execute_reindex(task).await,
            TaskKind::General | TaskKind::Objective => self.execute_agentic(task).await,
        }
    }
}

/// Result summary policy (distilled spec §4.3): routed tasks keep line
/// breaks up to 1400 chars; otherwise collapse to a single line at 180.
fn summarize(task: &Task, reply: &str) -> String {
    if task.is_routed() {
        truncate_chars(reply, 1400)
    } else {
        let collapsed: String = reply.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.chars().count() <= 180 {
            collapsed
        } else {
            let head: String = collapsed.chars().take(177).collect();
            format!("{head}...")
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

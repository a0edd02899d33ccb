//! Adapter routing filesystem-watcher pulses into the scheduler's event
//! path, kept out of `agentrt-watcher` so that crate need not depend on
//! `agentrt-scheduler`.

use std::sync::Arc;

use agentrt_scheduler::Scheduler;
use agentrt_watcher::MarkdownEventSink;
use async_trait::async_trait;

pub struct SchedulerEventSink {
    scheduler: Arc<Scheduler>,
}

impl SchedulerEventSink {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl MarkdownEventSink for SchedulerEventSink {
    async fn handle_markdown_update(&self, workspace_id: &str, changed_path: &str) {
        self.scheduler.handle_markdown_update(workspace_id, changed_path).await;
    }
}

//! Indexer: the out-of-scope full-text indexing service (distilled spec §1),
//! specified here only at its interface. The reindex_markdown dispatch calls
//! through this trait; no concrete implementation ships in this crate.

use async_trait::async_trait;

#[async_trait]
pub trait Indexer: Send + Sync {
    /// Queue a reindex of a single changed path within a workspace.
    async fn queue_workspace_index_for_path(
        &self,
        workspace_id: &str,
        path: &str,
    ) -> Result<(), String>;

    /// Queue a full workspace reindex, used as a fallback when a specific
    /// path isn't available.
    async fn queue_workspace_index(&self, workspace_id: &str) -> Result<(), String>;
}

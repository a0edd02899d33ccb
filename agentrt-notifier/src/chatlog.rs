//! Append-only outbound/inbound chat transcript, one markdown file per
//! `(workspace, connector, external_id)`. No rotation — an ops concern
//! outside this crate (see the SPEC_FULL open-question resolution).

use chrono::Utc;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn tag(self) -> &'static str {
        match self {
            Direction::Inbound => "INBOUND",
            Direction::Outbound => "OUTBOUND",
        }
    }
}

pub fn chat_log_path(
    workspace_root: &std::path::Path,
    workspace_id: &str,
    connector: &str,
    external_id: &str,
) -> PathBuf {
    workspace_root
        .join(workspace_id)
        .join("logs")
        .join("chats")
        .join(connector)
        .join(format!("{external_id}.md"))
}

pub async fn append(
    workspace_root: &std::path::Path,
    workspace_id: &str,
    connector: &str,
    external_id: &str,
    direction: Direction,
    text: &str,
) -> std::io::Result<()> {
    let path = chat_log_path(workspace_root, workspace_id, connector, external_id);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let entry = format!(
        "\n---\n`{}` {}\n\n{}\n",
        direction.tag(),
        Utc::now().to_rfc3339(),
        text
    );

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    file.write_all(entry.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_creates_parent_dirs_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        append(dir.path(), "ws1", "telegram", "120", Direction::Outbound, "hi")
            .await
            .unwrap();
        append(dir.path(), "ws1", "telegram", "120", Direction::Inbound, "bye")
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(chat_log_path(dir.path(), "ws1", "telegram", "120"))
            .await
            .unwrap();
        assert!(contents.contains("`OUTBOUND`"));
        assert!(contents.contains("`INBOUND`"));
        assert!(contents.contains("hi"));
        assert!(contents.contains("bye"));
    }
}

//! Task result markdown artifact, persisted at
//! `<workspace_root>/<workspace_id>/tasks/YYYY/MM/DD/<task_id>.md` (distilled
//! spec §4.3, §6). Directories are created mode `0755`, the file `0644`.

use crate::agent::StepRecord;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Workspace-relative path returned to the caller as `result_path`, and the
/// absolute path actually written to.
pub struct ArtifactPaths {
    pub relative: String,
    pub absolute: PathBuf,
}

pub fn artifact_paths(workspace_root: &Path, workspace_id: &str, task_id: &str, now: DateTime<Utc>) -> ArtifactPaths {
    let relative = format!(
        "tasks/{}/{}/{}/{task_id}.md",
        now.format("%Y"),
        now.format("%m"),
        now.format("%d"),
    );
    let absolute = workspace_root.join(workspace_id).join(&relative);
    ArtifactPaths { relative, absolute }
}

pub async fn write_artifact(
    workspace_root: &Path,
    workspace_id: &str,
    task_id: &str,
    now: DateTime<Utc>,
    prompt: &str,
    trace: &[StepRecord],
    final_reply: &str,
) -> std::io::Result<String> {
    let paths = artifact_paths(workspace_root, workspace_id, task_id, now);
    if let Some(parent) = paths.absolute.parent() {
        tokio::fs::create_dir_all(parent).await?;
        set_dir_mode(parent).await?;
    }

    let markdown = render_markdown(prompt, trace, final_reply);
    tokio::fs::write(&paths.absolute, markdown).await?;
    set_file_mode(&paths.absolute).await?;
    Ok(paths.relative)
}

fn render_markdown(prompt: &str, trace: &[StepRecord], final_reply: &str) -> String {
    let mut out = String::new();
    out.push_str("# Task Result\n\n");
    out.push_str("## Prompt\n\n");
    out.push_str(prompt);
    out.push_str("\n\n");

    if !trace.is_empty() {
        out.push_str("## Execution Trace\n\n");
        for record in trace {
            out.push_str(&format!("### Step {}\n\n", record.step));
            if let Some(name) = &record.tool_name {
                out.push_str(&format!("Tool: `{name}`\n\n"));
            }
            if let Some(args) = &record.tool_args {
                out.push_str(&format!("Arguments:\n```\n{args}\n```\n\n"));
            }
            if let Some(output) = &record.tool_output {
                out.push_str(&format!("Output:\n```\n{output}\n```\n\n"));
            }
            if let Some(error) = &record.tool_error {
                out.push_str(&format!("Error: {error}\n\n"));
            }
        }
    }

    out.push_str("## Final Output\n\n");
    out.push_str(final_reply);
    out.push('\n');
    out
}

#[cfg(unix)]
async fn set_dir_mode(path: &Path) -> std::io::Result<()> {
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn set_dir_mode(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
async fn set_file_mode(path: &Path) -> std::io::Result<()> {
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)).await
}

#[cfg(not(unix))]
async fn set_file_mode(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

// Git version probe
// reason: the installation is a git checkout; `git rev-parse` is the source of truth
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use kilosort_core::port::VersionProbe;

/// Reads the HEAD commit of a git working tree
#[derive(Debug, Clone, Copy, Default)]
pub struct GitVersionProbe;

#[async_trait]
impl VersionProbe for GitVersionProbe {
    async fn revision(&self, dir: &Path) -> Option<String> {
        let output = Command::new("git")
            .arg("rev-parse")
            .arg("HEAD")
            .current_dir(dir)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
                (!commit.is_empty()).then_some(commit)
            }
            Ok(output) => {
                debug!(dir = %dir.display(), exit_code = ?output.status.code(), "Not a git checkout");
                None
            }
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "git not available");
                None
            }
        }
    }
}

//! Database snapshots (export, import and listing).

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::MigrationError;

/// Whole-database export/import capability.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Fail unless the underlying tooling is authenticated.
    async fn check_auth(&self) -> Result<(), MigrationError>;

    /// Export `collections` to `path`.
    async fn export(&self, path: &str, collections: &[&str]) -> Result<(), MigrationError>;

    /// Import a previous export from `path`.
    async fn import(&self, path: &str) -> Result<(), MigrationError>;

    /// List the objects under `path`.
    async fn list(&self, path: &str) -> Result<String, MigrationError>;
}

/// [`SnapshotStore`] backed by the `gcloud` and `gsutil` CLIs.
#[derive(Debug, Clone)]
pub struct GcloudSnapshotStore {
    project_id: String,
}

impl GcloudSnapshotStore {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
        }
    }

    fn project_flag(&self) -> String {
        format!("--project={}", self.project_id)
    }
}

/// Run a command to completion and return its stdout.
async fn run_command(program: &str, args: &[String]) -> Result<String, MigrationError> {
    let command = format!("{} {}", program, args.join(" "));
    debug!(command = %command, "running command");

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| MigrationError::Command {
            command: command.clone(),
            message: e.to_string(),
        })?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        warn!(command = %command, stderr = %stderr, "command failed");
        return Err(MigrationError::Command {
            command,
            message: format!("{} {}", output.status, stderr.trim()),
        });
    }

    // gcloud reports progress on stderr even when it succeeds.
    if !stderr.is_empty() {
        debug!(stderr = %stderr, "command stderr (non-fatal)");
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[async_trait]
impl SnapshotStore for GcloudSnapshotStore {
    async fn check_auth(&self) -> Result<(), MigrationError> {
        let accounts = run_command(
            "gcloud",
            &[
                "auth".into(),
                "list".into(),
                "--filter=status:ACTIVE".into(),
                "--format=value(account)".into(),
            ],
        )
        .await?;

        if accounts.trim().is_empty() {
            return Err(MigrationError::Config(
                "gcloud is not authenticated (run `gcloud auth login`)".into(),
            ));
        }
        Ok(())
    }

    async fn export(&self, path: &str, collections: &[&str]) -> Result<(), MigrationError> {
        info!(path, collections = ?collections, "exporting collections");
        run_command(
            "gcloud",
            &[
                "firestore".into(),
                "export".into(),
                path.into(),
                format!("--collection-ids={}", collections.join(",")),
                self.project_flag(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn import(&self, path: &str) -> Result<(), MigrationError> {
        info!(path, "importing snapshot");
        run_command(
            "gcloud",
            &[
                "firestore".into(),
                "import".into(),
                path.into(),
                self.project_flag(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<String, MigrationError> {
        run_command("gsutil", &["ls".into(), path.into()]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_flag() {
        let store = GcloudSnapshotStore::new("suzumina-click");
        assert_eq!(store.project_flag(), "--project=suzumina-click");
    }

    #[tokio::test]
    async fn test_missing_program_is_a_command_error() {
        let err = run_command("definitely-not-a-real-binary-xyz", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Command { .. }));
    }
}

//! Pre-migration backups.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::MigrationError;
use crate::snapshot::SnapshotStore;
use crate::types::{TargetCollection, file_timestamp};

/// Folder under the bucket that holds migration backups.
pub const BACKUP_PREFIX: &str = "entity-v2-migration";

/// Backup settings.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub project_id: String,
    pub bucket: String,
    pub collections: Vec<TargetCollection>,
    pub dry_run: bool,
    /// Directory the metadata sidecar is written to.
    pub metadata_dir: PathBuf,
}

impl BackupConfig {
    pub fn new(project_id: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            bucket: bucket.into(),
            collections: TargetCollection::ALL.to_vec(),
            dry_run: false,
            metadata_dir: PathBuf::from("."),
        }
    }
}

/// Contents of the `backup-metadata-<timestamp>.json` sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub backup_path: String,
    pub timestamp: DateTime<Utc>,
    pub project_id: String,
    pub collections: Vec<TargetCollection>,
    pub dry_run: bool,
}

/// Result of [`FirestoreBackupService::create_backup`].
#[derive(Debug, Clone, PartialEq)]
pub struct BackupRecord {
    pub metadata: BackupMetadata,
    /// Sidecar location; `None` for dry runs.
    pub metadata_path: Option<PathBuf>,
}

/// Exports the migrated collections before a live run.
pub struct FirestoreBackupService {
    snapshots: Arc<dyn SnapshotStore>,
    config: BackupConfig,
}

impl FirestoreBackupService {
    pub fn new(snapshots: Arc<dyn SnapshotStore>, config: BackupConfig) -> Self {
        Self { snapshots, config }
    }

    /// Storage path for a backup taken at `at`.
    pub fn backup_path(&self, at: DateTime<Utc>) -> String {
        format!(
            "gs://{}/{}/{}",
            self.config.bucket,
            BACKUP_PREFIX,
            file_timestamp(at)
        )
    }

    /// Export the configured collections and record a metadata sidecar.
    ///
    /// A dry run only computes the path.
    #[tracing::instrument(skip(self), fields(dry_run = self.config.dry_run))]
    pub async fn create_backup(&self) -> Result<BackupRecord, MigrationError> {
        let now = Utc::now();
        let metadata = BackupMetadata {
            backup_path: self.backup_path(now),
            timestamp: now,
            project_id: self.config.project_id.clone(),
            collections: self.config.collections.clone(),
            dry_run: self.config.dry_run,
        };

        if self.config.dry_run {
            info!(path = %metadata.backup_path, "dry run: backup not created");
            return Ok(BackupRecord {
                metadata,
                metadata_path: None,
            });
        }

        let names: Vec<&str> = metadata.collections.iter().map(|c| c.as_str()).collect();
        self.snapshots.export(&metadata.backup_path, &names).await?;

        let metadata_path = self
            .config
            .metadata_dir
            .join(format!("backup-metadata-{}.json", file_timestamp(now)));
        tokio::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?).await?;

        info!(
            path = %metadata.backup_path,
            metadata = %metadata_path.display(),
            "backup created"
        );

        Ok(BackupRecord {
            metadata,
            metadata_path: Some(metadata_path),
        })
    }

    /// Check that `backup_path` is visible in storage.
    pub async fn verify_backup(&self, backup_path: &str) -> Result<bool, MigrationError> {
        match self.snapshots.list(backup_path).await {
            Ok(listing) => Ok(listing.contains(backup_path)),
            Err(e) => {
                warn!(path = backup_path, error = %e, "backup listing failed");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct NoopSnapshots;

    #[async_trait::async_trait]
    impl SnapshotStore for NoopSnapshots {
        async fn check_auth(&self) -> Result<(), MigrationError> {
            Ok(())
        }
        async fn export(&self, _: &str, _: &[&str]) -> Result<(), MigrationError> {
            Ok(())
        }
        async fn import(&self, _: &str) -> Result<(), MigrationError> {
            Ok(())
        }
        async fn list(&self, path: &str) -> Result<String, MigrationError> {
            Ok(format!("{}/all_namespaces/\n", path))
        }
    }

    #[test]
    fn test_backup_path_layout() {
        let service = FirestoreBackupService::new(
            Arc::new(NoopSnapshots),
            BackupConfig::new("p", "suzumina-click-backup"),
        );
        let at = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
        assert_eq!(
            service.backup_path(at),
            "gs://suzumina-click-backup/entity-v2-migration/2025-07-01T12-00-00-000Z"
        );
    }

    #[tokio::test]
    async fn test_sidecar_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let config = BackupConfig {
            metadata_dir: dir.path().to_path_buf(),
            ..BackupConfig::new("p", "bucket")
        };
        let service = FirestoreBackupService::new(Arc::new(NoopSnapshots), config);

        let record = service.create_backup().await.unwrap();
        let path = record.metadata_path.unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

        assert_eq!(json["backupPath"], record.metadata.backup_path.as_str());
        assert_eq!(json["projectId"], "p");
        assert_eq!(json["collections"], serde_json::json!(["videos", "audioButtons"]));
        assert_eq!(json["dryRun"], false);
        assert!(service.verify_backup(&record.metadata.backup_path).await.unwrap());
    }
}

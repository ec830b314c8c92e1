//! Undoing a migration.
//!
//! Either strips the marker from every migrated document, or restores a
//! whole-database backup taken before the run.

use std::sync::Arc;
use std::time::Duration;

use suzumina_firestore::{Document, DocumentStore, Query, WriteOp};
use tracing::{info, warn};

use crate::MigrationError;
use crate::snapshot::SnapshotStore;
use crate::types::{DEFAULT_BATCH_SIZE, MIGRATION_FIELD, TargetCollection, is_marked};

/// Pause before a restore starts, giving the operator a chance to abort.
pub const DEFAULT_SAFETY_DELAY: Duration = Duration::from_secs(5);

/// How to undo the migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackMode {
    /// Delete the marker field from every migrated document.
    StripMarker,
    /// Import a backup over the database.
    RestoreBackup { backup_path: String },
}

/// Rollback settings.
#[derive(Debug, Clone)]
pub struct RollbackConfig {
    pub mode: RollbackMode,
    pub collections: Vec<TargetCollection>,
    pub batch_size: usize,
    pub dry_run: bool,
    pub safety_delay: Duration,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            mode: RollbackMode::StripMarker,
            collections: TargetCollection::ALL.to_vec(),
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run: false,
            safety_delay: DEFAULT_SAFETY_DELAY,
        }
    }
}

/// Counters for a marker-strip rollback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackStats {
    /// Marked documents found.
    pub total: usize,
    /// Documents whose marker was removed (or would be, in a dry run).
    pub processed: usize,
    /// Documents in chunks whose commit failed.
    pub failed: usize,
}

pub struct MigrationRollbackService {
    store: Arc<dyn DocumentStore>,
    snapshots: Arc<dyn SnapshotStore>,
    config: RollbackConfig,
}

impl MigrationRollbackService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        snapshots: Arc<dyn SnapshotStore>,
        config: RollbackConfig,
    ) -> Self {
        Self {
            store,
            snapshots,
            config,
        }
    }

    /// Run the configured rollback.
    ///
    /// In strip mode every chunk is attempted even after a failure; the call
    /// then fails if any chunk could not be committed.
    #[tracing::instrument(skip(self), fields(dry_run = self.config.dry_run))]
    pub async fn rollback(&self) -> Result<RollbackStats, MigrationError> {
        match &self.config.mode {
            RollbackMode::StripMarker => self.strip_markers().await,
            RollbackMode::RestoreBackup { backup_path } => {
                self.restore(backup_path).await?;
                Ok(RollbackStats::default())
            }
        }
    }

    async fn marked_documents(&self, collection: TargetCollection) -> Result<Vec<Document>, MigrationError> {
        let docs = self
            .store
            .query(collection.as_str(), &Query::not_null(MIGRATION_FIELD))
            .await?;
        Ok(docs.into_iter().filter(|d| is_marked(&d.fields)).collect())
    }

    async fn strip_markers(&self) -> Result<RollbackStats, MigrationError> {
        if self.config.batch_size == 0 {
            return Err(MigrationError::Config("batch size must be at least 1".into()));
        }

        let mut stats = RollbackStats::default();

        for &collection in &self.config.collections {
            let docs = self.marked_documents(collection).await?;
            info!(collection = %collection, count = docs.len(), "found migrated documents");
            stats.total += docs.len();

            for chunk in docs.chunks(self.config.batch_size) {
                if self.config.dry_run {
                    for doc in chunk {
                        info!(collection = %collection, id = %doc.id, "dry run: would remove marker");
                    }
                    stats.processed += chunk.len();
                    continue;
                }

                let writes = chunk
                    .iter()
                    .map(|doc| WriteOp::DeleteField {
                        collection: collection.as_str().to_string(),
                        id: doc.id.clone(),
                        field: MIGRATION_FIELD.to_string(),
                    })
                    .collect();

                match self.store.commit(writes).await {
                    Ok(()) => stats.processed += chunk.len(),
                    Err(e) => {
                        warn!(collection = %collection, size = chunk.len(), error = %e, "rollback chunk failed");
                        stats.failed += chunk.len();
                    }
                }
            }
        }

        info!(
            total = stats.total,
            processed = stats.processed,
            failed = stats.failed,
            "marker rollback finished"
        );

        if stats.failed > 0 {
            return Err(MigrationError::Rollback {
                failed: stats.failed,
                total: stats.total,
            });
        }
        Ok(stats)
    }

    async fn restore(&self, backup_path: &str) -> Result<(), MigrationError> {
        if self.config.dry_run {
            info!(path = backup_path, "dry run: would restore backup");
            return Ok(());
        }

        warn!(
            path = backup_path,
            delay_secs = self.config.safety_delay.as_secs(),
            "restoring backup over the database; interrupt now to abort"
        );
        tokio::time::sleep(self.config.safety_delay).await;

        self.snapshots.import(backup_path).await?;
        info!(path = backup_path, "backup restored");
        Ok(())
    }

    /// Whether no document in the configured collections still carries a marker.
    pub async fn verify(&self) -> Result<bool, MigrationError> {
        let mut clean = true;
        for &collection in &self.config.collections {
            let remaining = self.marked_documents(collection).await?.len();
            if remaining > 0 {
                warn!(collection = %collection, remaining, "documents still carry the marker");
                clean = false;
            }
        }
        Ok(clean)
    }
}

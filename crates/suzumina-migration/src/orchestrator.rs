//! Collection scanning and marker writing.
//!
//! Each selected collection is read in pages ordered by document name. The
//! documents of a page are transformed concurrently, the markers of every
//! migrated document are committed as one atomic batch, and the outcomes are
//! folded into the run's report. Pages and collections run strictly one
//! after the other.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use suzumina_firestore::{Document, DocumentStore, Query, WriteOp};
use tracing::{debug, error, info};

use crate::MigrationError;
use crate::report::{DryRunEntry, DryRunReportGenerator};
use crate::transform::transform_document;
use crate::types::{MigrationOptions, MigrationOutcome, MigrationReport, TargetCollection};

/// Drives the V2 migration over a document store.
#[derive(Clone)]
pub struct EntityMigrator {
    store: Arc<dyn DocumentStore>,
}

impl EntityMigrator {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Run the migration and return its report.
    pub async fn migrate(&self, options: &MigrationOptions) -> Result<MigrationReport, MigrationError> {
        let mut report = MigrationReport::new(options.dry_run);
        self.migrate_into(options, &mut report).await?;
        Ok(report)
    }

    /// Run the migration, folding outcomes into a caller-owned report.
    ///
    /// On error the report keeps every page processed before the failure.
    pub async fn migrate_into(
        &self,
        options: &MigrationOptions,
        report: &mut MigrationReport,
    ) -> Result<(), MigrationError> {
        self.run(options, report, None).await
    }

    /// Run the migration and also log one dry-run entry per document.
    pub async fn migrate_recording(
        &self,
        options: &MigrationOptions,
        entries: &mut DryRunReportGenerator,
    ) -> Result<MigrationReport, MigrationError> {
        let mut report = MigrationReport::new(options.dry_run);
        self.run(options, &mut report, Some(entries)).await?;
        Ok(report)
    }

    #[tracing::instrument(skip(self, report, entries), fields(dry_run = options.dry_run))]
    async fn run(
        &self,
        options: &MigrationOptions,
        report: &mut MigrationReport,
        mut entries: Option<&mut DryRunReportGenerator>,
    ) -> Result<(), MigrationError> {
        if options.batch_size == 0 {
            return Err(MigrationError::Config("batch size must be at least 1".into()));
        }

        info!(
            batch_size = options.batch_size,
            max_documents = ?options.limit(),
            collections = ?options.collections,
            "entity V2 migration started"
        );

        for collection in TargetCollection::ALL {
            if !options.includes(collection) {
                continue;
            }
            if let Err(e) = self
                .migrate_collection(collection, options, report, entries.as_deref_mut())
                .await
            {
                error!(collection = %collection, error = %e, "migration failed");
                return Err(e);
            }
        }

        report.end_time = Utc::now();
        info!(
            failed = report.total_failed(),
            "entity V2 migration completed"
        );
        Ok(())
    }

    async fn migrate_collection(
        &self,
        collection: TargetCollection,
        options: &MigrationOptions,
        report: &mut MigrationReport,
        mut entries: Option<&mut DryRunReportGenerator>,
    ) -> Result<(), MigrationError> {
        info!(collection = %collection, "starting collection migration");

        let limit = options.limit();
        let mut cursor: Option<String> = None;
        let mut processed = 0usize;

        loop {
            let page_size = match limit {
                Some(max) => options.batch_size.min(max - processed),
                None => options.batch_size,
            };

            let query = Query::page(page_size).start_after(cursor.clone());
            let docs = self.store.query(collection.as_str(), &query).await?;
            if docs.is_empty() {
                break;
            }

            let outcomes = transform_page(collection, &docs, options.dry_run).await;

            if !options.dry_run {
                let writes: Vec<WriteOp> = docs
                    .iter()
                    .zip(&outcomes)
                    .filter_map(|(doc, outcome)| match outcome {
                        MigrationOutcome::Migrated { data } => Some(WriteOp::Merge {
                            collection: collection.as_str().to_string(),
                            id: doc.id.clone(),
                            fields: data.clone(),
                        }),
                        _ => None,
                    })
                    .collect();

                if !writes.is_empty() {
                    let count = writes.len();
                    self.store.commit(writes).await?;
                    debug!(collection = %collection, writes = count, "committed marker batch");
                }
            }

            let stats = report.stats_mut(collection);
            for (doc, outcome) in docs.iter().zip(&outcomes) {
                stats.record(outcome);
                if let Some(log) = entries.as_deref_mut() {
                    log.add_entry(DryRunEntry::from_outcome(collection, doc.id.clone(), outcome));
                }
            }

            processed += docs.len();
            info!(
                collection = %collection,
                processed,
                migrated = stats.migrated,
                failed = stats.failed,
                skipped = stats.skipped,
                "processed page"
            );

            if limit.is_some_and(|max| processed >= max) {
                break;
            }

            cursor = docs.last().map(|d| d.id.clone());
        }

        Ok(())
    }
}

/// Transform every document of a page concurrently.
///
/// A transform that panics is reported as a failed document instead of
/// aborting the page.
async fn transform_page(
    collection: TargetCollection,
    docs: &[Document],
    dry_run: bool,
) -> Vec<MigrationOutcome> {
    let now = Utc::now();
    let handles = docs.iter().cloned().map(|doc| {
        tokio::spawn(async move { transform_document(collection, &doc, dry_run, now) })
    });

    join_all(handles)
        .await
        .into_iter()
        .map(|joined| {
            joined.unwrap_or_else(|e| {
                let message = if e.is_panic() {
                    "transform panicked".to_string()
                } else {
                    e.to_string()
                };
                MigrationOutcome::failed(message)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use suzumina_firestore::{FieldValue, MemoryStore, RawRecord};

    fn video(title: &str) -> RawRecord {
        let mut record = RawRecord::new();
        record.insert("title".into(), FieldValue::from(title));
        record
    }

    async fn store_with_videos(n: usize) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for i in 0..n {
            store.insert("videos", &format!("v{i:02}"), video("T")).await;
        }
        store
    }

    fn options(dry_run: bool, batch_size: usize) -> MigrationOptions {
        MigrationOptions {
            dry_run,
            batch_size,
            collections: vec![TargetCollection::Videos],
            max_documents: None,
        }
    }

    #[tokio::test]
    async fn test_empty_store() {
        let migrator = EntityMigrator::new(Arc::new(MemoryStore::new()));
        let report = migrator
            .migrate(&MigrationOptions::default())
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.collections.videos.total, 0);
        assert_eq!(report.collections.audio_buttons.total, 0);
        assert!(report.end_time >= report.start_time);
    }

    #[tokio::test]
    async fn test_short_page_is_followed_by_empty_page() {
        let store = store_with_videos(3).await;
        let migrator = EntityMigrator::new(store.clone());

        let report = migrator.migrate(&options(false, 10)).await.unwrap();

        assert_eq!(report.collections.videos.migrated, 3);
        // One short page plus the empty page that ends the scan.
        assert_eq!(store.query_count(), 2);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_pages_are_committed_separately() {
        let store = store_with_videos(5).await;
        let migrator = EntityMigrator::new(store.clone());

        let report = migrator.migrate(&options(false, 2)).await.unwrap();

        assert_eq!(report.collections.videos.migrated, 5);
        assert_eq!(store.commit_count(), 3);
        assert_eq!(store.query_count(), 4);
    }

    #[tokio::test]
    async fn test_page_of_skips_commits_nothing() {
        let store = store_with_videos(2).await;
        let migrator = EntityMigrator::new(store.clone());
        migrator.migrate(&options(false, 10)).await.unwrap();
        let commits = store.commit_count();

        let report = migrator.migrate(&options(false, 10)).await.unwrap();
        assert_eq!(report.collections.videos.skipped, 2);
        assert_eq!(store.commit_count(), commits);
    }

    #[tokio::test]
    async fn test_commit_failure_aborts_run() {
        let store = store_with_videos(4).await;
        let migrator = EntityMigrator::new(store.clone());
        store.fail_next_commits(1);

        let mut report = MigrationReport::new(false);
        let err = migrator
            .migrate_into(&options(false, 2), &mut report)
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::Store(_)));
        // Outcomes are folded in only after the page's batch commits.
        assert_eq!(report.collections.videos.total, 0);
        assert!(!store.get("videos", "v00").await.unwrap().contains_key("_v2Migration"));
        assert_eq!(store.query_count(), 1);
    }

    #[tokio::test]
    async fn test_query_failure_propagates() {
        let store = store_with_videos(1).await;
        let migrator = EntityMigrator::new(store.clone());
        store.fail_next_queries(1);

        let err = migrator.migrate(&options(true, 10)).await.unwrap_err();
        assert!(matches!(err, MigrationError::Store(_)));
    }

    #[tokio::test]
    async fn test_limit_smaller_than_batch_caps_page() {
        let store = store_with_videos(4).await;
        let migrator = EntityMigrator::new(store.clone());

        let report = migrator
            .migrate(&MigrationOptions {
                max_documents: Some(3),
                ..options(true, 2)
            })
            .await
            .unwrap();

        assert_eq!(report.collections.videos.total, 3);
        assert_eq!(store.query_count(), 2);
    }

    #[tokio::test]
    async fn test_zero_batch_size_is_rejected() {
        let migrator = EntityMigrator::new(Arc::new(MemoryStore::new()));
        let err = migrator.migrate(&options(true, 0)).await.unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));
    }

    #[tokio::test]
    async fn test_recording_feeds_entry_log() {
        let store = store_with_videos(2).await;
        store.insert("videos", "v99", RawRecord::new()).await;
        let migrator = EntityMigrator::new(store);

        let mut log = DryRunReportGenerator::new();
        let report = migrator.migrate_recording(&options(true, 10), &mut log).await.unwrap();

        assert_eq!(report.collections.videos.total, 3);
        assert_eq!(log.entries().len(), 3);
        assert_eq!(log.entries()[2].document_id, "v99");
        assert_eq!(log.entries()[2].reason.as_deref(), Some("Document has no data"));
    }
}

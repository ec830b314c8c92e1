//! Post-migration spot checks.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use suzumina_firestore::{Document, DocumentStore, Query};
use tracing::{info, warn};

use crate::MigrationError;
use crate::transform::validate_document;
use crate::types::{MIGRATION_FIELD, MIGRATION_VERSION, MigrationMarker, TargetCollection};

/// Documents sampled per collection by default.
pub const DEFAULT_SAMPLE_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct ValidationOptions {
    pub collections: Vec<TargetCollection>,
    pub sample_size: usize,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            collections: TargetCollection::ALL.to_vec(),
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

/// Result of checking one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionValidation {
    pub collection: TargetCollection,
    pub sampled: usize,
    pub passed: usize,
    pub issues: Vec<String>,
}

impl CollectionValidation {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Result of a validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub collections: Vec<CollectionValidation>,
    pub all_valid: bool,
}

/// Samples migrated collections and checks the markers landed.
pub struct MigrationValidationService {
    store: Arc<dyn DocumentStore>,
}

impl MigrationValidationService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self))]
    pub async fn validate(&self, options: &ValidationOptions) -> Result<ValidationSummary, MigrationError> {
        let mut collections = Vec::with_capacity(options.collections.len());

        for &collection in &options.collections {
            let docs = self
                .store
                .query(collection.as_str(), &Query::page(options.sample_size))
                .await?;

            let mut result = CollectionValidation {
                collection,
                sampled: docs.len(),
                passed: 0,
                issues: Vec::new(),
            };
            for doc in &docs {
                match check_document(collection, doc) {
                    Ok(()) => result.passed += 1,
                    Err(issue) => result.issues.push(format!("{}/{}: {}", collection, doc.id, issue)),
                }
            }

            if result.is_valid() {
                info!(collection = %collection, sampled = result.sampled, "collection validated");
            } else {
                warn!(
                    collection = %collection,
                    issues = result.issues.len(),
                    "collection failed validation"
                );
            }
            collections.push(result);
        }

        let all_valid = collections.iter().all(CollectionValidation::is_valid);
        Ok(ValidationSummary {
            collections,
            all_valid,
        })
    }
}

fn check_document(collection: TargetCollection, doc: &Document) -> Result<(), String> {
    let marker = doc
        .get(MIGRATION_FIELD)
        .filter(|v| v.is_truthy())
        .ok_or_else(|| "missing migration marker".to_string())?;

    let marker = MigrationMarker::from_field_value(marker)
        .ok_or_else(|| "malformed migration marker".to_string())?;
    if marker.version != MIGRATION_VERSION {
        return Err(format!("unexpected marker version {}", marker.version));
    }
    if marker.dry_run {
        return Err("marker was written by a dry run".to_string());
    }

    validate_document(collection, doc, Utc::now()).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use suzumina_firestore::{FieldValue, MemoryStore, RawRecord};

    fn video(marker: Option<MigrationMarker>) -> RawRecord {
        let mut record = marker.map(MigrationMarker::into_record).unwrap_or_default();
        record.insert("title".into(), FieldValue::from("T"));
        record
    }

    fn videos_only() -> ValidationOptions {
        ValidationOptions {
            collections: vec![TargetCollection::Videos],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_all_marked_is_valid() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..3 {
            store
                .insert("videos", &format!("v{i}"), video(Some(MigrationMarker::now(false))))
                .await;
        }

        let summary = MigrationValidationService::new(store)
            .validate(&videos_only())
            .await
            .unwrap();

        assert!(summary.all_valid);
        assert_eq!(summary.collections[0].sampled, 3);
        assert_eq!(summary.collections[0].passed, 3);
    }

    #[tokio::test]
    async fn test_unmarked_document_fails() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("videos", "a", video(Some(MigrationMarker::now(false))))
            .await;
        store.insert("videos", "b", video(None)).await;

        let summary = MigrationValidationService::new(store)
            .validate(&videos_only())
            .await
            .unwrap();

        assert!(!summary.all_valid);
        assert_eq!(summary.collections[0].issues, vec!["videos/b: missing migration marker"]);
    }

    #[tokio::test]
    async fn test_dry_run_marker_fails() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("videos", "a", video(Some(MigrationMarker::now(true))))
            .await;

        let summary = MigrationValidationService::new(store)
            .validate(&videos_only())
            .await
            .unwrap();
        assert!(!summary.all_valid);
    }

    #[tokio::test]
    async fn test_sample_is_bounded() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..25 {
            store
                .insert("videos", &format!("v{i:02}"), video(Some(MigrationMarker::now(false))))
                .await;
        }
        // Outside the sample.
        store.insert("videos", "z", video(None)).await;

        let summary = MigrationValidationService::new(store)
            .validate(&videos_only())
            .await
            .unwrap();
        assert_eq!(summary.collections[0].sampled, DEFAULT_SAMPLE_SIZE);
        assert!(summary.all_valid);
    }
}

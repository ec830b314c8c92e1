//! Per-document transformation.
//!
//! Pure apart from the clock value passed in: decides whether a document is
//! already migrated, validates it against the V2 entity rules, and returns
//! the marker to write.

use chrono::{DateTime, Utc};
use suzumina_firestore::Document;

use crate::entity::{AudioButtonV2, ValidationError, VideoV2};
use crate::types::{MigrationMarker, MigrationOutcome, TargetCollection, is_marked};

/// Reason reported for documents that already carry a marker.
pub const ALREADY_MIGRATED: &str = "Already migrated";

/// Error reported for documents with an empty body.
pub const NO_DATA: &str = "Document has no data";

/// Validate a document of `collection` as the matching V2 entity.
pub fn validate_document(
    collection: TargetCollection,
    doc: &Document,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    match collection {
        TargetCollection::Videos => VideoV2::from_record(&doc.id, &doc.fields, now).map(|_| ()),
        TargetCollection::AudioButtons => {
            AudioButtonV2::from_record(&doc.id, &doc.fields, now).map(|_| ())
        }
    }
}

/// Decide the outcome for one document.
pub fn transform_document(
    collection: TargetCollection,
    doc: &Document,
    dry_run: bool,
    now: DateTime<Utc>,
) -> MigrationOutcome {
    let Some(data) = doc.data() else {
        return MigrationOutcome::failed(NO_DATA);
    };

    if is_marked(data) {
        return MigrationOutcome::skipped(ALREADY_MIGRATED);
    }

    if let Err(e) = validate_document(collection, doc, now) {
        return MigrationOutcome::failed(format!("Failed to create V2 entity: {}", e));
    }

    let marker = MigrationMarker {
        migrated_at: now,
        ..MigrationMarker::now(dry_run)
    };
    MigrationOutcome::Migrated {
        data: marker.into_record(),
    }
}

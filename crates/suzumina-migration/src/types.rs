//! Migration engine types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use suzumina_firestore::{FieldValue, RawRecord};

/// Field that carries the migration marker on every migrated document.
pub const MIGRATION_FIELD: &str = "_v2Migration";

/// Schema version written into the marker.
pub const MIGRATION_VERSION: &str = "2.0.0";

/// Default page size for collection scans.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Largest page size a single atomic write batch can hold.
pub const MAX_BATCH_SIZE: usize = 500;

/// Timestamp for output file names: ISO 8601 with `:` and `.` replaced by `-`.
pub fn file_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// One of the two collections the migration knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TargetCollection {
    #[serde(rename = "videos")]
    Videos,
    #[serde(rename = "audioButtons")]
    AudioButtons,
}

impl TargetCollection {
    /// Both collections, in processing order.
    pub const ALL: [TargetCollection; 2] = [TargetCollection::Videos, TargetCollection::AudioButtons];

    /// Firestore collection name.
    pub fn as_str(self) -> &'static str {
        match self {
            TargetCollection::Videos => "videos",
            TargetCollection::AudioButtons => "audioButtons",
        }
    }

    /// Human-readable label for reports.
    pub fn label(self) -> &'static str {
        match self {
            TargetCollection::Videos => "Videos",
            TargetCollection::AudioButtons => "Audio Buttons",
        }
    }
}

impl fmt::Display for TargetCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetCollection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "videos" => Ok(TargetCollection::Videos),
            "audioButtons" => Ok(TargetCollection::AudioButtons),
            other => Err(format!(
                "unknown collection '{}' (expected videos or audioButtons)",
                other
            )),
        }
    }
}

/// The `_v2Migration` marker written into migrated documents.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationMarker {
    pub migrated_at: DateTime<Utc>,
    pub version: String,
    pub dry_run: bool,
}

impl MigrationMarker {
    /// A marker for the current schema version, stamped now.
    pub fn now(dry_run: bool) -> Self {
        Self {
            migrated_at: Utc::now(),
            version: MIGRATION_VERSION.to_string(),
            dry_run,
        }
    }

    /// Encode as a Firestore map value.
    pub fn to_field_value(&self) -> FieldValue {
        let mut map = RawRecord::new();
        map.insert("migratedAt".into(), FieldValue::Timestamp(self.migrated_at));
        map.insert("version".into(), FieldValue::String(self.version.clone()));
        map.insert("dryRun".into(), FieldValue::Bool(self.dry_run));
        FieldValue::Map(map)
    }

    /// Decode a marker map. Returns `None` for anything that is not a map with a version.
    pub fn from_field_value(value: &FieldValue) -> Option<Self> {
        let map = value.as_map()?;
        let version = map.get("version")?.as_str()?.to_string();
        Some(Self {
            migrated_at: map
                .get("migratedAt")
                .and_then(FieldValue::as_timestamp)
                .unwrap_or(DateTime::UNIX_EPOCH),
            version,
            dry_run: map.get("dryRun").and_then(FieldValue::as_bool).unwrap_or(false),
        })
    }

    /// The fields to merge into a document to mark it migrated.
    pub fn into_record(self) -> RawRecord {
        let mut record = RawRecord::new();
        record.insert(MIGRATION_FIELD.to_string(), self.to_field_value());
        record
    }
}

/// Whether a raw document already carries a truthy marker.
pub fn is_marked(record: &RawRecord) -> bool {
    record.get(MIGRATION_FIELD).is_some_and(FieldValue::is_truthy)
}

/// Terminal outcome of transforming one document.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationOutcome {
    /// The document is valid; `data` holds the fields to merge-write.
    Migrated { data: RawRecord },
    /// The document was left alone.
    Skipped { reason: String },
    /// The document could not be migrated.
    Failed { error: String },
}

impl MigrationOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        MigrationOutcome::Failed {
            error: error.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        MigrationOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_migrated(&self) -> bool {
        matches!(self, MigrationOutcome::Migrated { .. })
    }
}

/// Running counters for one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub total: usize,
    pub migrated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl CollectionStats {
    /// Fold one document outcome into the counters.
    pub fn record(&mut self, outcome: &MigrationOutcome) {
        self.total += 1;
        match outcome {
            MigrationOutcome::Migrated { .. } => self.migrated += 1,
            MigrationOutcome::Skipped { .. } => self.skipped += 1,
            MigrationOutcome::Failed { error } => {
                self.failed += 1;
                self.errors.push(error.clone());
            }
        }
    }
}

/// Per-collection statistics keyed the way the report files expect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionReports {
    pub videos: CollectionStats,
    #[serde(rename = "audioButtons")]
    pub audio_buttons: CollectionStats,
}

/// Outcome of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub dry_run: bool,
    pub collections: CollectionReports,
}

impl MigrationReport {
    /// A fresh report with `start_time == end_time == now`.
    pub fn new(dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            start_time: now,
            end_time: now,
            dry_run,
            collections: CollectionReports::default(),
        }
    }

    pub fn stats(&self, collection: TargetCollection) -> &CollectionStats {
        match collection {
            TargetCollection::Videos => &self.collections.videos,
            TargetCollection::AudioButtons => &self.collections.audio_buttons,
        }
    }

    pub fn stats_mut(&mut self, collection: TargetCollection) -> &mut CollectionStats {
        match collection {
            TargetCollection::Videos => &mut self.collections.videos,
            TargetCollection::AudioButtons => &mut self.collections.audio_buttons,
        }
    }

    /// Failed documents across both collections.
    pub fn total_failed(&self) -> usize {
        self.collections.videos.failed + self.collections.audio_buttons.failed
    }

    /// Whether any document failed.
    pub fn has_errors(&self) -> bool {
        self.total_failed() > 0
    }
}

/// Options for one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOptions {
    pub dry_run: bool,
    pub batch_size: usize,
    pub collections: Vec<TargetCollection>,
    /// Stop after this many documents per collection. `None` or `Some(0)` means no limit.
    pub max_documents: Option<usize>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            batch_size: DEFAULT_BATCH_SIZE,
            collections: TargetCollection::ALL.to_vec(),
            max_documents: None,
        }
    }
}

impl MigrationOptions {
    /// Whether `collection` is selected for this run.
    pub fn includes(&self, collection: TargetCollection) -> bool {
        self.collections.contains(&collection)
    }

    /// The effective document limit, if any.
    pub fn limit(&self) -> Option<usize> {
        self.max_documents.filter(|&n| n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_collection_names_round_trip() {
        for collection in TargetCollection::ALL {
            assert_eq!(collection.as_str().parse::<TargetCollection>(), Ok(collection));
        }
        assert!("users".parse::<TargetCollection>().is_err());
    }

    #[test]
    fn test_marker_encoding() {
        let marker = MigrationMarker::now(true);
        let decoded = MigrationMarker::from_field_value(&marker.to_field_value()).unwrap();
        assert_eq!(decoded, marker);
        assert_eq!(decoded.version, "2.0.0");
    }

    #[test]
    fn test_is_marked_uses_truthiness() {
        let mut record = RawRecord::new();
        assert!(!is_marked(&record));

        record.insert(MIGRATION_FIELD.into(), FieldValue::Bool(false));
        assert!(!is_marked(&record));

        record.insert(MIGRATION_FIELD.into(), FieldValue::Null);
        assert!(!is_marked(&record));

        record.insert(MIGRATION_FIELD.into(), MigrationMarker::now(false).to_field_value());
        assert!(is_marked(&record));
    }

    #[test]
    fn test_report_serializes_with_camel_case_keys() {
        let report = MigrationReport::new(false);
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("startTime").is_some());
        assert!(json.get("dryRun").is_some());
        assert!(json["collections"].get("audioButtons").is_some());
    }

    #[test]
    fn test_file_timestamp() {
        let at = DateTime::parse_from_rfc3339("2025-07-01T12:34:56.789Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(file_timestamp(at), "2025-07-01T12-34-56-789Z");
    }

    #[test]
    fn test_zero_max_documents_means_unlimited() {
        let options = MigrationOptions {
            max_documents: Some(0),
            ..Default::default()
        };
        assert_eq!(options.limit(), None);
    }

    fn outcome_strategy() -> impl Strategy<Value = MigrationOutcome> {
        prop_oneof![
            Just(MigrationOutcome::Migrated {
                data: RawRecord::new()
            }),
            "[a-z ]{0,12}".prop_map(MigrationOutcome::skipped),
            "[a-z ]{1,12}".prop_map(MigrationOutcome::failed),
        ]
    }

    proptest! {
        #[test]
        fn counters_are_conserved(outcomes in prop::collection::vec(outcome_strategy(), 0..200)) {
            let mut stats = CollectionStats::default();
            for outcome in &outcomes {
                stats.record(outcome);
            }
            prop_assert_eq!(stats.total, outcomes.len());
            prop_assert_eq!(stats.total, stats.migrated + stats.skipped + stats.failed);
            prop_assert_eq!(stats.errors.len(), stats.failed);
        }
    }
}

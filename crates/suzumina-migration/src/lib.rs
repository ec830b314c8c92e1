//! Entity V2 migration engine for suzumina.click.
//!
//! This crate migrates the `videos` and `audioButtons` collections to the V2
//! entity model:
//! - Validates every legacy document against the V2 entity rules
//! - Marks valid documents with a `_v2Migration` marker, page by page
//! - Produces dry-run reports with recommendations
//! - Backs up, validates and rolls back around a live run

mod backup;
mod config;
mod entity;
mod error;
mod executor;
mod orchestrator;
mod report;
mod rollback;
mod snapshot;
mod transform;
mod types;
mod validate;

pub use backup::{BACKUP_PREFIX, BackupConfig, BackupMetadata, BackupRecord, FirestoreBackupService};
pub use config::{
    DEFAULT_BACKUP_BUCKET, DEFAULT_PROJECT_ID, DEFAULT_WARNING_DELAY, EnvSnapshot, ExecutorConfig,
    REQUIRED_ENV_VARS,
};
pub use entity::{AudioButtonV2, ValidationError, VideoV2, default_thumbnail_url, normalize_tags};
pub use error::MigrationError;
pub use executor::{
    CollectionResult, MAX_ACCEPTABLE_ERROR_RATE, MigrationPlan, Phase, PhaseOutcome,
    ProductionMigrationExecutor,
};
pub use orchestrator::EntityMigrator;
pub use report::{
    ALL_CLEAR, DryRunEntry, DryRunReport, DryRunReportGenerator, DryRunStatus,
    format_console_report, format_duration, generate_recommendations, render_text,
};
pub use rollback::{
    DEFAULT_SAFETY_DELAY, MigrationRollbackService, RollbackConfig, RollbackMode, RollbackStats,
};
pub use snapshot::{GcloudSnapshotStore, SnapshotStore};
pub use transform::{ALREADY_MIGRATED, NO_DATA, transform_document, validate_document};
pub use types::{
    CollectionReports, CollectionStats, DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE, MIGRATION_FIELD,
    MIGRATION_VERSION, MigrationMarker, MigrationOptions, MigrationOutcome, MigrationReport,
    TargetCollection, file_timestamp, is_marked,
};
pub use validate::{
    CollectionValidation, DEFAULT_SAMPLE_SIZE, MigrationValidationService, ValidationOptions,
    ValidationSummary,
};

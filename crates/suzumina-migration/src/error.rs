//! Error types for the migration engine.

use std::path::PathBuf;

use suzumina_firestore::StoreError;
use thiserror::Error;

/// Errors that abort a migration phase.
///
/// Per-document problems are never reported through this type; they become
/// failed outcomes in the run's statistics.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Document store error (fetch or commit).
    #[error("document store error: {0}")]
    Store(#[from] StoreError),

    /// Local file I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An external command could not be run or exited non-zero.
    #[error("command `{command}` failed: {message}")]
    Command { command: String, message: String },

    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required file does not exist.
    #[error("file not found: {}", .0.display())]
    MissingFile(PathBuf),

    /// A freshly written backup could not be found in storage.
    #[error("backup verification failed for {0}")]
    BackupVerification(String),

    /// One or more rollback chunks could not be committed.
    #[error("rollback failed: {failed} of {total} documents could not be updated")]
    Rollback { failed: usize, total: usize },
}

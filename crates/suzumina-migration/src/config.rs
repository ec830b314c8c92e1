//! Executor configuration and environment checks.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::MigrationError;
use crate::rollback::DEFAULT_SAFETY_DELAY;
use crate::types::DEFAULT_BATCH_SIZE;

pub const DEFAULT_PROJECT_ID: &str = "suzumina-click";
pub const DEFAULT_BACKUP_BUCKET: &str = "suzumina-click-backup";

/// Variables the `prepare` phase requires.
pub const REQUIRED_ENV_VARS: [&str; 2] = ["GOOGLE_CLOUD_PROJECT", "GOOGLE_APPLICATION_CREDENTIALS"];

/// Pause before a live migration that was not preceded by a dry run.
pub const DEFAULT_WARNING_DELAY: Duration = Duration::from_secs(5);

/// Settings shared by every executor phase.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub project_id: String,
    pub backup_bucket: String,
    /// Directory for reports, results and backup metadata.
    pub output_dir: PathBuf,
    pub batch_size: usize,
    pub warning_delay: Duration,
    pub safety_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            project_id: DEFAULT_PROJECT_ID.to_string(),
            backup_bucket: DEFAULT_BACKUP_BUCKET.to_string(),
            output_dir: PathBuf::from("."),
            batch_size: DEFAULT_BATCH_SIZE,
            warning_delay: DEFAULT_WARNING_DELAY,
            safety_delay: DEFAULT_SAFETY_DELAY,
        }
    }
}

/// The environment variables the executor cares about, captured once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Read the required variables from the process environment.
    pub fn capture() -> Self {
        let vars = REQUIRED_ENV_VARS
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|v| (name.to_string(), v)))
            .collect();
        Self { vars }
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.insert(name.to_string(), value.into());
        self
    }

    /// A variable's value; empty values count as unset.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Fail unless every required variable is set and the credentials file exists.
    pub fn check(&self) -> Result<(), MigrationError> {
        let missing: Vec<&str> = REQUIRED_ENV_VARS
            .iter()
            .copied()
            .filter(|name| self.get(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(MigrationError::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        if let Some(credentials) = self.get("GOOGLE_APPLICATION_CREDENTIALS")
            && !Path::new(credentials).is_file()
        {
            return Err(MigrationError::MissingFile(PathBuf::from(credentials)));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_vars_are_listed() {
        let err = EnvSnapshot::default().check().unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: missing required environment variables: GOOGLE_CLOUD_PROJECT, GOOGLE_APPLICATION_CREDENTIALS"
        );
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let env = EnvSnapshot::default()
            .with("GOOGLE_CLOUD_PROJECT", "")
            .with("GOOGLE_APPLICATION_CREDENTIALS", "/tmp/x.json");
        assert!(matches!(env.check(), Err(MigrationError::Config(_))));
    }

    #[test]
    fn test_credentials_file_must_exist() {
        let env = EnvSnapshot::default()
            .with("GOOGLE_CLOUD_PROJECT", "p")
            .with("GOOGLE_APPLICATION_CREDENTIALS", "/nonexistent/creds.json");
        assert!(matches!(env.check(), Err(MigrationError::MissingFile(_))));

        let file = tempfile::NamedTempFile::new().unwrap();
        let env = env.with(
            "GOOGLE_APPLICATION_CREDENTIALS",
            file.path().to_string_lossy(),
        );
        assert!(env.check().is_ok());
    }
}

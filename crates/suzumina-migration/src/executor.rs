//! Operator-facing migration phases.
//!
//! Each phase is an independent entry point; the operator runs them in
//! order (`prepare`, `dry-run`, `backup`, `migrate`, `validate`) and reaches
//! for `rollback` when something went wrong. Nothing is persisted between
//! phases except the files they write.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use suzumina_firestore::DocumentStore;
use tracing::{info, warn};

use crate::MigrationError;
use crate::backup::{BackupConfig, BackupRecord, FirestoreBackupService};
use crate::config::{EnvSnapshot, ExecutorConfig};
use crate::orchestrator::EntityMigrator;
use crate::report::{DryRunReportGenerator, render_text};
use crate::rollback::{MigrationRollbackService, RollbackConfig, RollbackMode};
use crate::snapshot::SnapshotStore;
use crate::types::{CollectionStats, MigrationOptions, TargetCollection, file_timestamp};
use crate::validate::{MigrationValidationService, ValidationOptions, ValidationSummary};

/// Dry-run error rate (percent) above which the operator is warned.
pub const MAX_ACCEPTABLE_ERROR_RATE: f64 = 1.0;

/// A migration phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    DryRun,
    Backup,
    Migrate,
    Validate,
    Rollback,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Prepare,
        Phase::DryRun,
        Phase::Backup,
        Phase::Migrate,
        Phase::Validate,
        Phase::Rollback,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::DryRun => "dry-run",
            Phase::Backup => "backup",
            Phase::Migrate => "migrate",
            Phase::Validate => "validate",
            Phase::Rollback => "rollback",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown phase '{}' (expected one of: prepare, dry-run, backup, migrate, validate, rollback)",
                    s
                )
            })
    }
}

/// What the operator asked for.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub phase: Phase,
    pub collections: Vec<TargetCollection>,
    pub max_documents: Option<usize>,
    pub skip_backup: bool,
    pub skip_dry_run: bool,
    /// Backup to restore during `rollback`; without it the markers are stripped.
    pub backup_path: Option<String>,
}

impl MigrationPlan {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            collections: TargetCollection::ALL.to_vec(),
            max_documents: None,
            skip_backup: false,
            skip_dry_run: false,
            backup_path: None,
        }
    }
}

/// One entry of `migration-results-<timestamp>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionResult {
    pub collection: TargetCollection,
    pub stats: CollectionStats,
}

/// What a phase produced.
#[derive(Debug, Clone)]
pub enum PhaseOutcome {
    Prepared,
    DryRun { report_path: PathBuf, error_rate: f64 },
    /// `None` when the backup was skipped.
    Backup(Option<BackupRecord>),
    Migrated {
        results_path: PathBuf,
        results: Vec<CollectionResult>,
    },
    Validated(ValidationSummary),
    RolledBack { verified: bool },
}

/// Runs migration phases against one database.
pub struct ProductionMigrationExecutor {
    store: Arc<dyn DocumentStore>,
    snapshots: Arc<dyn SnapshotStore>,
    config: ExecutorConfig,
    env: EnvSnapshot,
}

impl ProductionMigrationExecutor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        snapshots: Arc<dyn SnapshotStore>,
        config: ExecutorConfig,
        env: EnvSnapshot,
    ) -> Self {
        Self {
            store,
            snapshots,
            config,
            env,
        }
    }

    /// Run one phase.
    #[tracing::instrument(skip(self, plan), fields(phase = %plan.phase))]
    pub async fn execute(&self, plan: &MigrationPlan) -> Result<PhaseOutcome, MigrationError> {
        println!("🚀 Entity V2 production migration");
        println!("📍 Phase:   {}", plan.phase);
        println!("📍 Project: {}", self.config.project_id);

        let result = match plan.phase {
            Phase::Prepare => self.prepare().await,
            Phase::DryRun => self.dry_run(plan).await,
            Phase::Backup => self.backup(plan).await,
            Phase::Migrate => self.migrate(plan).await,
            Phase::Validate => self.validate(plan).await,
            Phase::Rollback => self.rollback(plan).await,
        };

        if let Err(e) = &result {
            eprintln!("❌ Phase {} failed: {}", plan.phase, e);
        }
        result
    }

    fn banner(title: &str) {
        println!("\n{}", title);
        println!("{}", "=".repeat(50));
    }

    async fn prepare(&self) -> Result<PhaseOutcome, MigrationError> {
        Self::banner("📋 Prepare");

        println!("1️⃣  Checking environment variables");
        self.env.check()?;

        println!("2️⃣  Checking gcloud authentication");
        self.snapshots.check_auth().await?;
        println!("✅ gcloud authenticated");

        println!("3️⃣  Checking backup bucket");
        let bucket = format!("gs://{}", self.config.backup_bucket);
        match self.snapshots.list(&bucket).await {
            Ok(_) => println!("✅ Backup bucket reachable"),
            Err(e) => {
                warn!(bucket = %bucket, error = %e, "backup bucket not reachable");
                println!("⚠️  Cannot access bucket {}", bucket);
            }
        }

        println!("\n✅ Ready");
        Ok(PhaseOutcome::Prepared)
    }

    fn migrator(&self) -> EntityMigrator {
        EntityMigrator::new(self.store.clone())
    }

    async fn dry_run(&self, plan: &MigrationPlan) -> Result<PhaseOutcome, MigrationError> {
        Self::banner("🔍 Dry run");

        let report_path = self
            .config
            .output_dir
            .join(format!("dry-run-report-{}.txt", file_timestamp(Utc::now())));
        println!("📊 Report: {}", report_path.display());

        let options = MigrationOptions {
            dry_run: true,
            batch_size: self.config.batch_size,
            collections: plan.collections.clone(),
            max_documents: plan.max_documents,
        };
        let mut generator = DryRunReportGenerator::new();
        let summary = self.migrator().migrate_recording(&options, &mut generator).await?;

        let report = generator.generate_report(&summary);
        tokio::fs::write(&report_path, render_text(&report)).await?;

        let (failed, total) = plan.collections.iter().fold((0, 0), |(f, t), &c| {
            let stats = summary.stats(c);
            (f + stats.failed, t + stats.total)
        });
        let error_rate = if total > 0 {
            failed as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        println!("\n✅ Dry run complete");
        println!("📄 Detailed report: {}", report_path.display());
        println!("\n📊 Error rate: {:.2}%", error_rate);
        if error_rate > MAX_ACCEPTABLE_ERROR_RATE {
            warn!(error_rate, "dry-run error rate above threshold");
            println!("⚠️  Error rate is above 1%. Resolve the failures before migrating.");
        }

        Ok(PhaseOutcome::DryRun {
            report_path,
            error_rate,
        })
    }

    async fn backup(&self, plan: &MigrationPlan) -> Result<PhaseOutcome, MigrationError> {
        if plan.skip_backup {
            println!("⚠️  Skipping backup");
            return Ok(PhaseOutcome::Backup(None));
        }

        Self::banner("💾 Backup");

        let service = FirestoreBackupService::new(
            self.snapshots.clone(),
            BackupConfig {
                collections: plan.collections.clone(),
                metadata_dir: self.config.output_dir.clone(),
                ..BackupConfig::new(&self.config.project_id, &self.config.backup_bucket)
            },
        );

        let record = service.create_backup().await?;
        if !service.verify_backup(&record.metadata.backup_path).await? {
            return Err(MigrationError::BackupVerification(
                record.metadata.backup_path.clone(),
            ));
        }

        println!("📦 Backup path: {}", record.metadata.backup_path);
        println!("\n✅ Backup complete");
        Ok(PhaseOutcome::Backup(Some(record)))
    }

    async fn migrate(&self, plan: &MigrationPlan) -> Result<PhaseOutcome, MigrationError> {
        Self::banner("🔄 Migrate");

        if !plan.skip_dry_run {
            println!("⚠️  Running a dry run first is recommended");
            println!(
                "Continuing in {} seconds...",
                self.config.warning_delay.as_secs()
            );
            tokio::time::sleep(self.config.warning_delay).await;
        }

        let migrator = self.migrator();
        let mut results = Vec::with_capacity(plan.collections.len());

        for &collection in &plan.collections {
            println!("\n📂 Migrating {}...", collection);
            let report = migrator
                .migrate(&MigrationOptions {
                    dry_run: false,
                    batch_size: self.config.batch_size,
                    collections: vec![collection],
                    max_documents: plan.max_documents,
                })
                .await?;

            let stats = report.stats(collection).clone();
            println!("✅ {} done", collection);
            println!("   Migrated: {}", stats.migrated);
            println!("   Skipped:  {}", stats.skipped);
            println!("   Failed:   {}", stats.failed);
            results.push(CollectionResult { collection, stats });
        }

        let results_path = self
            .config
            .output_dir
            .join(format!("migration-results-{}.json", file_timestamp(Utc::now())));
        tokio::fs::write(&results_path, serde_json::to_string_pretty(&results)?).await?;
        info!(path = %results_path.display(), "wrote migration results");

        println!("\n✅ Migration complete");
        println!("📄 Results: {}", results_path.display());

        Ok(PhaseOutcome::Migrated {
            results_path,
            results,
        })
    }

    async fn validate(&self, plan: &MigrationPlan) -> Result<PhaseOutcome, MigrationError> {
        Self::banner("✔️  Validate");

        let summary = MigrationValidationService::new(self.store.clone())
            .validate(&ValidationOptions {
                collections: plan.collections.clone(),
                ..Default::default()
            })
            .await?;

        for result in &summary.collections {
            println!(
                "{}: {}/{} sampled documents passed",
                result.collection, result.passed, result.sampled
            );
            for issue in &result.issues {
                println!("   - {}", issue);
            }
        }

        println!("\n✅ Validation complete");
        if summary.all_valid {
            println!("🎉 All checks passed");
        } else {
            eprintln!("❌ Some checks failed");
        }

        Ok(PhaseOutcome::Validated(summary))
    }

    async fn rollback(&self, plan: &MigrationPlan) -> Result<PhaseOutcome, MigrationError> {
        Self::banner("⏪ Rollback");

        let mode = match &plan.backup_path {
            Some(path) => RollbackMode::RestoreBackup {
                backup_path: path.clone(),
            },
            None => RollbackMode::StripMarker,
        };

        let service = MigrationRollbackService::new(
            self.store.clone(),
            self.snapshots.clone(),
            RollbackConfig {
                mode,
                collections: plan.collections.clone(),
                batch_size: self.config.batch_size,
                dry_run: false,
                safety_delay: self.config.safety_delay,
            },
        );

        service.rollback().await?;
        let verified = service.verify().await?;

        if verified {
            println!("\n✅ Rollback complete");
        } else {
            eprintln!("\n❌ Rollback verification failed");
        }
        Ok(PhaseOutcome::RolledBack { verified })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_names() {
        for phase in Phase::ALL {
            assert_eq!(phase.as_str().parse::<Phase>(), Ok(phase));
        }
        assert!("deploy".parse::<Phase>().is_err());
    }

    #[test]
    fn test_plan_defaults() {
        let plan = MigrationPlan::new(Phase::Migrate);
        assert_eq!(plan.collections, TargetCollection::ALL.to_vec());
        assert!(!plan.skip_dry_run);
        assert!(plan.backup_path.is_none());
    }
}

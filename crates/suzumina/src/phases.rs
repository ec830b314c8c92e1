//! The `execute-migration`, `rollback-v2-migration` and `backup-firestore` commands.

use std::path::PathBuf;
use std::sync::Arc;

use miette::Result;
use suzumina_migration::{
    BackupConfig, EnvSnapshot, ExecutorConfig, FirestoreBackupService, GcloudSnapshotStore,
    MigrationPlan, MigrationRollbackService, Phase, ProductionMigrationExecutor, RollbackConfig,
    RollbackMode, TargetCollection,
};

use crate::GlobalArgs;

pub struct PhaseArgs {
    pub phase: Phase,
    pub max_documents: Option<usize>,
    pub skip_backup: bool,
    pub skip_dry_run: bool,
    pub backup_path: Option<String>,
    pub output_dir: PathBuf,
}

/// Run one production migration phase.
pub async fn execute(global: &GlobalArgs, args: PhaseArgs) -> Result<()> {
    let executor = ProductionMigrationExecutor::new(
        global.firestore(),
        Arc::new(GcloudSnapshotStore::new(&global.project)),
        ExecutorConfig {
            project_id: global.project.clone(),
            backup_bucket: global.backup_bucket.clone(),
            output_dir: args.output_dir,
            ..Default::default()
        },
        EnvSnapshot::capture(),
    );

    let plan = MigrationPlan {
        max_documents: args.max_documents,
        skip_backup: args.skip_backup,
        skip_dry_run: args.skip_dry_run,
        backup_path: args.backup_path,
        ..MigrationPlan::new(args.phase)
    };

    executor
        .execute(&plan)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    println!("\n✨ Done");
    Ok(())
}

/// Strip markers, or restore `backup_path` when given.
pub async fn rollback(
    global: &GlobalArgs,
    dry_run: bool,
    backup_path: Option<String>,
    batch_size: usize,
) -> Result<()> {
    let mode = match backup_path {
        Some(backup_path) => RollbackMode::RestoreBackup { backup_path },
        None => RollbackMode::StripMarker,
    };
    println!(
        "⏪ Entity V2 rollback ({}{})",
        match mode {
            RollbackMode::StripMarker => "remove markers",
            RollbackMode::RestoreBackup { .. } => "restore backup",
        },
        if dry_run { ", dry run" } else { "" }
    );

    let service = MigrationRollbackService::new(
        global.firestore(),
        Arc::new(GcloudSnapshotStore::new(&global.project)),
        RollbackConfig {
            mode,
            batch_size,
            dry_run,
            ..Default::default()
        },
    );

    let stats = service
        .rollback()
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    println!(
        "Total: {}  Processed: {}  Failed: {}",
        stats.total, stats.processed, stats.failed
    );

    if dry_run {
        return Ok(());
    }

    let verified = service
        .verify()
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    if verified {
        println!("✅ No migrated documents remain");
    } else {
        eprintln!("❌ Some documents still carry the migration marker");
    }
    Ok(())
}

/// Export the migrated collections.
pub async fn backup(global: &GlobalArgs, dry_run: bool) -> Result<()> {
    let service = FirestoreBackupService::new(
        Arc::new(GcloudSnapshotStore::new(&global.project)),
        BackupConfig {
            collections: TargetCollection::ALL.to_vec(),
            dry_run,
            ..BackupConfig::new(&global.project, &global.backup_bucket)
        },
    );

    let record = service
        .create_backup()
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    println!("📦 Backup path: {}", record.metadata.backup_path);

    if dry_run {
        println!("🔍 Dry run: nothing was exported");
        return Ok(());
    }

    if let Some(path) = &record.metadata_path {
        println!("📄 Metadata: {}", path.display());
    }

    let verified = service
        .verify_backup(&record.metadata.backup_path)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    if !verified {
        return Err(miette::miette!(
            "backup verification failed for {}",
            record.metadata.backup_path
        ));
    }

    println!("✅ Backup verified");
    Ok(())
}

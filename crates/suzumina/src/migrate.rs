//! The `migrate-v2` command.

use std::path::PathBuf;
use std::sync::Arc;

use miette::Result;
use suzumina_firestore::DocumentStore;
use suzumina_migration::{
    DryRunReportGenerator, EntityMigrator, MigrationOptions, TargetCollection,
    format_console_report,
};
use tracing::info;

pub struct MigrateArgs {
    pub dry_run: bool,
    pub collections: Vec<TargetCollection>,
    pub batch_size: usize,
    pub max_documents: Option<usize>,
    pub output: Option<PathBuf>,
}

/// Run the migration once, print the console report and optionally save the
/// detailed report. Fails when any document failed.
pub async fn run(store: Arc<dyn DocumentStore>, args: MigrateArgs) -> Result<()> {
    let options = MigrationOptions {
        dry_run: args.dry_run,
        batch_size: args.batch_size,
        collections: args.collections,
        max_documents: args.max_documents,
    };

    println!(
        "{} Entity V2 migration ({})",
        if options.dry_run { "🔍" } else { "🚀" },
        if options.dry_run { "dry run" } else { "live" }
    );

    info!(
        dry_run = options.dry_run,
        batch_size = options.batch_size,
        "starting migrate-v2"
    );
    let mut generator = DryRunReportGenerator::new();
    let report = EntityMigrator::new(store)
        .migrate_recording(&options, &mut generator)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    println!("\n{}", format_console_report(&report));

    if let Some(path) = &args.output {
        let detailed = generator.generate_report(&report);
        DryRunReportGenerator::save_report(&detailed, path)
            .await
            .map_err(|e| miette::miette!("failed to write report: {}", e))?;
        println!("📄 Detailed report: {}", path.display());
    }

    if report.has_errors() {
        return Err(miette::miette!(
            "{} documents failed validation",
            report.total_failed()
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use suzumina_firestore::{FieldValue, MemoryStore, RawRecord};

    fn args(dry_run: bool, output: Option<PathBuf>) -> MigrateArgs {
        MigrateArgs {
            dry_run,
            collections: TargetCollection::ALL.to_vec(),
            batch_size: 100,
            max_documents: None,
            output,
        }
    }

    #[tokio::test]
    async fn test_clean_run_succeeds_and_writes_report() {
        let store = Arc::new(MemoryStore::new());
        let mut video = RawRecord::new();
        video.insert("title".into(), FieldValue::from("T"));
        store.insert("videos", "v1", video).await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        run(store.clone(), args(true, Some(path.clone()))).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Migration looks good. No issues detected."));
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_documents_fail_the_command() {
        let store = Arc::new(MemoryStore::new());
        store.insert("videos", "empty", RawRecord::new()).await;

        assert!(run(store, args(false, None)).await.is_err());
    }
}

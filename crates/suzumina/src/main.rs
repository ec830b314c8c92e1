//! suzumina: Entity V2 migration tooling
//!
//! Main binary with subcommands:
//! - `migrate-v2`: Run the migration once (dry run by default)
//! - `execute-migration`: Run one production migration phase
//! - `rollback-v2-migration`: Strip markers or restore a backup
//! - `backup-firestore`: Export the migrated collections

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::Result;
use suzumina_firestore::{FirestoreClient, TokenSource};
use suzumina_migration::{
    DEFAULT_BACKUP_BUCKET, DEFAULT_PROJECT_ID, Phase, TargetCollection,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod migrate;
mod phases;

/// Parse a page size within the atomic batch limit.
fn parse_batch_size(s: &str) -> Result<usize, String> {
    let n: usize = s
        .parse()
        .map_err(|_| format!("invalid batch size '{}'", s))?;
    if (1..=suzumina_migration::MAX_BATCH_SIZE).contains(&n) {
        Ok(n)
    } else {
        Err(format!(
            "batch size must be between 1 and {}",
            suzumina_migration::MAX_BATCH_SIZE
        ))
    }
}

#[derive(Parser)]
#[command(name = "suzumina")]
#[command(about = "Entity V2 migration tooling for suzumina.click", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Connection settings shared by every command.
#[derive(Args, Debug, Clone)]
struct GlobalArgs {
    /// Google Cloud project ID
    #[arg(long, global = true, env = "GOOGLE_CLOUD_PROJECT", default_value = DEFAULT_PROJECT_ID)]
    project: String,

    /// Cloud Storage bucket for backups
    #[arg(long, global = true, env = "BACKUP_BUCKET", default_value = DEFAULT_BACKUP_BUCKET)]
    backup_bucket: String,

    /// Firestore emulator host (host:port); disables authentication
    #[arg(long, global = true, env = "FIRESTORE_EMULATOR_HOST")]
    emulator_host: Option<String>,

    /// Bearer token for the Firestore API (otherwise taken from gcloud)
    #[arg(long, global = true, env = "FIRESTORE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,
}

impl GlobalArgs {
    /// Build the Firestore client these settings describe.
    fn firestore(&self) -> Arc<FirestoreClient> {
        let client = match (&self.emulator_host, &self.access_token) {
            (Some(host), _) => FirestoreClient::emulator(host, &self.project),
            (None, Some(token)) => {
                FirestoreClient::production(&self.project, TokenSource::Static(token.clone()))
            }
            (None, None) => FirestoreClient::production(&self.project, TokenSource::Gcloud),
        };
        Arc::new(client)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate videos and audio buttons to Entity V2 (dry run unless --no-dry-run)
    MigrateV2 {
        /// Write migration markers instead of only reporting
        #[arg(long)]
        no_dry_run: bool,

        /// Collections to migrate (comma-separated: videos,audioButtons)
        #[arg(long, value_delimiter = ',', default_value = "videos,audioButtons")]
        collections: Vec<TargetCollection>,

        /// Documents per page and per write batch
        #[arg(long, default_value = "100", value_parser = parse_batch_size)]
        batch_size: usize,

        /// Stop after this many documents per collection
        #[arg(long)]
        max_documents: Option<usize>,

        /// Write a detailed text report to this path
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run one phase of the production migration
    ExecuteMigration {
        /// Phase: prepare, dry-run, backup, migrate, validate, rollback
        #[arg(value_name = "PHASE")]
        phase: Phase,

        /// Stop after this many documents per collection
        #[arg(long)]
        max_documents: Option<usize>,

        /// Skip the backup phase
        #[arg(long)]
        skip_backup: bool,

        /// Skip the pre-migration warning delay
        #[arg(long)]
        skip_dry_run: bool,

        /// Backup to restore in the rollback phase
        #[arg(long)]
        backup_path: Option<String>,

        /// Directory for reports and result files
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Undo the migration
    RollbackV2Migration {
        /// Only report what would change
        #[arg(long)]
        dry_run: bool,

        /// Restore a backup instead of removing markers
        #[arg(long, requires = "backup_path")]
        restore_backup: bool,

        /// Backup to restore (gs://...)
        #[arg(long)]
        backup_path: Option<String>,

        /// Documents per write batch
        #[arg(long, default_value = "100", value_parser = parse_batch_size)]
        batch_size: usize,
    },

    /// Export the migrated collections to Cloud Storage
    BackupFirestore {
        /// Only compute the backup path
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "suzumina=info,suzumina_migration=info,suzumina_firestore=info".to_string()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateV2 {
            no_dry_run,
            collections,
            batch_size,
            max_documents,
            output,
        } => {
            migrate::run(
                cli.global.firestore(),
                migrate::MigrateArgs {
                    dry_run: !no_dry_run,
                    collections,
                    batch_size,
                    max_documents,
                    output,
                },
            )
            .await
        }

        Commands::ExecuteMigration {
            phase,
            max_documents,
            skip_backup,
            skip_dry_run,
            backup_path,
            output_dir,
        } => {
            phases::execute(
                &cli.global,
                phases::PhaseArgs {
                    phase,
                    max_documents,
                    skip_backup,
                    skip_dry_run,
                    backup_path,
                    output_dir,
                },
            )
            .await
        }

        Commands::RollbackV2Migration {
            dry_run,
            restore_backup,
            backup_path,
            batch_size,
        } => {
            let backup_path = if restore_backup { backup_path } else { None };
            phases::rollback(&cli.global, dry_run, backup_path, batch_size).await
        }

        Commands::BackupFirestore { dry_run } => phases::backup(&cli.global, dry_run).await,
    }
}

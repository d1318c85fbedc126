use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use db_infra::config::db::{database_url, migrations_dir, MigrateSettings};
use db_infra::{orchestrate_migration, DbInfraError};
use migration::render::{render, SchemaDocument};
use migration::{scaffold, MigrationCommand, MigrationOutcome, MigrationStore, RunOptions};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "migration=info,db_infra=info,migrate=info,sqlx=warn";

#[derive(Parser)]
#[command(name = "migrate")]
#[command(about = "Concept-analysis database migration tool")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Database URL (falls back to DATABASE_URL, then the built-in default)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Migration directory (falls back to MIGRATIONS_DIR, then ./migrations)
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending migrations (default)
    Up {
        /// List pending migrations without applying them
        #[arg(long)]
        dry_run: bool,

        /// Apply pending migrations older than the newest applied one
        #[arg(long)]
        allow_out_of_order: bool,
    },
    /// Show applied, pending and drifted migrations
    Status,
    /// Fail if any applied migration's file has changed
    Verify,
    /// Create the next numbered, empty migration file
    New {
        /// Short description, used in the file name
        description: String,
    },
    /// Render a TOML schema document into the next migration file
    Render {
        /// Path to the schema document
        schema: PathBuf,

        /// Description for the file name (defaults to the document title)
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .without_time()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_env_filter(filter)
        .init();

    // Usage errors exit with status 2
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("❌ Migration failed: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), DbInfraError> {
    let settings = MigrateSettings::from_env()
        .with_database_url(&database_url(args.database_url.as_deref()))
        .with_migrations_dir(migrations_dir(args.dir.as_deref()));

    match args.command.unwrap_or(Command::Up {
        dry_run: false,
        allow_out_of_order: false,
    }) {
        Command::Up {
            dry_run,
            allow_out_of_order,
        } => {
            let settings = MigrateSettings {
                run: RunOptions {
                    dry_run,
                    allow_out_of_order,
                },
                ..settings
            };
            up(&settings).await
        }
        Command::Status => status(&settings, MigrationCommand::Status).await,
        Command::Verify => status(&settings, MigrationCommand::Verify).await,
        Command::New { description } => {
            let units = MigrationStore::new(&settings.migrations_dir).load()?;
            scaffold::create(&settings.migrations_dir, &units, &description, "")?;
            Ok(())
        }
        Command::Render { schema, name } => {
            let doc = SchemaDocument::load(&schema)?;
            let sql = render(&doc)?;
            let description = render_description(name.as_deref(), doc.title.as_deref(), &schema);

            let units = MigrationStore::new(&settings.migrations_dir).load()?;
            scaffold::create(&settings.migrations_dir, &units, &description, &sql)?;
            Ok(())
        }
    }
}

async fn up(settings: &MigrateSettings) -> Result<(), DbInfraError> {
    let token = cancel_on_ctrl_c();

    let Some(outcome) = orchestrate_migration(settings, MigrationCommand::Up, token).await? else {
        return Ok(());
    };

    if let MigrationOutcome::Ran(report) = outcome {
        if settings.run.dry_run {
            info!("{} pending migration(s)", report.pending.len());
        } else if report.applied.is_empty() {
            info!("✅ Database is up to date");
        } else {
            info!(
                "✅ All migrations applied ({} new, {} already applied)",
                report.applied.len(),
                report.skipped.len()
            );
        }
    }
    Ok(())
}

async fn status(settings: &MigrateSettings, command: MigrationCommand) -> Result<(), DbInfraError> {
    let outcome = orchestrate_migration(settings, command, CancellationToken::new()).await?;

    if let Some(MigrationOutcome::Status(plan)) = outcome {
        let drifted = plan.drifted().len();
        info!(
            "{} applied, {} pending, {} drifted, {} missing",
            plan.applied_count() - drifted,
            plan.pending_count(),
            drifted,
            plan.missing.len()
        );
        if command == MigrationCommand::Verify {
            info!("✅ Checksums verified");
        }
    }
    Ok(())
}

/// Explicit `--name`, else the document title, else the schema file stem.
fn render_description(name: Option<&str>, title: Option<&str>, schema: &Path) -> String {
    name.or(title)
        .map(str::to_string)
        .or_else(|| {
            schema
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "schema".to_string())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            child.cancel();
        }
    });
    token
}

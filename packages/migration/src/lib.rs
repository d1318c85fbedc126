//! File-based SQL migrations with an applied-migrations ledger.

pub mod error;
pub mod ledger;
pub mod render;
pub mod runner;
pub mod scaffold;
pub mod store;
pub mod unit;

pub use error::MigrationError;
pub use ledger::{AppliedMigration, Plan, PlanEntry, UnitStatus};
pub use runner::{RunOptions, RunReport, RunState, Runner};
pub use sea_orm::{ConnectionTrait, DatabaseConnection};
use sea_orm::{DatabaseBackend, DbErr, Statement};
pub use store::MigrationStore;
pub use unit::{MigrationUnit, TransactionMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationCommand {
    /// Apply every pending unit.
    Up,
    /// Report applied/pending/drifted units without changing anything.
    Status,
    /// Like `Status`, but drift is an error.
    Verify,
}

#[derive(Debug)]
pub enum MigrationOutcome {
    Ran(RunReport),
    Status(Plan),
}

/// Run `command` for `units` against an already-open connection.
/// Used by both the CLI orchestration and tests.
pub async fn migrate(
    db: &DatabaseConnection,
    units: &[MigrationUnit],
    command: MigrationCommand,
    options: RunOptions,
) -> Result<MigrationOutcome, MigrationError> {
    let before = get_db_diagnostics(db, units.len()).await?;

    tracing::info!("▶ cmd={command:?}  profile={}", before.profile);
    tracing::info!("▶ connected to DB: {}", before.name);
    tracing::info!(
        "▶ BEFORE: {} migration(s) defined, {} applied",
        before.defined_migrations_count,
        before.mig_count
    );

    let result = match command {
        MigrationCommand::Up => Runner::new(units, options)
            .run(db)
            .await
            .map(MigrationOutcome::Ran),
        MigrationCommand::Status => status(db, units).await.map(MigrationOutcome::Status),
        MigrationCommand::Verify => verify(db, units).await.map(MigrationOutcome::Status),
    };

    match result {
        Ok(outcome) => {
            if command == MigrationCommand::Up && !options.dry_run {
                let after = get_db_diagnostics(db, units.len()).await?;
                tracing::info!(
                    "▶ AFTER: {} migration(s) defined, {} applied",
                    after.defined_migrations_count,
                    after.mig_count
                );
            }
            tracing::debug!("✅ {command:?} OK for {}", before.profile);
            Ok(outcome)
        }
        Err(e) => {
            tracing::debug!("{command:?} failed for {}: {e}", before.profile);
            Err(e)
        }
    }
}

/// Read-only: a missing ledger table means nothing is applied yet.
pub async fn status(
    db: &DatabaseConnection,
    units: &[MigrationUnit],
) -> Result<Plan, MigrationError> {
    let applied = ledger::applied(db).await?;
    let plan = ledger::plan(units, &applied);

    for (unit, entry) in units.iter().zip(&plan.entries) {
        match &entry.status {
            UnitStatus::Applied => tracing::info!("applied  {}", unit.name),
            UnitStatus::Pending => tracing::info!("pending  {}", unit.name),
            UnitStatus::Drifted { recorded } => tracing::warn!(
                "drifted  {} (recorded {}, file {})",
                unit.name,
                recorded,
                unit.checksum
            ),
        }
    }
    for row in &plan.missing {
        tracing::warn!("missing  {} (applied {}, no file)", row.name, row.applied_at);
    }

    Ok(plan)
}

pub async fn verify(
    db: &DatabaseConnection,
    units: &[MigrationUnit],
) -> Result<Plan, MigrationError> {
    let plan = status(db, units).await?;
    let drifted = plan.drifted();
    if !drifted.is_empty() {
        return Err(MigrationError::Drift { names: drifted });
    }
    Ok(plan)
}

#[derive(Debug)]
struct DbDiagnostics {
    profile: String,
    name: String,
    mig_count: usize,
    defined_migrations_count: usize,
}

async fn get_db_diagnostics(
    db: &DatabaseConnection,
    defined_migrations_count: usize,
) -> Result<DbDiagnostics, MigrationError> {
    let backend = db.get_database_backend();
    let profile = format!("{backend:?}");

    let name = match backend {
        DatabaseBackend::Postgres => {
            let stmt = Statement::from_string(
                backend,
                String::from("select current_database() as name"),
            );
            match db.query_one(stmt).await? {
                Some(row) => row.try_get("", "name")?,
                None => "<unknown>".to_string(),
            }
        }
        DatabaseBackend::Sqlite => {
            let stmt = Statement::from_string(
                backend,
                String::from("SELECT file FROM pragma_database_list WHERE name = 'main'"),
            );
            match db.query_one(stmt).await? {
                Some(row) => match row.try_get::<String>("", "file") {
                    Ok(file) if file.is_empty() => ":memory:".to_string(),
                    Ok(file) => file,
                    Err(_) => "<unknown>".to_string(),
                },
                None => "<unknown>".to_string(),
            }
        }
        DatabaseBackend::MySql => "<unsupported>".to_string(),
    };

    Ok(DbDiagnostics {
        profile,
        name,
        mig_count: count_applied_migrations(db).await?,
        defined_migrations_count,
    })
}

/// Number of rows in the ledger; 0 when the ledger table doesn't exist yet.
pub async fn count_applied_migrations(db: &DatabaseConnection) -> Result<usize, DbErr> {
    Ok(ledger::applied(db).await?.len())
}

/// Highest version recorded in the ledger, if any.
pub async fn get_latest_migration_version(db: &DatabaseConnection) -> Result<Option<u64>, DbErr> {
    Ok(ledger::applied(db).await?.iter().map(|m| m.version).max())
}

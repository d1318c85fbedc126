//! End-to-end orchestration against temporary SQLite file databases.
//!
//!   cargo test -p db-infra --test orchestrate_tests

use std::time::Duration;

use db_infra::config::db::sqlite_lock_path;
use db_infra::infra::db::locking::{MigrationLock, SqliteFileLock};
use db_infra::{orchestrate_migration, DbInfraError, MigrateSettings};
use migration::{MigrationCommand, MigrationError, MigrationOutcome, RunOptions};
use test_support::{connect_sqlite, MigrationDir};
use tokio_util::sync::CancellationToken;

#[ctor::ctor]
fn init_logging() {
    test_support::logging::init();
}

fn settings(dir: &MigrationDir, lock_timeout_ms: u64) -> MigrateSettings {
    MigrateSettings {
        database_url: dir.sqlite_url(),
        migrations_dir: dir.path().to_path_buf(),
        lock_timeout: Duration::from_millis(lock_timeout_ms),
        run: RunOptions::default(),
    }
}

fn ran(outcome: Option<MigrationOutcome>) -> migration::RunReport {
    match outcome {
        Some(MigrationOutcome::Ran(report)) => report,
        other => panic!("expected a run report, got {other:?}"),
    }
}

#[tokio::test]
async fn applies_then_short_circuits_when_up_to_date() -> Result<(), Box<dyn std::error::Error>> {
    let dir = MigrationDir::new();
    dir.write("001_init.sql", "CREATE TABLE concepts (id INTEGER PRIMARY KEY);");
    dir.write("002_add_index.sql", "CREATE INDEX concepts_id_idx ON concepts (id);");
    let settings = settings(&dir, 1000);

    let first = ran(
        orchestrate_migration(&settings, MigrationCommand::Up, CancellationToken::new()).await?,
    );
    assert_eq!(first.applied, ["001_init.sql", "002_add_index.sql"]);

    let second = ran(
        orchestrate_migration(&settings, MigrationCommand::Up, CancellationToken::new()).await?,
    );
    assert!(second.applied.is_empty());
    assert_eq!(second.skipped.len(), 2);
    Ok(())
}

#[tokio::test]
async fn missing_or_empty_directory_never_connects() -> Result<(), Box<dyn std::error::Error>> {
    let dir = MigrationDir::new();
    let mut settings = settings(&dir, 1000);

    let outcome =
        orchestrate_migration(&settings, MigrationCommand::Up, CancellationToken::new()).await?;
    assert!(outcome.is_none());

    settings.migrations_dir = dir.root().join("does-not-exist");
    let outcome =
        orchestrate_migration(&settings, MigrationCommand::Up, CancellationToken::new()).await?;
    assert!(outcome.is_none());

    assert!(!dir.db_path().exists());
    Ok(())
}

#[tokio::test]
async fn failing_unit_surfaces_its_name() -> Result<(), Box<dyn std::error::Error>> {
    let dir = MigrationDir::new();
    dir.write("001_init.sql", "CREATE TABLE concepts (id INTEGER PRIMARY KEY);");
    dir.write("002_bad.sql", "THIS IS NOT SQL;");
    let settings = settings(&dir, 1000);

    let err = orchestrate_migration(&settings, MigrationCommand::Up, CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        DbInfraError::Migration(MigrationError::Unit { name, .. }) => {
            assert_eq!(name, "002_bad.sql")
        }
        other => panic!("unexpected error: {other}"),
    }

    let db = connect_sqlite(&dir.sqlite_url()).await?;
    assert_eq!(migration::count_applied_migrations(&db).await?, 1);
    Ok(())
}

#[tokio::test]
async fn times_out_while_another_process_holds_the_lock() -> Result<(), Box<dyn std::error::Error>>
{
    let dir = MigrationDir::new();
    dir.write("001_init.sql", "CREATE TABLE concepts (id INTEGER PRIMARY KEY);");
    let settings = settings(&dir, 100);

    let mut holder = SqliteFileLock::new(&sqlite_lock_path(&settings.database_url)?);
    let guard = holder.try_acquire().await?.expect("hold lock");

    let err = orchestrate_migration(&settings, MigrationCommand::Up, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DbInfraError::Lock { .. }), "got {err}");
    assert!(err.to_string().contains("timeout"));

    guard.release().await?;

    let report = ran(
        orchestrate_migration(&settings, MigrationCommand::Up, CancellationToken::new()).await?,
    );
    assert_eq!(report.applied, ["001_init.sql"]);
    Ok(())
}

#[tokio::test]
async fn cancellation_stops_the_lock_wait() -> Result<(), Box<dyn std::error::Error>> {
    let dir = MigrationDir::new();
    dir.write("001_init.sql", "CREATE TABLE concepts (id INTEGER PRIMARY KEY);");
    let settings = settings(&dir, 60_000);

    let mut holder = SqliteFileLock::new(&sqlite_lock_path(&settings.database_url)?);
    let guard = holder.try_acquire().await?.expect("hold lock");

    let token = CancellationToken::new();
    token.cancel();

    let err = orchestrate_migration(&settings, MigrationCommand::Up, token)
        .await
        .unwrap_err();
    assert!(matches!(err, DbInfraError::Cancelled { .. }), "got {err}");

    guard.release().await?;
    Ok(())
}

#[tokio::test]
async fn status_does_not_take_the_lock() -> Result<(), Box<dyn std::error::Error>> {
    let dir = MigrationDir::new();
    dir.write("001_init.sql", "CREATE TABLE concepts (id INTEGER PRIMARY KEY);");
    let settings = settings(&dir, 50);

    let mut holder = SqliteFileLock::new(&sqlite_lock_path(&settings.database_url)?);
    let guard = holder.try_acquire().await?.expect("hold lock");

    let outcome =
        orchestrate_migration(&settings, MigrationCommand::Status, CancellationToken::new())
            .await?;
    match outcome {
        Some(MigrationOutcome::Status(plan)) => assert_eq!(plan.pending_count(), 1),
        other => panic!("expected a plan, got {other:?}"),
    }

    guard.release().await?;
    Ok(())
}

#[tokio::test]
async fn rejects_unsupported_schemes_before_touching_files() {
    let dir = MigrationDir::new();
    let mut settings = settings(&dir, 50);
    settings.database_url = "mysql://localhost/concepts".to_string();

    let err = orchestrate_migration(&settings, MigrationCommand::Up, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DbInfraError::Config { .. }));
}

use std::future::Future;
use std::time::{Duration, Instant};

use migration::{
    ledger, migrate, MigrationCommand, MigrationError, MigrationOutcome, MigrationStore,
    MigrationUnit, RunReport, RunState,
};
use rand::Rng;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::db::{display_target, sanitize_db_url, sqlite_lock_path, DbKind, MigrateSettings};
use crate::error::DbInfraError;
use crate::infra::db::diagnostics::migration_counters;
use crate::infra::db::locking::{InMemoryLock, MigrationLock, PgAdvisoryLock, SqliteFileLock};

const SQLITE_BUSY_TIMEOUT_MS: u64 = 5000;

fn get_db_engine(db_kind: DbKind) -> &'static str {
    match db_kind {
        DbKind::Postgres => "postgresql",
        DbKind::SqliteFile | DbKind::SqliteMemory => "sqlite",
    }
}

async fn retry_connection<T, F, Fut>(
    mut connect_fn: F,
    max_attempts: u32,
    interval_ms: u64,
) -> Result<T, DbInfraError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbInfraError>>,
{
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match connect_fn().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        "connection_retry=success attempts={} interval_ms={}",
                        attempt, interval_ms
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                last_error = Some(e);
                if attempt < max_attempts {
                    warn!(
                        "connection_retry=failed attempt={} max_attempts={} interval_ms={}",
                        attempt, max_attempts, interval_ms
                    );
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| DbInfraError::Connect {
        message: format!("no connection attempt was made (max_attempts={max_attempts})"),
    }))
}

/// Single-connection pool: the advisory lock, the ledger and every unit share one session.
pub async fn build_admin_pool(
    url: &str,
    db_kind: DbKind,
) -> Result<DatabaseConnection, DbInfraError> {
    let mut opt = ConnectOptions::new(url);
    opt.min_connections(1)
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .sqlx_logging(true);

    let connect_err = |e: sea_orm::DbErr| DbInfraError::Connect {
        message: format!("failed to connect to {}: {}", display_target(url), e),
    };

    if matches!(db_kind, DbKind::Postgres) {
        retry_connection(
            || {
                let opt = opt.clone();
                async move { Database::connect(opt).await.map_err(connect_err) }
            },
            5,
            500,
        )
        .await
    } else {
        Database::connect(opt).await.map_err(connect_err)
    }
}

/// True when every unit is already in the ledger with a matching checksum.
async fn fast_path_schema_check(
    conn: &DatabaseConnection,
    units: &[MigrationUnit],
) -> Result<bool, DbInfraError> {
    migration_counters::schema_check();

    let applied = ledger::applied(conn)
        .await
        .map_err(MigrationError::Ledger)?;
    let plan = ledger::plan(units, &applied);
    let pending = plan.pending_count();
    let drifted = plan.drifted().len();

    let is_up_to_date = pending == 0 && drifted == 0;
    if is_up_to_date {
        migration_counters::fast_path_hit();
        trace!(fastpath = "hit", applied_count = applied.len());
    } else {
        migration_counters::fast_path_miss();
        trace!(
            fastpath = "miss",
            applied_count = applied.len(),
            pending,
            drifted
        );
    }

    Ok(is_up_to_date)
}

/// Load units, connect, run `command`, and close the connection on every path.
///
/// Returns `None` when `up` finds no migration files; nothing touches the database then.
pub async fn orchestrate_migration(
    settings: &MigrateSettings,
    command: MigrationCommand,
    cancellation_token: CancellationToken,
) -> Result<Option<MigrationOutcome>, DbInfraError> {
    let db_kind = settings.db_kind()?;
    let units = MigrationStore::new(&settings.migrations_dir).load()?;

    if units.is_empty() && command == MigrationCommand::Up {
        info!(
            "No migrations found in {}",
            settings.migrations_dir.display()
        );
        return Ok(None);
    }

    info!("Found {} migration(s)", units.len());
    info!("Target: {}", display_target(&settings.database_url));

    let pool = build_admin_pool(&settings.database_url, db_kind).await?;

    let result = orchestrate_migration_internal(
        &pool,
        settings,
        db_kind,
        &units,
        command,
        cancellation_token,
    )
    .await;

    if let Err(e) = pool.close().await {
        warn!(error = %e, "failed to close migration connection");
    }

    result.map(Some)
}

pub async fn orchestrate_migration_internal(
    pool: &DatabaseConnection,
    settings: &MigrateSettings,
    db_kind: DbKind,
    units: &[MigrationUnit],
    command: MigrationCommand,
    cancellation_token: CancellationToken,
) -> Result<MigrationOutcome, DbInfraError> {
    debug!(
        "migrate=start cmd={:?} db_kind={:?} engine={} units={}",
        command,
        db_kind,
        get_db_engine(db_kind),
        units.len()
    );

    if command != MigrationCommand::Up {
        let outcome = migrate(pool, units, command, settings.run).await?;
        debug!("migrate=done");
        return Ok(outcome);
    }

    let result = match db_kind {
        DbKind::Postgres => {
            let key = format!(
                "concept-migrate:{:?}:{}",
                db_kind,
                sanitize_db_url(&settings.database_url)
            );
            let lock = PgAdvisoryLock::new(pool.clone(), &key);
            migrate_with_lock(pool, lock, settings, db_kind, units, cancellation_token).await
        }
        DbKind::SqliteMemory => {
            migrate_with_lock(pool, InMemoryLock, settings, db_kind, units, cancellation_token)
                .await
        }
        DbKind::SqliteFile => {
            let lock_path = sqlite_lock_path(&settings.database_url)?;
            let lock = SqliteFileLock::new(&lock_path);
            migrate_with_lock(pool, lock, settings, db_kind, units, cancellation_token).await
        }
    };

    if let Err(ref e) = result {
        let error_msg = e.to_string();
        if error_msg.contains("database is locked") || error_msg.contains("SQLITE_BUSY") {
            migration_counters::busy_event();
            debug!("sqlite_busy op=migrate err={:?}", e);
        }
    }

    debug!("migrate=done");
    migration_counters::log_snapshot("migrate_orchestration");

    result
}

async fn migrate_with_lock<L>(
    pool: &DatabaseConnection,
    mut lock: L,
    settings: &MigrateSettings,
    db_kind: DbKind,
    units: &[MigrationUnit],
    cancellation_token: CancellationToken,
) -> Result<MigrationOutcome, DbInfraError>
where
    L: MigrationLock,
{
    let lock_acquire = settings.lock_timeout;
    debug!(
        acquire_ms = lock_acquire.as_millis() as u64,
        db_kind = ?db_kind,
        "migration lock timeout configured"
    );

    let start = Instant::now();
    let mut attempts: u32 = 0;

    let guard = loop {
        attempts += 1;

        if !settings.run.dry_run && fast_path_schema_check(pool, units).await? {
            info!("migrate=skipped up_to_date=true");
            return Ok(MigrationOutcome::Ran(RunReport {
                state: RunState::Completed,
                applied: Vec::new(),
                skipped: units.iter().map(|u| u.name.clone()).collect(),
                pending: Vec::new(),
            }));
        }

        if let Some(acquired) = lock.try_acquire().await? {
            migration_counters::add_lock_acquire_attempts(attempts as usize);
            migration_counters::lock_acquired();
            trace!(
                lock = "won",
                db_kind = ?db_kind,
                attempts,
                elapsed_ms = start.elapsed().as_millis() as u64
            );
            break acquired;
        }

        let base_delay_ms = (5u64 << attempts.saturating_sub(1).min(16)).min(80);
        let jitter_ms = rand::rng().random::<u64>() % 4;
        let delay_ms = base_delay_ms + jitter_ms;

        trace!(
            lock = "backoff",
            attempts,
            delay_ms,
            elapsed_ms = start.elapsed().as_millis() as u64
        );
        migration_counters::lock_backoff_event();

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {
                if start.elapsed() >= lock_acquire {
                    migration_counters::lock_acquire_timeout();
                    return Err(DbInfraError::lock(format!(
                        "migration lock acquisition timeout after {:?} ({} attempts)",
                        start.elapsed(),
                        attempts
                    )));
                }
            }
            _ = cancellation_token.cancelled() => {
                migration_counters::migration_cancelled();
                return Err(DbInfraError::Cancelled {
                    message: format!(
                        "migration cancelled while waiting for the lock after {}ms",
                        start.elapsed().as_millis()
                    ),
                });
            }
        }
    };

    let result = migrate_with_guard(pool, db_kind, units, settings).await;

    if let Err(release_err) = guard.release().await {
        warn!(error = %release_err, "Failed to release migration guard");
    }

    result
}

async fn migrate_with_guard(
    pool: &DatabaseConnection,
    db_kind: DbKind,
    units: &[MigrationUnit],
    settings: &MigrateSettings,
) -> Result<MigrationOutcome, DbInfraError> {
    if matches!(db_kind, DbKind::SqliteFile) {
        setup_sqlite_file_prerequisites(pool).await?;
    }

    let start = Instant::now();
    match migrate(pool, units, MigrationCommand::Up, settings.run).await {
        Ok(outcome) => {
            if let MigrationOutcome::Ran(report) = &outcome {
                migration_counters::add_units_applied(report.applied.len());
                debug!(
                    migrator = "ran",
                    applied = report.applied.len(),
                    skipped = report.skipped.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64
                );
            }
            Ok(outcome)
        }
        Err(e) => {
            migration_counters::migration_failed();
            Err(e.into())
        }
    }
}

async fn setup_sqlite_file_prerequisites(pool: &DatabaseConnection) -> Result<(), DbInfraError> {
    pool.execute_unprepared(&format!("PRAGMA busy_timeout = {SQLITE_BUSY_TIMEOUT_MS};"))
        .await
        .map_err(|e| DbInfraError::Connect {
            message: format!("failed to set busy_timeout: {e}"),
        })?;
    Ok(())
}

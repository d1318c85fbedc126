use std::time::Instant;

use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, TransactionTrait};
use tracing::{debug, info, warn};

use crate::error::MigrationError;
use crate::ledger::{self, Plan};
use crate::unit::{MigrationUnit, TransactionMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Apply pending units whose version is below the newest applied one.
    pub allow_out_of_order: bool,
    /// Build the plan and report pending units without executing them.
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: RunState,
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
    /// Units that would have been applied; only populated on a dry run.
    pub pending: Vec<String>,
}

/// Applies pending units in order and stops at the first failure.
pub struct Runner<'a> {
    units: &'a [MigrationUnit],
    options: RunOptions,
    state: RunState,
}

impl<'a> Runner<'a> {
    pub fn new(units: &'a [MigrationUnit], options: RunOptions) -> Self {
        Self {
            units,
            options,
            state: RunState::NotStarted,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub async fn run(&mut self, db: &DatabaseConnection) -> Result<RunReport, MigrationError> {
        self.state = RunState::Running;
        let result = self.run_inner(db).await;
        self.state = match result {
            Ok(_) => RunState::Completed,
            Err(_) => RunState::Failed,
        };

        result.map(|mut report| {
            report.state = self.state;
            report
        })
    }

    async fn run_inner(&self, db: &DatabaseConnection) -> Result<RunReport, MigrationError> {
        let mut report = RunReport {
            state: RunState::Running,
            applied: Vec::new(),
            skipped: Vec::new(),
            pending: Vec::new(),
        };

        if self.units.is_empty() {
            info!("No migrations to apply");
            return Ok(report);
        }

        if !self.options.dry_run {
            ledger::ensure_table(db).await?;
        }
        let plan = ledger::plan(self.units, &ledger::applied(db).await?);

        check_plan(&plan, self.options)?;

        for (unit, entry) in self.units.iter().zip(&plan.entries) {
            if entry.status != ledger::UnitStatus::Pending {
                debug!("Skipping {} (already applied)", unit.name);
                report.skipped.push(unit.name.clone());
                continue;
            }

            if self.options.dry_run {
                info!("Pending {}", unit.name);
                report.pending.push(unit.name.clone());
                continue;
            }

            info!("Applying {}...", unit.name);
            let elapsed_ms = apply_unit(db, unit).await?;
            info!("Applied {} ({} ms)", unit.name, elapsed_ms);
            report.applied.push(unit.name.clone());
        }

        Ok(report)
    }
}

/// Refuse to run when the store disagrees with the ledger.
pub fn check_plan(plan: &Plan, options: RunOptions) -> Result<(), MigrationError> {
    for row in &plan.missing {
        warn!(
            version = row.version,
            name = %row.name,
            "applied migration has no file in the migration directory"
        );
    }

    let drifted = plan.drifted();
    if !drifted.is_empty() {
        return Err(MigrationError::Drift { names: drifted });
    }

    let out_of_order = plan.out_of_order();
    if !out_of_order.is_empty() {
        if !options.allow_out_of_order {
            return Err(MigrationError::OutOfOrder {
                latest: plan.latest_applied.unwrap_or_default(),
                names: out_of_order,
            });
        }
        warn!(units = ?out_of_order, "applying migration(s) out of order");
    }

    Ok(())
}

async fn apply_unit(db: &DatabaseConnection, unit: &MigrationUnit) -> Result<i64, MigrationError> {
    let unit_err = |source: DbErr| MigrationError::Unit {
        name: unit.name.clone(),
        source,
    };

    if unit.is_empty() {
        warn!("{} has no statements; recording it as applied", unit.name);
    }

    match unit.mode {
        TransactionMode::Transactional => {
            let txn = db.begin().await.map_err(unit_err)?;

            let start = Instant::now();
            if let Err(e) = execute_body(&txn, unit).await {
                // Best-effort rollback; the body error is returned
                let _ = txn.rollback().await;
                return Err(unit_err(e));
            }
            let elapsed_ms = start.elapsed().as_millis() as i64;

            if let Err(e) = ledger::record(&txn, unit, elapsed_ms).await {
                let _ = txn.rollback().await;
                return Err(MigrationError::Ledger(e));
            }

            txn.commit().await.map_err(unit_err)?;
            Ok(elapsed_ms)
        }
        TransactionMode::NoTransaction => {
            debug!("{} runs outside a transaction", unit.name);

            let start = Instant::now();
            execute_body(db, unit).await.map_err(unit_err)?;
            let elapsed_ms = start.elapsed().as_millis() as i64;

            ledger::record(db, unit, elapsed_ms).await?;
            Ok(elapsed_ms)
        }
    }
}

async fn execute_body<C: ConnectionTrait>(conn: &C, unit: &MigrationUnit) -> Result<(), DbErr> {
    if unit.is_empty() {
        return Ok(());
    }
    conn.execute_unprepared(&unit.sql).await?;
    Ok(())
}

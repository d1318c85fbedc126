//! Persisted record of applied migration units.
//!
//! One row per unit in `schema_migrations`, keyed by version. Rows for
//! transactional units are written inside the unit's own transaction so the
//! ledger never claims a unit whose body rolled back.

use std::collections::HashMap;

use sea_orm::sea_query::{Alias, ColumnDef, Order, Query, Table};
use sea_orm::{ConnectionTrait, DatabaseBackend, DbErr, Statement};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::unit::MigrationUnit;

pub const LEDGER_TABLE: &str = "schema_migrations";

const COL_VERSION: &str = "version";
const COL_NAME: &str = "name";
const COL_CHECKSUM: &str = "checksum";
const COL_APPLIED_AT: &str = "applied_at";
const COL_EXECUTION_MS: &str = "execution_ms";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: u64,
    pub name: String,
    pub checksum: String,
    pub applied_at: String,
    pub execution_ms: i64,
}

pub async fn ensure_table<C: ConnectionTrait>(conn: &C) -> Result<(), DbErr> {
    let stmt = Table::create()
        .table(Alias::new(LEDGER_TABLE))
        .if_not_exists()
        .col(
            ColumnDef::new(Alias::new(COL_VERSION))
                .big_integer()
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(Alias::new(COL_NAME)).string().not_null())
        .col(ColumnDef::new(Alias::new(COL_CHECKSUM)).string().not_null())
        .col(ColumnDef::new(Alias::new(COL_APPLIED_AT)).string().not_null())
        .col(
            ColumnDef::new(Alias::new(COL_EXECUTION_MS))
                .big_integer()
                .not_null(),
        )
        .to_owned();

    let backend = conn.get_database_backend();
    conn.execute(backend.build(&stmt)).await?;
    Ok(())
}

pub async fn table_exists<C: ConnectionTrait>(conn: &C) -> Result<bool, DbErr> {
    let backend = conn.get_database_backend();
    let sql = match backend {
        DatabaseBackend::Postgres => {
            "SELECT CAST(COUNT(*) AS BIGINT) AS n FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1"
        }
        DatabaseBackend::Sqlite => {
            "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?"
        }
        DatabaseBackend::MySql => {
            return Err(DbErr::Custom(
                "MySQL is not a supported migration target".to_string(),
            ))
        }
    };

    let stmt = Statement::from_sql_and_values(backend, sql, [LEDGER_TABLE.into()]);
    let n: i64 = match conn.query_one(stmt).await? {
        Some(row) => row.try_get("", "n")?,
        None => 0,
    };
    Ok(n > 0)
}

/// Applied rows ordered by version. Empty when the ledger table is absent.
pub async fn applied<C: ConnectionTrait>(conn: &C) -> Result<Vec<AppliedMigration>, DbErr> {
    if !table_exists(conn).await? {
        return Ok(Vec::new());
    }

    let stmt = Query::select()
        .columns([
            Alias::new(COL_VERSION),
            Alias::new(COL_NAME),
            Alias::new(COL_CHECKSUM),
            Alias::new(COL_APPLIED_AT),
            Alias::new(COL_EXECUTION_MS),
        ])
        .from(Alias::new(LEDGER_TABLE))
        .order_by(Alias::new(COL_VERSION), Order::Asc)
        .to_owned();

    let backend = conn.get_database_backend();
    let rows = conn.query_all(backend.build(&stmt)).await?;

    rows.into_iter()
        .map(|row| {
            let version: i64 = row.try_get("", COL_VERSION)?;
            Ok(AppliedMigration {
                version: u64::try_from(version).map_err(|_| {
                    DbErr::Custom(format!("negative version {version} in {LEDGER_TABLE}"))
                })?,
                name: row.try_get("", COL_NAME)?,
                checksum: row.try_get("", COL_CHECKSUM)?,
                applied_at: row.try_get("", COL_APPLIED_AT)?,
                execution_ms: row.try_get("", COL_EXECUTION_MS)?,
            })
        })
        .collect()
}

pub async fn record<C: ConnectionTrait>(
    conn: &C,
    unit: &MigrationUnit,
    execution_ms: i64,
) -> Result<(), DbErr> {
    let version = i64::try_from(unit.version)
        .map_err(|_| DbErr::Custom(format!("version {} does not fit BIGINT", unit.version)))?;
    let applied_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| DbErr::Custom(format!("failed to format timestamp: {e}")))?;

    let mut insert = Query::insert();
    insert
        .into_table(Alias::new(LEDGER_TABLE))
        .columns([
            Alias::new(COL_VERSION),
            Alias::new(COL_NAME),
            Alias::new(COL_CHECKSUM),
            Alias::new(COL_APPLIED_AT),
            Alias::new(COL_EXECUTION_MS),
        ])
        .values([
            version.into(),
            unit.name.clone().into(),
            unit.checksum.clone().into(),
            applied_at.into(),
            execution_ms.into(),
        ])
        .map_err(|e| DbErr::Custom(format!("failed to build ledger insert: {e}")))?;

    let backend = conn.get_database_backend();
    conn.execute(backend.build(&insert)).await?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    Applied,
    Pending,
    /// Applied, but the file's checksum no longer matches the ledger.
    Drifted { recorded: String },
}

#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub version: u64,
    pub name: String,
    pub status: UnitStatus,
}

/// Units classified against the ledger. `entries` is index-aligned with the
/// units the plan was built from.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub entries: Vec<PlanEntry>,
    /// Ledger rows whose file is no longer in the store.
    pub missing: Vec<AppliedMigration>,
    pub latest_applied: Option<u64>,
}

impl Plan {
    pub fn pending(&self) -> impl Iterator<Item = (usize, &PlanEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status == UnitStatus::Pending)
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    pub fn applied_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| !matches!(e.status, UnitStatus::Pending))
            .count()
    }

    pub fn drifted(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, UnitStatus::Drifted { .. }))
            .map(|e| e.name.clone())
            .collect()
    }

    /// Pending units that sort below the newest applied version.
    pub fn out_of_order(&self) -> Vec<String> {
        let Some(latest) = self.latest_applied else {
            return Vec::new();
        };
        self.pending()
            .filter(|(_, e)| e.version < latest)
            .map(|(_, e)| e.name.clone())
            .collect()
    }
}

pub fn plan(units: &[MigrationUnit], applied: &[AppliedMigration]) -> Plan {
    let by_version: HashMap<u64, &AppliedMigration> =
        applied.iter().map(|a| (a.version, a)).collect();

    let entries = units
        .iter()
        .map(|unit| {
            let status = match by_version.get(&unit.version) {
                None => UnitStatus::Pending,
                Some(row) if row.checksum == unit.checksum => UnitStatus::Applied,
                Some(row) => UnitStatus::Drifted {
                    recorded: row.checksum.clone(),
                },
            };
            PlanEntry {
                version: unit.version,
                name: unit.name.clone(),
                status,
            }
        })
        .collect();

    let missing = applied
        .iter()
        .filter(|a| !units.iter().any(|u| u.version == a.version))
        .cloned()
        .collect();

    Plan {
        entries,
        missing,
        latest_applied: applied.iter().map(|a| a.version).max(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::checksum;

    fn unit(name: &str, sql: &str) -> MigrationUnit {
        MigrationUnit::from_parts(name, sql.to_string()).unwrap()
    }

    fn row(version: u64, name: &str, sql: &str) -> AppliedMigration {
        AppliedMigration {
            version,
            name: name.to_string(),
            checksum: checksum(sql),
            applied_at: "2024-01-01T00:00:00Z".to_string(),
            execution_ms: 1,
        }
    }

    #[test]
    fn empty_ledger_makes_everything_pending() {
        let units = [unit("001_a.sql", "A"), unit("002_b.sql", "B")];
        let plan = plan(&units, &[]);
        assert_eq!(plan.pending_count(), 2);
        assert_eq!(plan.latest_applied, None);
        assert!(plan.out_of_order().is_empty());
    }

    #[test]
    fn classifies_applied_pending_and_drifted() {
        let units = [
            unit("001_a.sql", "A"),
            unit("002_b.sql", "B changed"),
            unit("003_c.sql", "C"),
        ];
        let applied = [row(1, "001_a.sql", "A"), row(2, "002_b.sql", "B")];
        let plan = plan(&units, &applied);

        assert_eq!(plan.entries[0].status, UnitStatus::Applied);
        assert_eq!(
            plan.entries[1].status,
            UnitStatus::Drifted {
                recorded: checksum("B")
            }
        );
        assert_eq!(plan.entries[2].status, UnitStatus::Pending);
        assert_eq!(plan.drifted(), ["002_b.sql"]);
        assert_eq!(plan.applied_count(), 2);
        assert_eq!(plan.pending().map(|(i, _)| i).collect::<Vec<_>>(), [2]);
    }

    #[test]
    fn reports_ledger_rows_without_files() {
        let units = [unit("002_b.sql", "B")];
        let applied = [row(1, "001_gone.sql", "A"), row(2, "002_b.sql", "B")];
        let plan = plan(&units, &applied);
        assert_eq!(plan.missing.len(), 1);
        assert_eq!(plan.missing[0].name, "001_gone.sql");
    }

    #[test]
    fn detects_out_of_order_pending_units() {
        let units = [unit("001_a.sql", "A"), unit("002_late.sql", "L"), unit("003_c.sql", "C")];
        let applied = [row(1, "001_a.sql", "A"), row(3, "003_c.sql", "C")];
        let plan = plan(&units, &applied);
        assert_eq!(plan.out_of_order(), ["002_late.sql"]);
    }
}

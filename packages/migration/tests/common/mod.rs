#![allow(dead_code)]

use migration::{MigrationStore, MigrationUnit};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, Statement};
use test_support::{connect_sqlite, MigrationDir};

#[ctor::ctor]
fn init_logging() {
    test_support::logging::init();
}

pub async fn open(dir: &MigrationDir) -> DatabaseConnection {
    connect_sqlite(&dir.sqlite_url())
        .await
        .expect("connect to temp sqlite")
}

pub fn load(dir: &MigrationDir) -> Vec<MigrationUnit> {
    MigrationStore::new(dir.path())
        .load()
        .expect("load migration store")
}

pub async fn table_exists(db: &DatabaseConnection, table: &str) -> bool {
    let stmt = Statement::from_sql_and_values(
        DatabaseBackend::Sqlite,
        "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?",
        [table.into()],
    );
    let row = db
        .query_one(stmt)
        .await
        .expect("query sqlite_master")
        .expect("count row");
    row.try_get::<i64>("", "n").expect("read count") > 0
}

pub async fn count_rows(db: &DatabaseConnection, table: &str) -> i64 {
    let stmt = Statement::from_string(
        DatabaseBackend::Sqlite,
        format!("SELECT COUNT(*) AS n FROM {table}"),
    );
    let row = db
        .query_one(stmt)
        .await
        .expect("count query")
        .expect("count row");
    row.try_get::<i64>("", "n").expect("read count")
}

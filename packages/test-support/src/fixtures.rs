use std::fs;
use std::path::{Path, PathBuf};

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use tempfile::TempDir;

/// A temporary `migrations/` directory next to a throwaway SQLite file.
///
/// Everything is removed when the value is dropped.
pub struct MigrationDir {
    root: TempDir,
    dir: PathBuf,
}

impl MigrationDir {
    pub fn new() -> Self {
        let root = TempDir::new().expect("create temp dir");
        let dir = root.path().join("migrations");
        fs::create_dir(&dir).expect("create migrations dir");
        Self { root, dir }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.path().join("concepts.db")
    }

    /// `sqlite://` URL that creates the database file on first connect.
    pub fn sqlite_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path().display())
    }

    pub fn write(&self, name: &str, sql: &str) -> PathBuf {
        let path = self.dir.join(name);
        fs::write(&path, sql).expect("write migration file");
        path
    }

    pub fn remove(&self, name: &str) {
        fs::remove_file(self.dir.join(name)).expect("remove migration file");
    }
}

impl Default for MigrationDir {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-connection pool, the same shape the migration orchestration uses.
pub async fn connect_sqlite(url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(url);
    opt.min_connections(1)
        .max_connections(1)
        .sqlx_logging(false);
    Database::connect(opt).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_dir_writes_and_removes_files() {
        let dir = MigrationDir::new();
        let path = dir.write("001_init.sql", "SELECT 1;");
        assert!(path.is_file());
        assert!(dir.sqlite_url().starts_with("sqlite://"));
        assert!(dir.sqlite_url().ends_with("concepts.db?mode=rwc"));

        dir.remove("001_init.sql");
        assert!(!path.exists());
    }
}

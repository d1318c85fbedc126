// Standard library imports
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

// External crate imports
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, Statement};
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

// Internal crate imports
use crate::error::DbInfraError;

pub fn pg_lock_id(key: &str) -> i64 {
    xxh3_64(key.as_bytes()) as i64
}

/// A held migration lock. Call [`Guard::release`] on every exit path.
pub enum Guard {
    /// Session advisory lock held on the single pooled connection.
    Postgres {
        admin_pool: DatabaseConnection,
        lock_key: i64,
    },
    /// OS exclusive lock; dropping the file also releases it.
    SqliteFile { file: File, lock_path: PathBuf },
    InMemory,
}

impl Guard {
    pub async fn release(self) -> Result<(), DbInfraError> {
        match self {
            Guard::Postgres {
                admin_pool,
                lock_key,
            } => {
                let stmt = Statement::from_sql_and_values(
                    DatabaseBackend::Postgres,
                    "SELECT pg_advisory_unlock($1) AS unlocked",
                    [lock_key.into()],
                );

                match admin_pool.query_one(stmt).await {
                    Ok(Some(row)) => {
                        let unlocked: bool = row.try_get("", "unlocked").map_err(|e| {
                            DbInfraError::lock(format!("failed to read unlock result: {e}"))
                        })?;
                        if !unlocked {
                            warn!(
                                code = "PG_UNLOCK_FALSE",
                                lock_key, "Advisory lock unlock returned false"
                            );
                        }
                    }
                    Ok(None) => {
                        warn!(lock_key, "No result from advisory lock unlock query");
                    }
                    Err(e) => {
                        warn!(error = %e, lock_key, "Failed to unlock advisory lock");
                    }
                }
                Ok(())
            }
            Guard::SqliteFile { file, lock_path } => {
                // Unlock errors are benign; the handle is dropped right after
                if let Err(e) = fs4::fs_std::FileExt::unlock(&file) {
                    debug!(
                        error = %e,
                        lock_path = %lock_path.display(),
                        "SQLite file unlock returned error (may be benign)"
                    );
                } else {
                    debug!(lock_path = %lock_path.display(), "SQLite file lock released");
                }
                Ok(())
            }
            Guard::InMemory => Ok(()),
        }
    }
}

/// Cross-process mutual exclusion for a migration run.
#[async_trait]
pub trait MigrationLock {
    /// Non-blocking. `Ok(None)` means another process holds the lock.
    async fn try_acquire(&mut self) -> Result<Option<Guard>, DbInfraError>;
}

/// PostgreSQL session advisory lock.
///
/// INVARIANT: the pool must be configured with min=max=1 so the unlock runs
/// on the same physical session that took the lock.
pub struct PgAdvisoryLock {
    admin_pool: DatabaseConnection,
    lock_key: i64,
}

impl PgAdvisoryLock {
    pub fn new(admin_pool: DatabaseConnection, key: &str) -> Self {
        Self {
            admin_pool,
            lock_key: pg_lock_id(key),
        }
    }
}

#[async_trait]
impl MigrationLock for PgAdvisoryLock {
    async fn try_acquire(&mut self) -> Result<Option<Guard>, DbInfraError> {
        let stmt = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            "SELECT pg_try_advisory_lock($1) AS locked",
            [self.lock_key.into()],
        );

        let row = self
            .admin_pool
            .query_one(stmt)
            .await
            .map_err(|e| DbInfraError::lock(format!("failed to acquire advisory lock: {e}")))?
            .ok_or_else(|| DbInfraError::lock("pg_try_advisory_lock returned no row"))?;

        let locked: bool = row
            .try_get("", "locked")
            .map_err(|e| DbInfraError::lock(format!("failed to read lock result: {e}")))?;

        if !locked {
            return Ok(None);
        }

        Ok(Some(Guard::Postgres {
            admin_pool: self.admin_pool.clone(),
            lock_key: self.lock_key,
        }))
    }
}

/// Exclusive OS lock on `<db>.migrate.lock`.
pub struct SqliteFileLock {
    lock_path: PathBuf,
}

impl SqliteFileLock {
    pub fn new(lock_path: &Path) -> Self {
        Self {
            lock_path: lock_path.to_path_buf(),
        }
    }
}

#[async_trait]
impl MigrationLock for SqliteFileLock {
    async fn try_acquire(&mut self) -> Result<Option<Guard>, DbInfraError> {
        use fs4::fs_std::FileExt;

        if let Some(parent) = self.lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DbInfraError::lock(format!("failed to create lock file parent directory: {e}"))
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| DbInfraError::lock(format!("failed to open lock file: {e}")))?;

        // fs4 0.13: Ok(true) = acquired, Ok(false) = held elsewhere
        match file.try_lock_exclusive() {
            Ok(true) => {
                debug!(lock_path = %self.lock_path.display(), "SQLite file lock acquired");
                Ok(Some(Guard::SqliteFile {
                    file,
                    lock_path: self.lock_path.clone(),
                }))
            }
            Ok(false) => {
                debug!(lock_path = %self.lock_path.display(), "SQLite file lock contended");
                Ok(None)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(DbInfraError::lock(format!(
                "failed to acquire SQLite file lock: {e}"
            ))),
        }
    }
}

/// In-memory databases live and die with this process; nothing to exclude.
pub struct InMemoryLock;

#[async_trait]
impl MigrationLock for InMemoryLock {
    async fn try_acquire(&mut self) -> Result<Option<Guard>, DbInfraError> {
        Ok(Some(Guard::InMemory))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn lock_ids_are_stable_per_key() {
        assert_eq!(pg_lock_id("a"), pg_lock_id("a"));
        assert_ne!(pg_lock_id("a"), pg_lock_id("b"));
    }

    #[tokio::test]
    async fn sqlite_file_lock_excludes_a_second_holder() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("concepts.db.migrate.lock");

        let mut first = SqliteFileLock::new(&path);
        let mut second = SqliteFileLock::new(&path);

        let guard = first.try_acquire().await.unwrap().expect("first acquire");
        assert!(second.try_acquire().await.unwrap().is_none());

        guard.release().await.unwrap();
        let again = second.try_acquire().await.unwrap().expect("acquire after release");
        again.release().await.unwrap();
    }

    #[tokio::test]
    async fn in_memory_lock_always_acquires() {
        let mut lock = InMemoryLock;
        let a = lock.try_acquire().await.unwrap();
        let b = lock.try_acquire().await.unwrap();
        assert!(matches!(a, Some(Guard::InMemory)));
        assert!(matches!(b, Some(Guard::InMemory)));
    }
}

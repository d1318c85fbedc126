pub mod core;
pub mod diagnostics;
pub mod locking;

pub use core::{build_admin_pool, orchestrate_migration, orchestrate_migration_internal};
pub use diagnostics::migration_counters;
pub use locking::{Guard, InMemoryLock, MigrationLock, PgAdvisoryLock, SqliteFileLock};

//! Database configuration, connection and locking around migration runs.
//! Used by the migration CLI.

pub mod config;
pub mod error;
pub mod infra;

pub use config::db;
pub use config::db::{sanitize_db_url, DbKind, MigrateSettings};
pub use error::DbInfraError;
pub use infra::db::core::{build_admin_pool, orchestrate_migration, orchestrate_migration_internal};

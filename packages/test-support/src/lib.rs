//! Test support for the migration packages
//!
//! Logging initialization shared by every test binary, plus temporary
//! migration directories backed by throwaway SQLite databases.

pub mod fixtures;
pub mod logging;

pub use fixtures::{connect_sqlite, MigrationDir};

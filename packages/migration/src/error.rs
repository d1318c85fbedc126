use std::path::PathBuf;

use sea_orm::DbErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid migration file name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("duplicate migration version {version}: '{first}' and '{second}'")]
    DuplicateVersion {
        version: u64,
        first: String,
        second: String,
    },

    #[error("checksum drift in applied migration(s): {}", names.join(", "))]
    Drift { names: Vec<String> },

    #[error(
        "pending migration(s) older than latest applied version {latest}: {}",
        names.join(", ")
    )]
    OutOfOrder { latest: u64, names: Vec<String> },

    #[error("migration ledger error: {0}")]
    Ledger(#[from] DbErr),

    #[error("{name}: {source}")]
    Unit {
        name: String,
        #[source]
        source: DbErr,
    },

    #[error("migration file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("invalid schema document: {0}")]
    Schema(String),
}

impl MigrationError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }
}

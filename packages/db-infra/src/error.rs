use migration::MigrationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbInfraError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Connection error: {message}")]
    Connect { message: String },

    #[error("Lock error: {message}")]
    Lock { message: String },

    #[error("Cancelled: {message}")]
    Cancelled { message: String },

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

impl DbInfraError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn lock(message: impl Into<String>) -> Self {
        Self::Lock {
            message: message.into(),
        }
    }
}

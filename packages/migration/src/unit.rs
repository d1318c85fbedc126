use xxhash_rust::xxh3::xxh3_128;

use crate::error::MigrationError;

/// Leading-comment directive that opts a unit out of the per-unit transaction.
pub const NO_TRANSACTION_DIRECTIVE: &str = "migrate:no-transaction";

/// Versions are stored as BIGINT in the ledger.
pub const MAX_VERSION: u64 = i64::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Body and ledger row commit together or not at all.
    Transactional,
    /// Body runs in autocommit mode; for statements that cannot run inside a
    /// transaction (e.g. `CREATE INDEX CONCURRENTLY`).
    NoTransaction,
}

/// One named SQL script from the migration directory.
#[derive(Debug, Clone)]
pub struct MigrationUnit {
    pub version: u64,
    pub name: String,
    pub description: String,
    pub sql: String,
    pub checksum: String,
    pub mode: TransactionMode,
    /// Digit count of the version prefix as written in the file name.
    pub prefix_width: usize,
}

impl MigrationUnit {
    pub fn from_parts(name: &str, sql: String) -> Result<Self, MigrationError> {
        let parsed = parse_file_name(name)?;
        let checksum = checksum(&sql);
        let mode = transaction_mode(&sql);

        Ok(Self {
            version: parsed.version,
            name: name.to_string(),
            description: parsed.description,
            sql,
            checksum,
            mode,
            prefix_width: parsed.prefix_width,
        })
    }

    /// True when the body holds nothing but blank lines and `--` comments.
    pub fn is_empty(&self) -> bool {
        self.sql.lines().all(|line| {
            let line = line.trim();
            line.is_empty() || line.starts_with("--")
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParsedName {
    pub version: u64,
    pub description: String,
    pub prefix_width: usize,
}

/// Split `NNN_description.sql` into its numeric version and description.
pub fn parse_file_name(name: &str) -> Result<ParsedName, MigrationError> {
    let stem = name
        .strip_suffix(".sql")
        .ok_or_else(|| MigrationError::invalid_name(name, "expected a .sql extension"))?;

    let digits: &str = {
        let end = stem
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(stem.len());
        &stem[..end]
    };

    if digits.is_empty() {
        return Err(MigrationError::invalid_name(
            name,
            "missing numeric version prefix (e.g. 001_init.sql)",
        ));
    }

    let version = digits
        .parse::<u64>()
        .map_err(|e| MigrationError::invalid_name(name, format!("bad version prefix: {e}")))?;
    if version > MAX_VERSION {
        return Err(MigrationError::invalid_name(
            name,
            format!("version prefix exceeds the ledger maximum {MAX_VERSION}"),
        ));
    }

    let description = stem[digits.len()..]
        .trim_start_matches(['_', '-', '.'])
        .to_string();

    Ok(ParsedName {
        version,
        description,
        prefix_width: digits.len(),
    })
}

pub fn checksum(sql: &str) -> String {
    format!("{:032x}", xxh3_128(sql.as_bytes()))
}

/// Only comment lines before the first statement are inspected.
pub fn transaction_mode(sql: &str) -> TransactionMode {
    for line in sql.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(comment) = line.strip_prefix("--") else {
            break;
        };
        if comment
            .trim()
            .eq_ignore_ascii_case(NO_TRANSACTION_DIRECTIVE)
        {
            return TransactionMode::NoTransaction;
        }
    }
    TransactionMode::Transactional
}

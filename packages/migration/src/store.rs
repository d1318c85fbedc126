use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::MigrationError;
use crate::unit::MigrationUnit;

/// Directory of `*.sql` migration units.
#[derive(Debug, Clone)]
pub struct MigrationStore {
    dir: PathBuf,
}

impl MigrationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load every unit, ordered by `(version, name)`.
    ///
    /// A missing directory is not an error; it yields no units.
    pub fn load(&self) -> Result<Vec<MigrationUnit>, MigrationError> {
        if !self.dir.is_dir() {
            warn!(dir = %self.dir.display(), "migration directory not found");
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| MigrationError::io(&self.dir, e))?;

        let mut units = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MigrationError::io(&self.dir, e))?;
            let path = entry.path();

            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("sql") {
                continue;
            }

            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                return Err(MigrationError::invalid_name(
                    path.display().to_string(),
                    "file name is not valid UTF-8",
                ));
            };

            let sql = fs::read_to_string(&path).map_err(|e| MigrationError::io(&path, e))?;
            units.push(MigrationUnit::from_parts(name, sql)?);
        }

        sort_units(&mut units)?;

        debug!(dir = %self.dir.display(), count = units.len(), "migration store loaded");
        Ok(units)
    }
}

/// Numeric version first, file name second; rejects repeated versions.
pub fn sort_units(units: &mut [MigrationUnit]) -> Result<(), MigrationError> {
    units.sort_by(|a, b| a.version.cmp(&b.version).then_with(|| a.name.cmp(&b.name)));

    if let Some(pair) = units.windows(2).find(|w| w[0].version == w[1].version) {
        return Err(MigrationError::DuplicateVersion {
            version: pair[0].version,
            first: pair[0].name.clone(),
            second: pair[1].name.clone(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write(dir: &TempDir, name: &str, body: &str) {
        fs::write(dir.path().join(name), body).unwrap();
    }

    fn names(units: &[MigrationUnit]) -> Vec<&str> {
        units.iter().map(|u| u.name.as_str()).collect()
    }

    #[test]
    fn missing_directory_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = MigrationStore::new(tmp.path().join("nope"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn empty_directory_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(MigrationStore::new(tmp.path()).load().unwrap().is_empty());
    }

    #[test]
    fn orders_zero_padded_names_like_string_sort() {
        let tmp = TempDir::new().unwrap();
        write(&tmp, "010_c.sql", "");
        write(&tmp, "002_b.sql", "");
        write(&tmp, "001_a.sql", "");

        let units = MigrationStore::new(tmp.path()).load().unwrap();
        assert_eq!(names(&units), ["001_a.sql", "002_b.sql", "010_c.sql"]);
    }

    #[test]
    fn orders_unpadded_prefixes_numerically() {
        let tmp = TempDir::new().unwrap();
        write(&tmp, "10_late.sql", "");
        write(&tmp, "2_early.sql", "");

        let units = MigrationStore::new(tmp.path()).load().unwrap();
        assert_eq!(names(&units), ["2_early.sql", "10_late.sql"]);
    }

    #[test]
    fn ignores_non_sql_files_and_directories() {
        let tmp = TempDir::new().unwrap();
        write(&tmp, "001_a.sql", "");
        write(&tmp, "README.md", "notes");
        write(&tmp, "002_b.sql.bak", "");
        fs::create_dir(tmp.path().join("003_dir.sql")).unwrap();

        let units = MigrationStore::new(tmp.path()).load().unwrap();
        assert_eq!(names(&units), ["001_a.sql"]);
    }

    #[test]
    fn rejects_duplicate_versions() {
        let tmp = TempDir::new().unwrap();
        write(&tmp, "001_a.sql", "");
        write(&tmp, "1_b.sql", "");

        let err = MigrationStore::new(tmp.path()).load().unwrap_err();
        match err {
            MigrationError::DuplicateVersion { version, .. } => assert_eq!(version, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_unprefixed_sql_file() {
        let tmp = TempDir::new().unwrap();
        write(&tmp, "seed.sql", "");

        let err = MigrationStore::new(tmp.path()).load().unwrap_err();
        assert!(matches!(err, MigrationError::InvalidName { .. }));
    }
}

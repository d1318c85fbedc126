use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::MigrationError;
use crate::unit::{MigrationUnit, MAX_VERSION};

const MIN_PREFIX_WIDTH: usize = 3;

/// Lowercase ASCII alphanumerics; every other run of characters becomes `_`.
pub fn slugify(description: &str) -> String {
    let mut slug = String::with_capacity(description.len());
    for c in description.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

pub fn next_file_name(units: &[MigrationUnit], description: &str) -> Result<String, MigrationError> {
    let slug = slugify(description);
    if slug.is_empty() {
        return Err(MigrationError::invalid_name(
            description,
            "description must contain at least one letter or digit",
        ));
    }

    let latest = units.iter().map(|u| u.version).max().unwrap_or(0);
    let next = latest
        .checked_add(1)
        .filter(|v| *v <= MAX_VERSION)
        .ok_or_else(|| {
            MigrationError::invalid_name(
                description,
                format!("no version left after {latest}"),
            )
        })?;
    let width = units
        .iter()
        .map(|u| u.prefix_width)
        .max()
        .unwrap_or(0)
        .max(MIN_PREFIX_WIDTH);

    Ok(format!("{next:0width$}_{slug}.sql"))
}

/// Write a new unit into `dir`. Never overwrites an existing file.
pub fn create(
    dir: &Path,
    units: &[MigrationUnit],
    description: &str,
    body: &str,
) -> Result<PathBuf, MigrationError> {
    let file_name = next_file_name(units, description)?;

    fs::create_dir_all(dir).map_err(|e| MigrationError::io(dir, e))?;
    let path = dir.join(&file_name);

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => MigrationError::AlreadyExists(path.clone()),
            _ => MigrationError::io(&path, e),
        })?;

    let contents = if body.is_empty() {
        format!("-- {file_name}\n")
    } else {
        format!("-- {file_name}\n\n{body}")
    };
    file.write_all(contents.as_bytes())
        .map_err(|e| MigrationError::io(&path, e))?;

    info!("Created {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::store::MigrationStore;

    fn unit(name: &str) -> MigrationUnit {
        MigrationUnit::from_parts(name, String::new()).unwrap()
    }

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Add Genesis wizard!"), "add_genesis_wizard");
        assert_eq!(slugify("  --concept   links-- "), "concept_links");
        assert_eq!(slugify("???"), "");
    }

    #[test]
    fn first_file_uses_minimum_width() {
        assert_eq!(next_file_name(&[], "init").unwrap(), "001_init.sql");
    }

    #[test]
    fn continues_after_highest_version_with_existing_width() {
        let units = [unit("0001_a.sql"), unit("0009_b.sql")];
        assert_eq!(next_file_name(&units, "c").unwrap(), "0010_c.sql");
    }

    #[test]
    fn errors_instead_of_overflowing_past_the_last_version() {
        let units = [unit(&format!("{MAX_VERSION}_last.sql"))];
        let err = next_file_name(&units, "next").unwrap_err();
        assert!(matches!(err, MigrationError::InvalidName { .. }));
        assert!(err.to_string().contains("no version left"));
    }

    #[test]
    fn rejects_empty_slug() {
        assert!(next_file_name(&[], "!!!").is_err());
    }

    #[test]
    fn create_writes_header_and_body_then_loads() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("migrations");

        let path = create(&dir, &[], "init", "CREATE TABLE t (id INTEGER);\n").unwrap();
        assert_eq!(path.file_name().unwrap(), "001_init.sql");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("-- 001_init.sql\n"));
        assert!(contents.contains("CREATE TABLE t"));

        let units = MigrationStore::new(&dir).load().unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].version, 1);
    }

    #[test]
    fn create_refuses_to_overwrite() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("001_init.sql"), "keep me").unwrap();

        let err = create(tmp.path(), &[], "init", "").unwrap_err();
        assert!(matches!(err, MigrationError::AlreadyExists(_)));
        let kept = std::fs::read_to_string(tmp.path().join("001_init.sql")).unwrap();
        assert_eq!(kept, "keep me");
    }
}

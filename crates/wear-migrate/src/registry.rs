//! Registered migrations.
//!
//! A [`Registry`] is an explicit value owned by the [`Migrator`](crate::Migrator):
//! versions are registered in code or loaded from a directory of
//! `<version>.sql` / `<version>_down.sql` files, then iterated in ascending
//! version order.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Utc};
use tracing::debug;

use crate::error::{MigrateError, Result};

/// `strftime` format of a migration version.
pub const VERSION_TIME_FORMAT: &str = "%Y-%m-%d:%H:%M:%S";

/// Version of the default schema, which is only applied on request. Sorts
/// before every timestamp version.
pub const DEFAULT_VERSION: &str = "0000-00-00:00:00:00";

/// Alias accepted wherever a version is named.
pub const DEFAULT_ALIAS: &str = "default";

const DOWN_SUFFIX: &str = "_down.sql";

/// Maps the `default` alias to [`DEFAULT_VERSION`].
#[must_use]
pub fn canonical_version(version: &str) -> &str {
    if version == DEFAULT_ALIAS {
        DEFAULT_VERSION
    } else {
        version
    }
}

/// Checks that `name` is a timestamp version or the default version.
///
/// # Errors
///
/// Returns [`MigrateError::InvalidVersion`].
pub fn validate_version(name: &str) -> Result<()> {
    if name == DEFAULT_VERSION {
        return Ok(());
    }
    NaiveDateTime::parse_from_str(name, VERSION_TIME_FORMAT)
        .map(|_| ())
        .map_err(|e| MigrateError::InvalidVersion {
            name: name.to_string(),
            message: e.to_string(),
        })
}

/// A version for a migration created now.
#[must_use]
pub fn new_version() -> String {
    Utc::now().format(VERSION_TIME_FORMAT).to_string()
}

/// One forward/reverse SQL pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    version: String,
    up_sql: String,
    down_sql: String,
}

impl Migration {
    /// Version name.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Forward SQL.
    #[must_use]
    pub fn up_sql(&self) -> &str {
        &self.up_sql
    }

    /// Reverse SQL, empty when the migration cannot be rolled back.
    #[must_use]
    pub fn down_sql(&self) -> &str {
        &self.down_sql
    }

    /// Whether this is the default schema.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.version == DEFAULT_VERSION
    }
}

/// Migrations by version.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    migrations: BTreeMap<String, Migration>,
    path: Option<PathBuf>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a migration.
    ///
    /// # Panics
    ///
    /// Panics when `version` is already registered.
    pub fn register(&mut self, version: &str, up_sql: &str, down_sql: &str) {
        if let Err(e) = self.try_register(version, up_sql, down_sql) {
            panic!("{e}");
        }
    }

    /// Registers a migration.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::DuplicateVersion`] when `version` is already
    /// registered.
    pub fn try_register(&mut self, version: &str, up_sql: &str, down_sql: &str) -> Result<()> {
        let version = canonical_version(version);
        if self.migrations.contains_key(version) {
            return Err(MigrateError::DuplicateVersion(version.to_string()));
        }
        self.migrations.insert(
            version.to_string(),
            Migration {
                version: version.to_string(),
                up_sql: up_sql.to_string(),
                down_sql: down_sql.to_string(),
            },
        );
        Ok(())
    }

    /// Loads every `<version>.sql` file of `dir`, with its optional
    /// `<version>_down.sql` companion.
    ///
    /// # Errors
    ///
    /// Returns IO errors and [`MigrateError::InvalidVersion`] for a file name
    /// that is not a version.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut registry = Self {
            migrations: BTreeMap::new(),
            path: Some(dir.to_path_buf()),
        };

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.ends_with(DOWN_SUFFIX) {
                continue;
            }
            let Some(version) = file_name.strip_suffix(".sql") else {
                continue;
            };
            validate_version(version)?;

            let up_sql = fs::read_to_string(entry.path())?;
            let down_path = dir.join(format!("{version}{DOWN_SUFFIX}"));
            let down_sql = if down_path.exists() {
                fs::read_to_string(&down_path)?
            } else {
                String::new()
            };
            debug!(version = %version, "Registered migration");
            registry.try_register(version, &up_sql, &down_sql)?;
        }

        Ok(registry)
    }

    /// Migration registered under `version` (or the `default` alias).
    #[must_use]
    pub fn get(&self, version: &str) -> Option<&Migration> {
        self.migrations.get(canonical_version(version))
    }

    /// Whether `version` is registered.
    #[must_use]
    pub fn contains(&self, version: &str) -> bool {
        self.get(version).is_some()
    }

    /// Migrations in ascending version order.
    pub fn migrations(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.values()
    }

    /// Versions in ascending order.
    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.migrations.keys().map(String::as_str)
    }

    /// Number of registered migrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Directory the registry was loaded from.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Writes placeholder `<version>.sql` and `<version>_down.sql` files into
/// `dir` and returns the version.
///
/// # Errors
///
/// Returns the IO error; the forward file is removed again when the reverse
/// file cannot be written.
pub fn new_migration(dir: impl AsRef<Path>, is_default: bool) -> Result<String> {
    let dir = dir.as_ref();
    let version = if is_default {
        DEFAULT_VERSION.to_string()
    } else {
        new_version()
    };

    let up_path = dir.join(format!("{version}.sql"));
    fs::write(&up_path, "-- paste here migration sql code")?;
    if let Err(e) = fs::write(
        dir.join(format!("{version}{DOWN_SUFFIX}")),
        "-- paste here migration rollback sql code",
    ) {
        let _ = fs::remove_file(&up_path);
        return Err(e.into());
    }
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_are_sorted() {
        let mut registry = Registry::new();
        registry.register("2024-05-01:10:00:00", "up2", "");
        registry.register("default", "up0", "");
        registry.register("2023-01-01:00:00:00", "up1", "down1");

        let versions: Vec<_> = registry.versions().collect();
        assert_eq!(
            versions,
            [DEFAULT_VERSION, "2023-01-01:00:00:00", "2024-05-01:10:00:00"]
        );
        assert!(registry.get("default").unwrap().is_default());
        assert_eq!(registry.get("2023-01-01:00:00:00").unwrap().down_sql(), "down1");
    }

    #[test]
    fn test_try_register_duplicate() {
        let mut registry = Registry::new();
        registry.try_register("2023-01-01:00:00:00", "a", "").unwrap();
        assert!(matches!(
            registry.try_register("2023-01-01:00:00:00", "b", ""),
            Err(MigrateError::DuplicateVersion(v)) if v == "2023-01-01:00:00:00"
        ));
    }

    #[test]
    #[should_panic(expected = "has already been registered")]
    fn test_register_duplicate_panics() {
        let mut registry = Registry::new();
        registry.register(DEFAULT_VERSION, "a", "");
        registry.register("default", "b", "");
    }

    #[test]
    fn test_validate_version() {
        assert!(validate_version("2019-02-28:17:45:01").is_ok());
        assert!(validate_version(DEFAULT_VERSION).is_ok());
        assert!(validate_version("2019-02-30:17:45:01").is_err());
        assert!(validate_version("001_init").is_err());
        assert!(validate_version(&new_version()).is_ok());
    }
}

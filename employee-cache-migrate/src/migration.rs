//! Sources of migration scripts.

use crate::ErrorPtr;
use itertools::Itertools;
#[cfg(test)]
use mockall::automock;
use refinery_core::{find_migration_files, MigrationType};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Thread-safe pointer to a [MigrationSource].
pub type MigrationSourcePtr = Arc<dyn MigrationSource + Send + Sync>;

/// A single migration script, before placeholder resolution. The name follows the refinery
/// convention of `V{version}__{name}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationScript {
    pub name: String,
    pub sql: String,
}

impl MigrationScript {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// A source for [MigrationScripts](MigrationScript).
#[cfg_attr(test, automock)]
pub trait MigrationSource {
    /// Provides migration scripts from this source.
    fn scripts(&self) -> Result<Vec<MigrationScript>, ErrorPtr>;
}

/// Scripts compiled into the binary, usually with `include_str!`.
///
/// ```
/// use employee_cache_migrate::migration::EmbeddedMigrationSource;
///
/// let source = EmbeddedMigrationSource::new(&[(
///     "V1__create_test",
///     "CREATE TABLE test (id INTEGER PRIMARY KEY);",
/// )]);
/// ```
#[derive(Clone, Debug)]
pub struct EmbeddedMigrationSource {
    scripts: &'static [(&'static str, &'static str)],
}

impl EmbeddedMigrationSource {
    pub const fn new(scripts: &'static [(&'static str, &'static str)]) -> Self {
        Self { scripts }
    }
}

impl MigrationSource for EmbeddedMigrationSource {
    fn scripts(&self) -> Result<Vec<MigrationScript>, ErrorPtr> {
        Ok(self
            .scripts
            .iter()
            .map(|(name, sql)| MigrationScript::new(*name, *sql))
            .collect())
    }
}

/// Scripts read at runtime from `*.sql` files in a directory (searched recursively).
#[derive(Clone, Debug)]
pub struct FileMigrationSource {
    location: PathBuf,
}

impl FileMigrationSource {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
        }
    }

    fn read_script(path: &Path) -> Result<MigrationScript, ErrorPtr> {
        let name = path
            .file_stem()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                Arc::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Cannot extract migration name: {}", path.display()),
                )) as ErrorPtr
            })?;

        let sql = fs::read_to_string(path).map_err(|error| Arc::new(error) as ErrorPtr)?;
        Ok(MigrationScript::new(name, sql))
    }
}

impl MigrationSource for FileMigrationSource {
    fn scripts(&self) -> Result<Vec<MigrationScript>, ErrorPtr> {
        debug!("Looking for migrations in {}", self.location.display());

        find_migration_files(&self.location, MigrationType::Sql)
            .map_err(|error| Arc::new(error) as ErrorPtr)?
            .map(|path| Self::read_script(&path))
            .try_collect()
    }
}

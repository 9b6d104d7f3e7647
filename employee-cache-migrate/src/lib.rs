//! SQL migrations based on [refinery](https://crates.io/crates/refinery), extended with Flyway-like
//! placeholders.
//!
//! Migration scripts are collected from [MigrationSources](migration::MigrationSource), treated as
//! templates in which `${key}` placeholders are replaced with values gathered from
//! [PlaceholderProviders](placeholder::PlaceholderProvider), and finally applied by
//! [MigrationRunnerExecutors](runner::MigrationRunnerExecutor) owning concrete database clients.
//! The whole process is exposed through [SchemaMigrator](runner::SchemaMigrator), which is what an
//! application needs to run before touching the database.

use std::error::Error;
use std::sync::Arc;

pub mod config;
pub mod migration;
pub mod placeholder;
pub mod runner;

/// Re-export of refinery core types.
pub mod refinery {
    pub use refinery_core::*;
}

/// Type-erased error used at trait boundaries.
pub type ErrorPtr = Arc<dyn Error + Send + Sync>;

//! Module related to running migrations.

use crate::config::MigrationConfig;
use crate::migration::MigrationSourcePtr;
use crate::placeholder::{
    PlaceholderError, PlaceholderProviderPtr, PlaceholderResolver, Placeholders,
};
use crate::refinery::{Migration, Runner};
use crate::ErrorPtr;
use futures::future::{BoxFuture, FutureExt};
use itertools::Itertools;
#[cfg(test)]
use mockall::automock;
use rusqlite::Connection;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Thread-safe pointer to a [MigrationRunnerExecutor].
pub type MigrationRunnerExecutorPtr = Arc<dyn MigrationRunnerExecutor + Send + Sync>;

#[derive(Error, Clone, Debug)]
pub enum MigrationError {
    #[error("Error retrieving migration scripts: {0}")]
    Source(ErrorPtr),
    #[error("Error retrieving placeholders: {0}")]
    PlaceholderProvider(ErrorPtr),
    #[error(transparent)]
    Placeholder(#[from] PlaceholderError),
    #[error("Invalid migration {name}: {error}")]
    InvalidMigration { name: String, error: ErrorPtr },
    #[error("Error applying migrations: {0}")]
    Executor(ErrorPtr),
}

/// Applies the database schema. Anything depending on the schema needs to wait for
/// [migrate](SchemaMigrator::migrate) to finish successfully.
#[cfg_attr(test, automock)]
pub trait SchemaMigrator {
    fn migrate(&self) -> BoxFuture<'_, Result<(), MigrationError>>;
}

/// Since [Runner] requires a concrete DB client to execute migrations, an abstraction over all
/// possible clients needs to exist, which will execute the actual run operation with a concrete
/// client. This trait is such abstraction. All executors given to a [MigrationRunner] are called in
/// registration order.
#[cfg_attr(test, automock)]
pub trait MigrationRunnerExecutor {
    /// Runs migrations contained in the given [Runner] by passing a concrete DB client.
    fn run_migrations(&self, runner: Arc<Runner>) -> BoxFuture<'_, Result<(), ErrorPtr>>;
}

/// Executor applying migrations to a shared SQLite connection.
#[derive(Clone, Debug)]
pub struct SqliteMigrationRunnerExecutor {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteMigrationRunnerExecutor {
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }
}

impl MigrationRunnerExecutor for SqliteMigrationRunnerExecutor {
    fn run_migrations(&self, runner: Arc<Runner>) -> BoxFuture<'_, Result<(), ErrorPtr>> {
        async move {
            let mut connection = self.connection.lock().await;
            let report = runner
                .run(&mut *connection)
                .map_err(|error| Arc::new(error) as ErrorPtr)?;

            for migration in report.applied_migrations() {
                debug!("Applied migration {}.", migration);
            }

            Ok(())
        }
        .boxed()
    }
}

/// Gathers migration scripts and placeholders, and passes the resolved migrations to executors.
pub struct MigrationRunner {
    config: MigrationConfig,
    sources: Vec<MigrationSourcePtr>,
    placeholder_providers: Vec<PlaceholderProviderPtr>,
    executors: Vec<MigrationRunnerExecutorPtr>,
}

impl MigrationRunner {
    pub fn new(
        config: MigrationConfig,
        sources: Vec<MigrationSourcePtr>,
        placeholder_providers: Vec<PlaceholderProviderPtr>,
        executors: Vec<MigrationRunnerExecutorPtr>,
    ) -> Self {
        Self {
            config,
            sources,
            placeholder_providers,
            executors,
        }
    }

    async fn collect_placeholders(&self) -> Result<Placeholders, MigrationError> {
        let mut placeholders = Placeholders::default();
        for provider in &self.placeholder_providers {
            placeholders.extend(
                provider
                    .placeholders()
                    .await
                    .map_err(MigrationError::PlaceholderProvider)?,
            );
        }

        Ok(placeholders)
    }

    fn prepare_migrations(
        &self,
        placeholders: Placeholders,
    ) -> Result<Vec<Migration>, MigrationError> {
        let scripts: Vec<_> = self
            .sources
            .iter()
            .map(|source| source.scripts())
            .flatten_ok()
            .try_collect()
            .map_err(MigrationError::Source)?;

        let resolver = if self.config.placeholder_replacement {
            Some(PlaceholderResolver::new(
                self.config.placeholder_prefix.clone(),
                self.config.placeholder_suffix.clone(),
                placeholders,
            ))
        } else {
            None
        };

        scripts
            .into_iter()
            .map(|script| -> Result<Migration, MigrationError> {
                let script = match &resolver {
                    Some(resolver) => resolver.resolve(&script)?,
                    None => script,
                };

                Migration::unapplied(&script.name, &script.sql).map_err(|error| {
                    MigrationError::InvalidMigration {
                        name: script.name.clone(),
                        error: Arc::new(error),
                    }
                })
            })
            .try_collect()
    }

    fn create_runner(&self, migrations: &[Migration]) -> Runner {
        let mut runner = Runner::new(migrations)
            .set_target(self.config.target.into())
            .set_grouped(self.config.grouped)
            .set_abort_divergent(self.config.abort_divergent)
            .set_abort_missing(self.config.abort_missing);

        if !self.config.migration_table_name.is_empty() {
            runner.set_migration_table_name(&self.config.migration_table_name);
        }

        runner
    }
}

impl SchemaMigrator for MigrationRunner {
    fn migrate(&self) -> BoxFuture<'_, Result<(), MigrationError>> {
        async {
            if !self.config.run_migrations_on_start {
                info!("Not running migrations, since they are disabled on start.");
                return Ok(());
            }

            if self.sources.is_empty() {
                info!("Not running any migrations, since no sources are available.");
                return Ok(());
            }

            let placeholders = self.collect_placeholders().await?;
            debug!("Resolved {} placeholders.", placeholders.len());

            let migrations = self.prepare_migrations(placeholders)?;

            info!("Running {} migrations...", migrations.len());

            let runner = Arc::new(self.create_runner(&migrations));
            for executor in &self.executors {
                executor
                    .run_migrations(runner.clone())
                    .await
                    .map_err(MigrationError::Executor)?;
            }

            debug!("Done running migrations.");

            Ok(())
        }
        .boxed()
    }
}

//! Application configuration is represented by [ApplicationConfig], while migrations are configured
//! by [MigrationConfig] under the `migration` key of the same sources.
//!
//! By default, the config is created with opinionated default values, which can then be overwritten
//! by the `employee-cache.json` file and then by environment variables prefixed with
//! `EMPLOYEE_CACHE`, using `__` as the separator, e.g. `EMPLOYEE_CACHE__CACHED_EMPLOYEE_ID=2` or
//! `EMPLOYEE_CACHE__MIGRATION__PLACEHOLDERS__CLIENT=local`.

use config::{Config, ConfigError, Environment, File};
use employee_cache_migrate::config::MigrationConfig;
use employee_cache_migrate::ErrorPtr;
use serde::Deserialize;

/// Prefix of environment variables overriding the config.
pub const CONFIG_ENV_PREFIX: &str = "EMPLOYEE_CACHE";

/// Name of the default config file.
pub const CONFIG_FILE: &str = "employee-cache.json";

/// SQLite path denoting a private, in-memory database.
pub const IN_MEMORY_DATABASE: &str = ":memory:";

/// Which [EmployeeDao](crate::dao::EmployeeDao) implementation to use.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MapperKind {
    /// Query declared inline with the accessor.
    #[default]
    Inline,
    /// Query looked up by id in a mapper definition.
    Statement,
}

/// Application configuration.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct ApplicationConfig {
    /// Should a default tracing logger be installed in the scope of the application.
    pub install_tracing_logger: bool,
    /// Path to the SQLite database.
    pub database_path: String,
    /// Id of the employee fetched into the cache on startup.
    pub cached_employee_id: i64,
    /// Data accessor variant.
    pub mapper: MapperKind,
    /// Path to a JSON mapper definition replacing the built-in one.
    pub mapper_definition: Option<String>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            install_tracing_logger: true,
            database_path: IN_MEMORY_DATABASE.to_string(),
            cached_employee_id: 1,
            mapper: MapperKind::default(),
            mapper_definition: None,
        }
    }
}

impl From<OptionalApplicationConfig> for ApplicationConfig {
    fn from(value: OptionalApplicationConfig) -> Self {
        let default = Self::default();
        Self {
            install_tracing_logger: value
                .install_tracing_logger
                .unwrap_or(default.install_tracing_logger),
            database_path: value.database_path.unwrap_or(default.database_path),
            cached_employee_id: value
                .cached_employee_id
                .unwrap_or(default.cached_employee_id),
            mapper: value.mapper.unwrap_or(default.mapper),
            mapper_definition: value.mapper_definition.or(default.mapper_definition),
        }
    }
}

impl ApplicationConfig {
    /// Loads the config from the default file and environment.
    pub fn init_from_environment() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(CONFIG_ENV_PREFIX).separator("__"))
            .build()
            .and_then(|config| config.try_deserialize::<OptionalApplicationConfig>())
            .map(|config| config.into())
    }
}

/// Loads the migration config from the same sources as [ApplicationConfig].
pub fn migration_config_from_environment() -> Result<MigrationConfig, ErrorPtr> {
    MigrationConfig::load(CONFIG_FILE, CONFIG_ENV_PREFIX)
}

#[derive(Deserialize)]
struct OptionalApplicationConfig {
    install_tracing_logger: Option<bool>,
    database_path: Option<String>,
    cached_employee_id: Option<i64>,
    mapper: Option<MapperKind>,
    mapper_definition: Option<String>,
}

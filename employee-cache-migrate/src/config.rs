//! Migration configuration is represented by [MigrationConfig].
//!
//! By default, the config is created with opinionated default values, which can then be overwritten
//! by values from a configuration file under the `migration` key, and then by environment variables
//! (e.g. `PREFIX__MIGRATION__PLACEHOLDERS__CLIENT`). List values such as `locations` can be given
//! in the environment as comma-separated strings (`PREFIX__MIGRATION__LOCATIONS=db/a,db/b`).

use crate::placeholder::Placeholders;
use crate::ErrorPtr;
use config::{Config, Environment, File, Map};
use serde::de::{SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt::{Formatter, Result as FmtResult};
use std::sync::Arc;

/// A [Deserialize] version of [Target](refinery_core::Target).
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub enum Target {
    /// Latest version.
    Latest,
    /// User-provided version.
    Version(u32),
    /// Don't run migrations, just update the migration table to latest version.
    Fake,
    /// Don't run migrations, just update the migration table to user-provided version.
    FakeVersion(u32),
}

impl From<Target> for refinery_core::Target {
    fn from(value: Target) -> Self {
        match value {
            Target::Latest => refinery_core::Target::Latest,
            Target::Version(version) => refinery_core::Target::Version(version),
            Target::Fake => refinery_core::Target::Fake,
            Target::FakeVersion(version) => refinery_core::Target::FakeVersion(version),
        }
    }
}

/// Migration configuration.
#[non_exhaustive]
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Should migrations run on application start.
    pub run_migrations_on_start: bool,
    /// The target version up to which migrate.
    pub target: Target,
    /// Group migrations in a single transaction.
    pub grouped: bool,
    /// Should abort migration process if divergent migrations are found i.e. applied migrations
    /// with the same version but different name or checksum from the ones on the filesystem.
    pub abort_divergent: bool,
    /// Should abort if missing migrations are found i.e. applied migrations that are not found on
    /// the filesystem, or migrations found on filesystem with a version inferior to the last one
    /// applied but not applied
    pub abort_missing: bool,
    /// Table name for migration data.
    pub migration_table_name: String,
    /// Additional directories searched for `*.sql` migration files.
    #[serde(deserialize_with = "deserialize_locations")]
    pub locations: Vec<String>,
    /// Placeholder values available to migration scripts.
    pub placeholders: Placeholders,
    /// Prefix marking the start of a placeholder.
    pub placeholder_prefix: String,
    /// Suffix marking the end of a placeholder.
    pub placeholder_suffix: String,
    /// Should placeholders be replaced at all. When disabled, scripts are applied verbatim.
    pub placeholder_replacement: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            run_migrations_on_start: true,
            target: Target::Latest,
            grouped: false,
            abort_divergent: true,
            abort_missing: true,
            migration_table_name: "refinery_schema_history".to_string(),
            locations: vec![],
            placeholders: Placeholders::default(),
            placeholder_prefix: "${".to_string(),
            placeholder_suffix: "}".to_string(),
            placeholder_replacement: true,
        }
    }
}

impl MigrationConfig {
    /// Loads the config from an optional `config_file` (without extension) and environment
    /// variables starting with `env_prefix`.
    pub fn load(config_file: &str, env_prefix: &str) -> Result<Self, ErrorPtr> {
        Self::load_with_variables(config_file, env_prefix, None)
    }

    /// Like [load](Self::load), but reads environment variables from `variables` instead of the
    /// process environment, when given.
    pub fn load_with_variables(
        config_file: &str,
        env_prefix: &str,
        variables: Option<Map<String, String>>,
    ) -> Result<Self, ErrorPtr> {
        Config::builder()
            .add_source(File::with_name(config_file).required(false))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .source(variables),
            )
            .build()
            .and_then(|config| config.try_deserialize::<MigrationConfigWrapper>())
            .map(|config| config.migration)
            .map_err(|error| Arc::new(error) as ErrorPtr)
    }
}

// Environment variables are always strings, so a list may arrive either as a sequence (files) or
// as a comma-separated string.
fn deserialize_locations<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct LocationsVisitor;

    impl<'de> Visitor<'de> for LocationsVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut Formatter) -> FmtResult {
            formatter.write_str("a sequence of paths or a comma-separated string")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value
                .split(',')
                .map(str::trim)
                .filter(|location| !location.is_empty())
                .map(str::to_string)
                .collect())
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut locations = vec![];
            while let Some(location) = seq.next_element::<String>()? {
                locations.push(location);
            }

            Ok(locations)
        }
    }

    deserializer.deserialize_any(LocationsVisitor)
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct MigrationConfigWrapper {
    migration: MigrationConfig,
}

#[cfg(test)]
mod tests {
    use crate::config::{MigrationConfig, Target};
    use config::Map;

    fn load(variables: &[(&str, &str)]) -> MigrationConfig {
        MigrationConfig::load_with_variables(
            "nonexistent-migration-config",
            "TEST",
            Some(Map::from_iter(variables.iter().map(|(key, value)| {
                (key.to_string(), value.to_string())
            }))),
        )
        .unwrap()
    }

    #[test]
    fn should_use_defaults_without_sources() {
        let config = MigrationConfig::load("nonexistent-migration-config", "NONEXISTENT_PREFIX")
            .unwrap();

        assert!(config.run_migrations_on_start);
        assert_eq!(config.target, Target::Latest);
        assert_eq!(config.migration_table_name, "refinery_schema_history");
        assert_eq!(config.placeholder_prefix, "${");
        assert_eq!(config.placeholder_suffix, "}");
        assert!(config.placeholders.is_empty());
    }

    #[test]
    fn should_convert_target() {
        assert!(matches!(
            refinery_core::Target::from(Target::Version(3)),
            refinery_core::Target::Version(3)
        ));
        assert!(matches!(
            refinery_core::Target::from(Target::Fake),
            refinery_core::Target::Fake
        ));
    }

    #[test]
    fn should_read_locations_from_environment() {
        let config = load(&[("TEST__MIGRATION__LOCATIONS", "db/extra, /tmp/more,")]);

        assert_eq!(config.locations, vec!["db/extra", "/tmp/more"]);
    }

    #[test]
    fn should_keep_placeholder_values_as_strings() {
        let config = load(&[
            ("TEST__MIGRATION__PLACEHOLDERS__CLIENT", "staging"),
            ("TEST__MIGRATION__PLACEHOLDERS__BUILD", "007"),
        ]);

        assert_eq!(config.placeholders["client"], "staging");
        assert_eq!(config.placeholders["build"], "007");
        assert!(config.locations.is_empty());
    }
}

//! Placeholders allow parameterizing migration scripts with values known only at runtime, e.g.
//! `INSERT INTO deployment (client) VALUES ('${client}')`. Values are contributed by
//! [PlaceholderProviders](PlaceholderProvider) before migrations start, and then substituted into
//! every script by a [PlaceholderResolver].

use crate::config::MigrationConfig;
use crate::migration::MigrationScript;
use crate::ErrorPtr;
use futures::future::{BoxFuture, FutureExt};
use fxhash::FxHashMap;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Placeholder name to value map.
pub type Placeholders = FxHashMap<String, String>;

/// Thread-safe pointer to a [PlaceholderProvider].
pub type PlaceholderProviderPtr = Arc<dyn PlaceholderProvider + Send + Sync>;

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum PlaceholderError {
    #[error("No value provided for placeholder '{placeholder}' in migration {migration}")]
    Unresolved {
        migration: String,
        placeholder: String,
    },
    #[error("Unterminated placeholder in migration {migration} at offset {offset}")]
    Unterminated { migration: String, offset: usize },
}

/// Contributes placeholder values. Providers are consulted in registration order, so values from
/// later providers override earlier ones.
#[cfg_attr(test, automock)]
pub trait PlaceholderProvider {
    fn placeholders(&self) -> BoxFuture<'_, Result<Placeholders, ErrorPtr>>;
}

/// Provides placeholders from [MigrationConfig], i.e. from the config file or environment.
#[derive(Clone, Debug, Default)]
pub struct ConfigPlaceholderProvider {
    placeholders: Placeholders,
}

impl ConfigPlaceholderProvider {
    pub fn new(config: &MigrationConfig) -> Self {
        Self {
            placeholders: config.placeholders.clone(),
        }
    }
}

impl PlaceholderProvider for ConfigPlaceholderProvider {
    fn placeholders(&self) -> BoxFuture<'_, Result<Placeholders, ErrorPtr>> {
        async { Ok(self.placeholders.clone()) }.boxed()
    }
}

/// Provides a fixed set of placeholders registered in code.
#[derive(Clone, Debug, Default)]
pub struct StaticPlaceholderProvider {
    placeholders: Placeholders,
}

impl StaticPlaceholderProvider {
    pub fn new<K, V>(placeholders: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            placeholders: placeholders
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

impl PlaceholderProvider for StaticPlaceholderProvider {
    fn placeholders(&self) -> BoxFuture<'_, Result<Placeholders, ErrorPtr>> {
        async { Ok(self.placeholders.clone()) }.boxed()
    }
}

/// Stand-in for a remote configuration manager. Doesn't contribute anything, but marks the place
/// where externally sourced values would be fetched.
#[derive(Clone, Debug)]
pub struct RemoteConfigPlaceholderProvider {
    source: String,
}

impl RemoteConfigPlaceholderProvider {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl PlaceholderProvider for RemoteConfigPlaceholderProvider {
    fn placeholders(&self) -> BoxFuture<'_, Result<Placeholders, ErrorPtr>> {
        async {
            debug!("No remote placeholders available from {}.", self.source);
            Ok(Placeholders::default())
        }
        .boxed()
    }
}

/// Substitutes placeholders in migration scripts.
#[derive(Clone, Debug)]
pub struct PlaceholderResolver {
    prefix: String,
    suffix: String,
    placeholders: Placeholders,
}

impl PlaceholderResolver {
    pub fn new(
        prefix: impl Into<String>,
        suffix: impl Into<String>,
        placeholders: Placeholders,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
            placeholders,
        }
    }

    /// Returns a copy of the script with all placeholders replaced. An empty prefix or suffix
    /// disables replacement.
    pub fn resolve(&self, script: &MigrationScript) -> Result<MigrationScript, PlaceholderError> {
        if self.prefix.is_empty() || self.suffix.is_empty() {
            return Ok(script.clone());
        }

        let mut resolved = String::with_capacity(script.sql.len());
        let mut rest = script.sql.as_str();
        let mut offset = 0;

        while let Some(start) = rest.find(&self.prefix) {
            resolved.push_str(&rest[..start]);

            let key_start = start + self.prefix.len();
            let key_len = rest[key_start..].find(&self.suffix).ok_or_else(|| {
                PlaceholderError::Unterminated {
                    migration: script.name.clone(),
                    offset: offset + start,
                }
            })?;

            let key = &rest[key_start..key_start + key_len];
            let value = self.placeholders.get(key).ok_or_else(|| {
                PlaceholderError::Unresolved {
                    migration: script.name.clone(),
                    placeholder: key.to_string(),
                }
            })?;

            resolved.push_str(value);

            let consumed = key_start + key_len + self.suffix.len();
            offset += consumed;
            rest = &rest[consumed..];
        }

        resolved.push_str(rest);
        Ok(MigrationScript::new(script.name.clone(), resolved))
    }
}

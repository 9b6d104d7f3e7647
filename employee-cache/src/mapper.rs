//! Mapped SQL statements, kept outside of code in a JSON mapper definition:
//!
//! ```json
//! {
//!   "namespace": "employee",
//!   "statements": {
//!     "getEmployeeById": "SELECT id, name FROM employee WHERE id = #{id}"
//!   }
//! }
//! ```
//!
//! `#{name}` markers become named SQLite parameters, bound by name when a statement is executed
//! through a [SqlSession].

use crate::dao::{select_single, with_connection, DaoError, FromRow, SharedConnection};
use fxhash::FxHashMap;
use rusqlite::types::Value;
use rusqlite::ToSql;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Mapper definition compiled into the application.
pub const DEFAULT_MAPPER_DEFINITION: &str = include_str!("../mappers/employee.json");

const PARAMETER_PREFIX: &str = "#{";
const PARAMETER_SUFFIX: char = '}';

#[derive(Error, Debug)]
pub enum MapperError {
    #[error("Error reading mapper definition {path}: {error}")]
    Io {
        path: String,
        error: std::io::Error,
    },
    #[error("Invalid mapper definition: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Unterminated parameter in statement {0}")]
    UnterminatedParameter(String),
    #[error("Invalid parameter '{parameter}' in statement {statement}")]
    InvalidParameter { statement: String, parameter: String },
}

/// Named SQL statements grouped under a namespace.
#[derive(Clone, Debug, Deserialize)]
pub struct MapperDefinition {
    pub namespace: String,
    pub statements: FxHashMap<String, String>,
}

impl MapperDefinition {
    pub fn from_json(json: &str) -> Result<Self, MapperError> {
        serde_json::from_str(json).map_err(MapperError::Parse)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MapperError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|error| MapperError::Io {
            path: path.display().to_string(),
            error,
        })?;

        Self::from_json(&json)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct MappedStatement {
    sql: String,
    parameters: Vec<String>,
}

impl MappedStatement {
    fn compile(id: &str, template: &str) -> Result<Self, MapperError> {
        let mut sql = String::with_capacity(template.len());
        let mut parameters = vec![];
        let mut rest = template;

        while let Some(start) = rest.find(PARAMETER_PREFIX) {
            sql.push_str(&rest[..start]);

            let name_start = start + PARAMETER_PREFIX.len();
            let name_len = rest[name_start..]
                .find(PARAMETER_SUFFIX)
                .ok_or_else(|| MapperError::UnterminatedParameter(id.to_string()))?;

            let name = rest[name_start..name_start + name_len].trim();
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(MapperError::InvalidParameter {
                    statement: id.to_string(),
                    parameter: name.to_string(),
                });
            }

            sql.push(':');
            sql.push_str(name);

            if !parameters.iter().any(|parameter| parameter == name) {
                parameters.push(name.to_string());
            }

            rest = &rest[name_start + name_len + 1..];
        }

        sql.push_str(rest);
        Ok(Self { sql, parameters })
    }
}

/// Executes statements from a [MapperDefinition] against a shared connection. Statements can be
/// referred to by their id, optionally qualified with the namespace (`employee.getEmployeeById`).
pub struct SqlSession {
    connection: SharedConnection,
    namespace: String,
    statements: FxHashMap<String, MappedStatement>,
}

impl SqlSession {
    pub fn new(
        connection: SharedConnection,
        definition: &MapperDefinition,
    ) -> Result<Self, MapperError> {
        let statements = definition
            .statements
            .iter()
            .map(|(id, template)| {
                MappedStatement::compile(id, template).map(|statement| (id.clone(), statement))
            })
            .collect::<Result<FxHashMap<_, _>, _>>()?;

        debug!(
            "Compiled {} statements from mapper {}.",
            statements.len(),
            definition.namespace
        );

        Ok(Self {
            connection,
            namespace: definition.namespace.clone(),
            statements,
        })
    }

    fn statement(&self, id: &str) -> Result<&MappedStatement, DaoError> {
        let local_id = id
            .strip_prefix(self.namespace.as_str())
            .and_then(|id| id.strip_prefix('.'))
            .unwrap_or(id);

        self.statements
            .get(local_id)
            .ok_or_else(|| DaoError::UnknownStatement(id.to_string()))
    }

    /// Runs a statement expected to return exactly one row.
    pub async fn select_one<T: FromRow + Send + 'static>(
        &self,
        id: &str,
        params: &[(&str, Value)],
    ) -> Result<T, DaoError> {
        let statement = self.statement(id)?;

        if let Some(missing) = statement
            .parameters
            .iter()
            .find(|parameter| !params.iter().any(|(name, _)| name == *parameter))
        {
            return Err(DaoError::MissingParameter {
                statement: id.to_string(),
                parameter: missing.clone(),
            });
        }

        let sql = statement.sql.clone();
        let lookup = format!("statement {id}");
        let bound: Vec<(String, Value)> = statement
            .parameters
            .iter()
            .filter_map(|parameter| {
                params
                    .iter()
                    .find(|(key, _)| key == parameter)
                    .map(|(_, value)| (format!(":{parameter}"), value.clone()))
            })
            .collect();

        with_connection(&self.connection, move |connection| {
            let bound: Vec<(&str, &dyn ToSql)> = bound
                .iter()
                .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
                .collect();

            select_single(connection, &sql, bound.as_slice(), || lookup)
        })
        .await
    }
}

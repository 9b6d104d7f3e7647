//! Data access for [Employees](Employee).

use crate::employee::Employee;
use crate::mapper::SqlSession;
use futures::future::{BoxFuture, FutureExt};
#[cfg(test)]
use mockall::automock;
use rusqlite::types::Value;
use rusqlite::{Connection, Params, Row};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::{self, JoinError};

/// Connection shared between migrations and data accessors.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Thread-safe pointer to an [EmployeeDao].
pub type EmployeeDaoPtr = Arc<dyn EmployeeDao + Send + Sync>;

const SELECT_EMPLOYEE: &str = "SELECT id, name FROM employee WHERE id = ?1";

/// Id of the mapped statement used by [MappedEmployeeDao].
pub const GET_EMPLOYEE_BY_ID: &str = "getEmployeeById";

#[derive(Error, Debug)]
pub enum DaoError {
    #[error("No row found for {0}")]
    NotFound(String),
    #[error("Expected a single row for {lookup}, found {rows}")]
    Integrity { lookup: String, rows: usize },
    #[error("Query error: {0}")]
    Query(#[from] rusqlite::Error),
    #[error("Unknown mapped statement: {0}")]
    UnknownStatement(String),
    #[error("Missing parameter '{parameter}' for statement {statement}")]
    MissingParameter { statement: String, parameter: String },
    #[error("Query task failed: {0}")]
    Task(#[from] JoinError),
}

/// Materializes a value from a single result row.
pub trait FromRow: Sized {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Employee lookups.
#[cfg_attr(test, automock)]
pub trait EmployeeDao {
    /// Returns the employee with the given id.
    fn get_employee(&self, id: i64) -> BoxFuture<'_, Result<Employee, DaoError>>;
}

/// [EmployeeDao] with its query declared inline.
#[derive(Clone, Debug)]
pub struct SqliteEmployeeDao {
    connection: SharedConnection,
}

impl SqliteEmployeeDao {
    pub fn new(connection: SharedConnection) -> Self {
        Self { connection }
    }
}

impl EmployeeDao for SqliteEmployeeDao {
    fn get_employee(&self, id: i64) -> BoxFuture<'_, Result<Employee, DaoError>> {
        with_connection(&self.connection, move |connection| {
            select_single(connection, SELECT_EMPLOYEE, [id], || {
                format!("employee with id {id}")
            })
        })
        .boxed()
    }
}

/// [EmployeeDao] delegating to a mapped statement of a [SqlSession].
pub struct MappedEmployeeDao {
    session: SqlSession,
}

impl MappedEmployeeDao {
    pub fn new(session: SqlSession) -> Self {
        Self { session }
    }
}

impl EmployeeDao for MappedEmployeeDao {
    fn get_employee(&self, id: i64) -> BoxFuture<'_, Result<Employee, DaoError>> {
        async move {
            self.session
                .select_one(GET_EMPLOYEE_BY_ID, &[("id", Value::Integer(id))])
                .await
        }
        .boxed()
    }
}

/// Runs `query` on the blocking thread pool while holding the connection lock. Callers queue up on
/// the lock without occupying runtime workers.
pub(crate) async fn with_connection<T, F>(
    connection: &SharedConnection,
    query: F,
) -> Result<T, DaoError>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T, DaoError> + Send + 'static,
{
    let connection = connection.clone().lock_owned().await;
    task::spawn_blocking(move || query(&*connection)).await?
}

/// Runs a query expected to return exactly one row.
pub(crate) fn select_single<T, P>(
    connection: &Connection,
    sql: &str,
    params: P,
    lookup: impl FnOnce() -> String,
) -> Result<T, DaoError>
where
    T: FromRow,
    P: Params,
{
    let mut statement = connection.prepare_cached(sql)?;
    let mut rows = statement
        .query_map(params, T::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    match rows.len() {
        0 => Err(DaoError::NotFound(lookup())),
        1 => Ok(rows.remove(0)),
        rows => Err(DaoError::Integrity {
            lookup: lookup(),
            rows,
        }),
    }
}

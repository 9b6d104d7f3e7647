use crate::dao::FromRow;
use derive_more::{Constructor, Display};
use rusqlite::Row;

/// An employee record, as stored in the `employee` table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Constructor, Display)]
#[display(fmt = "Employee(id={}, name={})", id, name)]
pub struct Employee {
    pub id: i64,
    pub name: String,
}

impl FromRow for Employee {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
        })
    }
}

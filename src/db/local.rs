//! Embedded SQLite adapter.
//!
//! Wraps a single database file behind one connection. Statements pass
//! through verbatim; rows come back as dynamic [`Row`] maps so callers see
//! the same shapes the other tiers produce.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, ToSql};

use crate::db::error::DbError;
use crate::db::value::{ExecResult, Row, SqlValue};

/// Single-connection SQLite database.
pub(crate) struct EmbeddedDb {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for EmbeddedDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedDb").finish_non_exhaustive()
    }
}

impl EmbeddedDb {
    /// Open (creating if missing) the database file at `path`.
    pub(crate) fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn query_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|n| (*n).to_string()).collect();

        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter().map(SqlParam)))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut mapped = Row::new();
            for (i, name) in names.iter().enumerate() {
                mapped.set(name.clone(), value_from_sqlite(row.get_ref(i)?));
            }
            out.push(mapped);
        }
        Ok(out)
    }

    pub(crate) fn query_get(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, DbError> {
        Ok(self.query_all(sql, params)?.into_iter().next())
    }

    pub(crate) fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<ExecResult, DbError> {
        let conn = self.lock();
        let changes = conn.execute(sql, rusqlite::params_from_iter(params.iter().map(SqlParam)))?;
        let rowid = conn.last_insert_rowid();
        Ok(ExecResult {
            changes: changes as u64,
            last_insert_id: (rowid != 0).then_some(SqlValue::Integer(rowid)),
        })
    }
}

/// Bridge from [`SqlValue`] to SQLite bind parameters.
struct SqlParam<'a>(&'a SqlValue);

impl ToSql for SqlParam<'_> {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, Value};
        Ok(match self.0 {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

fn value_from_sqlite(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
    }
}

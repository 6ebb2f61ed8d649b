//! Uniform statement execution over the three tiers.
//!
//! The schema provisioner and the fallback replay path both need to run raw
//! SQL against "whichever backend is active"; this trait is that seam.

use async_trait::async_trait;

use crate::db::error::DbError;
use crate::db::local::EmbeddedDb;
use crate::db::memory::MemoryDb;
use crate::db::remote::RemoteClient;
use crate::db::sql;
use crate::db::value::{ExecResult, Row, SqlValue};

#[async_trait]
pub(crate) trait SqlBackend: Send + Sync {
    async fn all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError>;

    async fn get(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, DbError>;

    async fn run(&self, sql: &str, params: &[SqlValue]) -> Result<ExecResult, DbError>;
}

#[async_trait]
impl SqlBackend for RemoteClient {
    async fn all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        Ok(self.query(sql, params).await?.rows)
    }

    async fn get(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, DbError> {
        Ok(self.query(sql, params).await?.rows.into_iter().next())
    }

    async fn run(&self, sql: &str, params: &[SqlValue]) -> Result<ExecResult, DbError> {
        let output = self.query(sql, params).await?;
        Ok(ExecResult {
            changes: output.meta.changes.unwrap_or(0),
            last_insert_id: output.meta.last_row_id.map(SqlValue::Integer),
        })
    }
}

#[async_trait]
impl SqlBackend for EmbeddedDb {
    async fn all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        self.query_all(sql, params)
    }

    async fn get(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, DbError> {
        self.query_get(sql, params)
    }

    async fn run(&self, sql: &str, params: &[SqlValue]) -> Result<ExecResult, DbError> {
        self.execute(sql, params)
    }
}

#[async_trait]
impl SqlBackend for MemoryDb {
    async fn all(&self, raw: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        Ok(self.execute_all(&sql::parse(raw), params))
    }

    async fn get(&self, raw: &str, params: &[SqlValue]) -> Result<Option<Row>, DbError> {
        Ok(self.execute_get(&sql::parse(raw), params))
    }

    async fn run(&self, raw: &str, params: &[SqlValue]) -> Result<ExecResult, DbError> {
        Ok(self.execute_run(&sql::parse(raw), params))
    }
}

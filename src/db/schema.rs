//! Schema provisioning.
//!
//! Applies the bundled schema definition plus a fixed sequence of
//! column-evolution steps against whichever backend is active. Safe to
//! re-run on every startup: tables and indexes are created `IF NOT EXISTS`
//! and columns are only added when the metadata query says they are absent.
//! On the in-memory tier every DDL statement is accepted as a no-op by
//! construction.

use std::collections::HashSet;

use crate::db::backend::SqlBackend;
use crate::db::error::DbError;
use crate::db::value::SqlValue;

/// Bundled schema definition: semicolon-separated DDL statements.
pub(crate) const SCHEMA_SQL: &str = include_str!("schema.sql");

/// A desired column and its `ADD COLUMN` definition.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ColumnDef {
    pub name: &'static str,
    pub definition: &'static str,
}

/// Profile columns added to `users` after the original schema was authored.
const USER_PROFILE_COLUMNS: &[ColumnDef] = &[
    ColumnDef { name: "first_name", definition: "TEXT" },
    ColumnDef { name: "last_name", definition: "TEXT" },
    ColumnDef { name: "patronymic", definition: "TEXT" },
    ColumnDef { name: "region", definition: "TEXT" },
    ColumnDef { name: "city", definition: "TEXT" },
];

const APPOINTMENT_COLUMNS: &[ColumnDef] = &[ColumnDef { name: "service_ids", definition: "TEXT" }];

const SERVICE_RECORD_COLUMNS: &[ColumnDef] =
    &[ColumnDef { name: "appointment_id", definition: "TEXT" }];

const SERVICE_COLUMNS: &[ColumnDef] =
    &[ColumnDef { name: "is_active", definition: "INTEGER DEFAULT 1" }];

const SERVICE_STATION_COLUMNS: &[ColumnDef] = &[
    ColumnDef { name: "city", definition: "TEXT" },
    ColumnDef { name: "region", definition: "TEXT" },
];

const REFRESH_TOKENS_DDL: &str = "CREATE TABLE IF NOT EXISTS refresh_tokens (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    token TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    is_revoked INTEGER DEFAULT 0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
)";

const PASSWORD_RESET_TOKENS_DDL: &str = "CREATE TABLE IF NOT EXISTS password_reset_tokens (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    token_hash TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    used_at TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
)";

const AUXILIARY_INDEX_DDL: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user_id ON refresh_tokens(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_token ON refresh_tokens(token)",
    "CREATE INDEX IF NOT EXISTS idx_password_reset_tokens_user_id ON password_reset_tokens(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_password_reset_tokens_token_hash ON password_reset_tokens(token_hash)",
];

/// Split a schema asset into individual statements.
pub(crate) fn split_statements(sql: &str) -> impl Iterator<Item = &str> {
    sql.split(';').map(str::trim).filter(|s| !s.is_empty())
}

/// Bring the backend's schema up to the shape the application expects.
///
/// # Errors
/// DDL failures propagate; startup should fail loudly rather than run
/// against an unprovisioned schema.
pub(crate) async fn ensure_schema<B: SqlBackend + ?Sized>(backend: &B) -> Result<(), DbError> {
    for statement in split_statements(SCHEMA_SQL) {
        backend.run(statement, &[]).await?;
    }

    ensure_columns(backend, "users", USER_PROFILE_COLUMNS).await?;
    ensure_columns(backend, "appointments", APPOINTMENT_COLUMNS).await?;
    ensure_columns(backend, "service_records", SERVICE_RECORD_COLUMNS).await?;
    ensure_columns(backend, "services", SERVICE_COLUMNS).await?;
    ensure_columns(backend, "service_stations", SERVICE_STATION_COLUMNS).await?;

    ensure_auxiliary_tables(backend).await?;

    tracing::info!("Database schema provisioned");
    Ok(())
}

/// Add each desired column that the table does not already carry.
pub(crate) async fn ensure_columns<B: SqlBackend + ?Sized>(
    backend: &B,
    table: &str,
    columns: &[ColumnDef],
) -> Result<(), DbError> {
    let existing = backend
        .all(&format!("PRAGMA table_info({table})"), &[])
        .await?;
    let present: HashSet<String> = existing
        .iter()
        .filter_map(|row| row.get("name"))
        .filter_map(SqlValue::as_text)
        .map(str::to_string)
        .collect();

    for column in columns {
        if present.contains(column.name) {
            continue;
        }
        tracing::debug!(table, column = column.name, "Adding missing column");
        backend
            .run(
                &format!(
                    "ALTER TABLE {table} ADD COLUMN {} {}",
                    column.name, column.definition
                ),
                &[],
            )
            .await?;
    }
    Ok(())
}

/// Create the token tables and their indexes.
pub(crate) async fn ensure_auxiliary_tables<B: SqlBackend + ?Sized>(
    backend: &B,
) -> Result<(), DbError> {
    backend.run(REFRESH_TOKENS_DDL, &[]).await?;
    backend.run(PASSWORD_RESET_TOKENS_DDL, &[]).await?;
    for ddl in AUXILIARY_INDEX_DDL {
        backend.run(ddl, &[]).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::local::EmbeddedDb;
    use crate::db::memory::MemoryDb;
    use tempfile::tempdir;

    async fn column_names(db: &EmbeddedDb, table: &str) -> Vec<String> {
        db.all(&format!("PRAGMA table_info({table})"), &[])
            .await
            .unwrap()
            .iter()
            .filter_map(|row| row.get("name").and_then(SqlValue::as_text).map(str::to_string))
            .collect()
    }

    #[test]
    fn test_split_statements() {
        let statements: Vec<&str> = split_statements("CREATE TABLE a (id TEXT);\n\nCREATE TABLE b (id TEXT);\n").collect();
        assert_eq!(statements, vec!["CREATE TABLE a (id TEXT)", "CREATE TABLE b (id TEXT)"]);
    }

    #[test]
    fn test_schema_asset_has_core_tables() {
        let ddl: Vec<&str> = split_statements(SCHEMA_SQL).collect();
        assert!(ddl.iter().any(|s| s.contains("CREATE TABLE IF NOT EXISTS users")));
        assert!(ddl.iter().any(|s| s.contains("CREATE TABLE IF NOT EXISTS appointments")));
        // Evolved columns arrive via ensure_columns, not the base asset.
        assert!(!SCHEMA_SQL.contains("first_name"));
        assert!(!SCHEMA_SQL.contains("service_ids"));
    }

    #[tokio::test]
    async fn test_provisioning_is_idempotent_on_embedded() {
        let dir = tempdir().unwrap();
        let db = EmbeddedDb::open(&dir.path().join("schema.sqlite")).unwrap();

        ensure_schema(&db).await.unwrap();
        let first = column_names(&db, "users").await;
        assert!(first.contains(&"first_name".to_string()));
        assert!(first.contains(&"city".to_string()));

        // Second run must not fail and must not duplicate columns.
        ensure_schema(&db).await.unwrap();
        let second = column_names(&db, "users").await;
        assert_eq!(first, second);

        let services = column_names(&db, "services").await;
        assert!(services.contains(&"is_active".to_string()));
        let appointments = column_names(&db, "appointments").await;
        assert!(appointments.contains(&"service_ids".to_string()));
    }

    #[tokio::test]
    async fn test_auxiliary_tables_created() {
        let dir = tempdir().unwrap();
        let db = EmbeddedDb::open(&dir.path().join("aux.sqlite")).unwrap();
        ensure_schema(&db).await.unwrap();

        let tokens = column_names(&db, "refresh_tokens").await;
        assert_eq!(
            tokens,
            vec!["id", "user_id", "token", "expires_at", "is_revoked", "created_at"]
        );
        let resets = column_names(&db, "password_reset_tokens").await;
        assert!(resets.contains(&"token_hash".to_string()));
        assert!(resets.contains(&"used_at".to_string()));
    }

    #[tokio::test]
    async fn test_provisioning_memory_tier_is_noop() {
        let db = MemoryDb::new();
        ensure_schema(&db).await.unwrap();
        ensure_schema(&db).await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_columns_skips_present() {
        let dir = tempdir().unwrap();
        let db = EmbeddedDb::open(&dir.path().join("cols.sqlite")).unwrap();
        db.run("CREATE TABLE widgets (id TEXT PRIMARY KEY, size TEXT)", &[])
            .await
            .unwrap();

        let desired = &[
            ColumnDef { name: "size", definition: "TEXT" },
            ColumnDef { name: "color", definition: "TEXT" },
        ];
        ensure_columns(&db, "widgets", desired).await.unwrap();
        ensure_columns(&db, "widgets", desired).await.unwrap();

        assert_eq!(column_names(&db, "widgets").await, vec!["id", "size", "color"]);
    }
}

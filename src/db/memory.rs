//! In-memory relational emulator.
//!
//! The last-resort tier: interprets the compiled SQL subset (see
//! [`crate::db::sql`]) against in-process tables when neither the remote
//! endpoint nor an embedded database file is available. Tables are created
//! lazily on first reference; rows keep insertion order and are keyed by
//! their `id` column, generating a UUID when the caller does not supply one.
//!
//! Failure philosophy: this tier never raises. Unrecognized statements
//! return empty results, writes with an unrecognized filter touch nothing,
//! and selects with an unrecognized filter return the unfiltered table.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

use crate::db::sql::{ParsedStatement, Projection, WhereClause};
use crate::db::value::{ExecResult, Row, SqlValue};

/// Tables pre-declared at startup; any other name is created on demand.
const SEED_TABLES: &[&str] = &["users", "refresh_tokens", "user_settings"];

/// Fixed column metadata backing `PRAGMA table_info` answers.
fn declared_columns(table: &str) -> &'static [&'static str] {
    match table {
        "users" => &[
            "id",
            "email",
            "password",
            "role",
            "profile_id",
            "two_factor_secret",
            "two_factor_enabled",
            "two_factor_pending",
            "recovery_codes",
            "created_at",
            "updated_at",
            "name",
            "phone",
            "first_name",
            "last_name",
            "patronymic",
            "region",
            "city",
        ],
        "refresh_tokens" => &["id", "user_id", "token", "expires_at", "is_revoked", "created_at"],
        "user_settings" => &["id", "user_id", "settings", "created_at", "updated_at"],
        _ => &[],
    }
}

// =============================================================================
// Tables
// =============================================================================

/// One table: rows in insertion order, keyed by the textual `id`.
#[derive(Debug, Default)]
struct Table {
    rows: Vec<(String, Row)>,
}

impl Table {
    /// Insert or replace the row stored under `key`.
    fn set(&mut self, key: String, row: Row) {
        if let Some(slot) = self.rows.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = row;
        } else {
            self.rows.push((key, row));
        }
    }
}

/// In-process table store.
#[derive(Debug)]
pub(crate) struct MemoryDb {
    tables: Mutex<HashMap<String, Table>>,
}

impl MemoryDb {
    pub(crate) fn new() -> Self {
        let mut tables = HashMap::new();
        for name in SEED_TABLES {
            tables.insert((*name).to_string(), Table::default());
        }
        Self {
            tables: Mutex::new(tables),
        }
    }

    fn with_table<R>(&self, name: &str, f: impl FnOnce(&mut Table) -> R) -> R {
        let mut tables = self
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(tables.entry(name.to_string()).or_default())
    }

    // =========================================================================
    // Execution
    // =========================================================================

    pub(crate) fn execute_all(&self, statement: &ParsedStatement, params: &[SqlValue]) -> Vec<Row> {
        match statement {
            ParsedStatement::Select {
                table,
                projection,
                filter,
            } => self.with_table(table, |t| {
                let matched = filter_rows(&t.rows, filter.as_ref(), params);
                match projection {
                    Projection::Count => {
                        let mut row = Row::new();
                        row.set("count", matched.len() as i64);
                        vec![row]
                    }
                    Projection::Rows => matched,
                }
            }),
            ParsedStatement::TableInfo { table } => declared_columns(table)
                .iter()
                .enumerate()
                .map(|(cid, name)| {
                    let mut row = Row::new();
                    row.set("cid", cid as i64);
                    row.set("name", *name);
                    row
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn execute_get(&self, statement: &ParsedStatement, params: &[SqlValue]) -> Option<Row> {
        self.execute_all(statement, params).into_iter().next()
    }

    pub(crate) fn execute_run(&self, statement: &ParsedStatement, params: &[SqlValue]) -> ExecResult {
        match statement {
            ParsedStatement::Insert { table, columns } => self.with_table(table, |t| {
                let mut row = Row::new();
                for (i, column) in columns.iter().enumerate() {
                    row.set(column.clone(), params.get(i).cloned().unwrap_or(SqlValue::Null));
                }
                let id = match row.get("id") {
                    Some(v) if !v.is_empty_id() => v.clone(),
                    _ => {
                        let generated = SqlValue::Text(Uuid::new_v4().to_string());
                        row.set("id", generated.clone());
                        generated
                    }
                };
                t.set(id.filter_text(), row);
                ExecResult {
                    changes: 1,
                    last_insert_id: Some(id),
                }
            }),
            ParsedStatement::Update {
                table,
                assignments,
                filter,
            } => {
                // Writes accept only the single-equality shape; anything
                // else touches no rows.
                let WhereClause::Eq { column } = filter else {
                    return ExecResult::default();
                };
                let needle = params
                    .get(assignments.len())
                    .cloned()
                    .unwrap_or(SqlValue::Null)
                    .filter_text();
                self.with_table(table, |t| {
                    let mut changes = 0;
                    for (key, row) in &mut t.rows {
                        let matches = row
                            .get(column)
                            .map(|v| v.filter_text() == needle)
                            .unwrap_or(false);
                        if !matches {
                            continue;
                        }
                        for (i, assigned) in assignments.iter().enumerate() {
                            row.set(
                                assigned.clone(),
                                params.get(i).cloned().unwrap_or(SqlValue::Null),
                            );
                        }
                        // Re-index under the (possibly rewritten) id.
                        if let Some(id) = row.get("id") {
                            *key = id.filter_text();
                        }
                        changes += 1;
                    }
                    ExecResult {
                        changes,
                        last_insert_id: None,
                    }
                })
            }
            ParsedStatement::Delete { table, filter } => {
                let WhereClause::Eq { column } = filter else {
                    return ExecResult::default();
                };
                let needle = params
                    .first()
                    .cloned()
                    .unwrap_or(SqlValue::Null)
                    .filter_text();
                self.with_table(table, |t| {
                    let before = t.rows.len();
                    t.rows.retain(|(_, row)| {
                        row.get(column)
                            .map(|v| v.filter_text() != needle)
                            .unwrap_or(true)
                    });
                    ExecResult {
                        changes: (before - t.rows.len()) as u64,
                        last_insert_id: None,
                    }
                })
            }
            _ => ExecResult::default(),
        }
    }
}

fn filter_rows(rows: &[(String, Row)], filter: Option<&WhereClause>, params: &[SqlValue]) -> Vec<Row> {
    match filter {
        None | Some(WhereClause::Opaque) => rows.iter().map(|(_, r)| r.clone()).collect(),
        Some(WhereClause::Eq { column }) => {
            let needle = params
                .first()
                .cloned()
                .unwrap_or(SqlValue::Null)
                .filter_text();
            rows.iter()
                .filter(|(_, row)| {
                    row.get(column)
                        .map(|v| v.filter_text() == needle)
                        .unwrap_or(false)
                })
                .map(|(_, r)| r.clone())
                .collect()
        }
        Some(WhereClause::TripleEq {
            column1,
            column2,
            column3,
            literal,
        }) => {
            let needle1 = params
                .first()
                .cloned()
                .unwrap_or(SqlValue::Null)
                .filter_text();
            let needle2 = params
                .get(1)
                .cloned()
                .unwrap_or(SqlValue::Null)
                .filter_text();
            let wanted = *literal as f64;
            rows.iter()
                .filter(|(_, row)| {
                    let first = row
                        .get(column1)
                        .map(|v| v.filter_text() == needle1)
                        .unwrap_or(false);
                    let second = row
                        .get(column2)
                        .map(|v| v.filter_text() == needle2)
                        .unwrap_or(false);
                    // A missing third column coerces to zero.
                    let third = row
                        .get(column3)
                        .map(|v| v.filter_number())
                        .unwrap_or(Some(0.0))
                        .map(|n| n == wanted)
                        .unwrap_or(false);
                    first && second && third
                })
                .map(|(_, r)| r.clone())
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sql::parse;
    use crate::params;

    fn insert_user(db: &MemoryDb, id: &str, email: &str, role: &str) {
        let stmt = parse("INSERT INTO users (id, email, role) VALUES (?, ?, ?)");
        let result = db.execute_run(&stmt, &params![id, email, role]);
        assert_eq!(result.changes, 1);
    }

    #[test]
    fn test_insert_select_roundtrip() {
        let db = MemoryDb::new();
        insert_user(&db, "u1", "a@x.com", "client");

        let select = parse("SELECT * FROM users WHERE id = ?");
        let rows = db.execute_all(&select, &params!["u1"]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&SqlValue::Text("u1".to_string())));
        assert_eq!(rows[0].get("email"), Some(&SqlValue::Text("a@x.com".to_string())));
        assert_eq!(rows[0].get("role"), Some(&SqlValue::Text("client".to_string())));
    }

    #[test]
    fn test_insert_generates_id_when_absent() {
        let db = MemoryDb::new();
        let stmt = parse("INSERT INTO users (email) VALUES (?)");
        let result = db.execute_run(&stmt, &params!["b@x.com"]);

        assert_eq!(result.changes, 1);
        let id = result.last_insert_id.expect("generated id");
        let text = id.as_text().expect("textual id").to_string();
        assert!(!text.is_empty());

        let select = parse("SELECT * FROM users WHERE id = ?");
        let rows = db.execute_all(&select, &params![text]);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_insert_same_id_replaces_row() {
        let db = MemoryDb::new();
        insert_user(&db, "u1", "a@x.com", "client");
        insert_user(&db, "u1", "b@x.com", "admin");

        let select = parse("SELECT * FROM users");
        let rows = db.execute_all(&select, &[]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("email"), Some(&SqlValue::Text("b@x.com".to_string())));
    }

    #[test]
    fn test_update_scopes_to_matching_rows() {
        let db = MemoryDb::new();
        insert_user(&db, "u1", "a@x.com", "client");
        insert_user(&db, "u2", "b@x.com", "client");

        let update = parse("UPDATE users SET role = ? WHERE id = ?");
        let result = db.execute_run(&update, &params!["admin", "u1"]);
        assert_eq!(result.changes, 1);

        let select = parse("SELECT * FROM users WHERE id = ?");
        let u1 = db.execute_get(&select, &params!["u1"]).expect("u1");
        let u2 = db.execute_get(&select, &params!["u2"]).expect("u2");
        assert_eq!(u1.get("role"), Some(&SqlValue::Text("admin".to_string())));
        assert_eq!(u2.get("role"), Some(&SqlValue::Text("client".to_string())));
    }

    #[test]
    fn test_update_with_opaque_filter_touches_nothing() {
        let db = MemoryDb::new();
        insert_user(&db, "u1", "a@x.com", "client");

        let update = parse("UPDATE users SET role = ? WHERE id = ? AND email = ?");
        let result = db.execute_run(&update, &params!["admin", "u1", "a@x.com"]);
        assert_eq!(result.changes, 0);

        let select = parse("SELECT * FROM users WHERE id = ?");
        let row = db.execute_get(&select, &params!["u1"]).expect("row");
        assert_eq!(row.get("role"), Some(&SqlValue::Text("client".to_string())));
    }

    #[test]
    fn test_delete_scopes_to_matching_rows() {
        let db = MemoryDb::new();
        insert_user(&db, "u1", "a@x.com", "client");
        insert_user(&db, "u2", "b@x.com", "client");

        let delete = parse("DELETE FROM users WHERE id = ?");
        let result = db.execute_run(&delete, &params!["u1"]);
        assert_eq!(result.changes, 1);

        let select = parse("SELECT * FROM users WHERE id = ?");
        assert!(db.execute_get(&select, &params!["u1"]).is_none());
        assert!(db.execute_get(&select, &params!["u2"]).is_some());
    }

    #[test]
    fn test_count_projection() {
        let db = MemoryDb::new();
        insert_user(&db, "u1", "a@x.com", "client");
        insert_user(&db, "u2", "b@x.com", "admin");

        let count = parse("SELECT COUNT(*) as count FROM users WHERE role = ?");
        let rows = db.execute_all(&count, &params!["client"]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("count"), Some(&SqlValue::Integer(1)));

        let row = db.execute_get(&count, &params!["missing"]).expect("count row");
        assert_eq!(row.get("count"), Some(&SqlValue::Integer(0)));
    }

    #[test]
    fn test_triple_conjunction_numeric_literal() {
        let db = MemoryDb::new();
        let insert = parse("INSERT INTO refresh_tokens (id, user_id, token, is_revoked) VALUES (?, ?, ?, ?)");
        db.execute_run(&insert, &params!["t1", "u1", "tok", 0]);
        db.execute_run(&insert, &params!["t2", "u1", "tok", 1]);

        let select = parse("SELECT * FROM refresh_tokens WHERE user_id = ? AND token = ? AND is_revoked = 0");
        let rows = db.execute_all(&select, &params!["u1", "tok"]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&SqlValue::Text("t1".to_string())));

        // No row carries is_revoked = 5: empty result, not an error.
        let select = parse("SELECT * FROM refresh_tokens WHERE user_id = ? AND token = ? AND is_revoked = 5");
        let rows = db.execute_all(&select, &params!["u1", "tok"]);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_triple_conjunction_missing_column_coerces_to_zero() {
        let db = MemoryDb::new();
        let insert = parse("INSERT INTO refresh_tokens (id, user_id, token) VALUES (?, ?, ?)");
        db.execute_run(&insert, &params!["t1", "u1", "tok"]);

        let select = parse("SELECT * FROM refresh_tokens WHERE user_id = ? AND token = ? AND is_revoked = 0");
        let rows = db.execute_all(&select, &params!["u1", "tok"]);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_opaque_filter_returns_unfiltered_rows() {
        let db = MemoryDb::new();
        insert_user(&db, "u1", "a@x.com", "client");
        insert_user(&db, "u2", "b@x.com", "admin");

        let select = parse("SELECT * FROM users WHERE email LIKE ?");
        let rows = db.execute_all(&select, &params!["%x.com"]);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_unsupported_statement_is_noop() {
        let db = MemoryDb::new();
        let stmt = parse("CREATE TABLE IF NOT EXISTS widgets (id TEXT PRIMARY KEY)");
        assert_eq!(db.execute_all(&stmt, &[]), Vec::new());
        assert_eq!(db.execute_get(&stmt, &[]), None);
        assert_eq!(db.execute_run(&stmt, &[]), ExecResult::default());
    }

    #[test]
    fn test_method_verb_mismatch_is_empty() {
        let db = MemoryDb::new();
        insert_user(&db, "u1", "a@x.com", "client");

        let insert = parse("INSERT INTO users (id) VALUES (?)");
        assert!(db.execute_all(&insert, &params!["u9"]).is_empty());

        let select = parse("SELECT * FROM users");
        assert_eq!(db.execute_run(&select, &[]), ExecResult::default());
    }

    #[test]
    fn test_tables_created_on_demand() {
        let db = MemoryDb::new();
        let insert = parse("INSERT INTO appointments (id, user_id) VALUES (?, ?)");
        let result = db.execute_run(&insert, &params!["a1", "u1"]);
        assert_eq!(result.changes, 1);

        let select = parse("SELECT * FROM appointments WHERE user_id = ?");
        assert_eq!(db.execute_all(&select, &params!["u1"]).len(), 1);
    }

    #[test]
    fn test_pragma_table_info_known_and_unknown() {
        let db = MemoryDb::new();

        let users = parse("PRAGMA table_info(users)");
        let rows = db.execute_all(&users, &[]);
        assert!(rows.iter().any(|r| r.get("name") == Some(&SqlValue::Text("first_name".to_string()))));
        assert_eq!(rows[0].get("cid"), Some(&SqlValue::Integer(0)));

        let unknown = parse("PRAGMA table_info(appointments)");
        assert!(db.execute_all(&unknown, &[]).is_empty());
    }

    #[test]
    fn test_numeric_filter_value_coerces_to_text() {
        let db = MemoryDb::new();
        let insert = parse("INSERT INTO user_settings (id, user_id, settings) VALUES (?, ?, ?)");
        db.execute_run(&insert, &params![7, "u1", "{}"]);

        // Filtering with a text param against an integer column matches by
        // string coercion.
        let select = parse("SELECT * FROM user_settings WHERE id = ?");
        let rows = db.execute_all(&select, &params!["7"]);
        assert_eq!(rows.len(), 1);
    }
}

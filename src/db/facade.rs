//! Unified statement facade and tier selection.
//!
//! Callers obtain one [`Database`] handle, prepare statements, and execute
//! them with positional parameters; the handle hides which backend tier is
//! doing the work. Selection is monotonic for the life of the handle: the
//! remote tier can degrade to an embedded file or to the in-memory tables,
//! and once it has, every later statement replays against that fallback
//! without re-attempting the remote endpoint.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use async_trait::async_trait;
use strum_macros::{AsRefStr, Display};

use crate::config::{DataConfig, FallbackMode};
use crate::db::backend::SqlBackend;
use crate::db::error::DbError;
use crate::db::local::EmbeddedDb;
use crate::db::memory::MemoryDb;
use crate::db::remote::{RemoteClient, RemoteError};
use crate::db::schema;
use crate::db::sql::{self, ParsedStatement};
use crate::db::value::{ExecResult, Row, SqlValue};

// =============================================================================
// Tiers
// =============================================================================

/// Which backend answers statements right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum TierKind {
    /// Remote HTTP query endpoint.
    Remote,
    /// Embedded SQLite file.
    Embedded,
    /// In-memory table emulator.
    Memory,
}

/// A local tier chosen at startup or at the moment of degradation.
#[derive(Debug)]
pub(crate) enum LocalTier {
    Embedded(EmbeddedDb),
    Memory(MemoryDb),
}

impl LocalTier {
    fn kind(&self) -> TierKind {
        match self {
            Self::Embedded(_) => TierKind::Embedded,
            Self::Memory(_) => TierKind::Memory,
        }
    }
}

#[async_trait]
impl SqlBackend for LocalTier {
    async fn all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        match self {
            Self::Embedded(db) => db.all(sql, params).await,
            Self::Memory(db) => db.all(sql, params).await,
        }
    }

    async fn get(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, DbError> {
        match self {
            Self::Embedded(db) => db.get(sql, params).await,
            Self::Memory(db) => db.get(sql, params).await,
        }
    }

    async fn run(&self, sql: &str, params: &[SqlValue]) -> Result<ExecResult, DbError> {
        match self {
            Self::Embedded(db) => db.run(sql, params).await,
            Self::Memory(db) => db.run(sql, params).await,
        }
    }
}

/// Open the best available local tier and provision it.
///
/// An unopenable database file falls through to the in-memory tables;
/// a provisioning failure against an opened file propagates.
async fn open_local(path: &Path) -> Result<LocalTier, DbError> {
    match EmbeddedDb::open(path) {
        Ok(db) => {
            let tier = LocalTier::Embedded(db);
            schema::ensure_schema(&tier).await?;
            Ok(tier)
        }
        Err(err) => {
            tracing::warn!(
                error = %err,
                path = %path.display(),
                "Embedded database unavailable, using in-memory tables"
            );
            Ok(LocalTier::Memory(MemoryDb::new()))
        }
    }
}

// =============================================================================
// Fallback latch
// =============================================================================

/// One-way latch holding the fallback adapter.
///
/// Construction is single-flight: concurrent first failures race to the
/// init lock and only the winner builds, so at most one adapter ever exists
/// per handle. `clear` re-arms the latch for test isolation.
#[derive(Debug, Default)]
struct FallbackSlot {
    active: RwLock<Option<Arc<LocalTier>>>,
    init: tokio::sync::Mutex<()>,
}

impl FallbackSlot {
    fn current(&self) -> Option<Arc<LocalTier>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn clear(&self) {
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    async fn get_or_build(&self, path: &Path) -> Result<Arc<LocalTier>, DbError> {
        if let Some(tier) = self.current() {
            return Ok(tier);
        }
        let _guard = self.init.lock().await;
        if let Some(tier) = self.current() {
            return Ok(tier);
        }
        let tier = Arc::new(open_local(path).await?);
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&tier));
        Ok(tier)
    }
}

/// Decide whether a remote failure degrades or propagates, and build the
/// fallback adapter when it degrades.
async fn degrade(
    mode: FallbackMode,
    err: RemoteError,
    slot: &FallbackSlot,
    path: &Path,
) -> Result<Arc<LocalTier>, DbError> {
    if mode != FallbackMode::Fallback || !err.is_infrastructure() {
        return Err(err.into());
    }
    tracing::warn!(error = %err, "Remote tier failed, replaying against local fallback");
    slot.get_or_build(path).await
}

// =============================================================================
// Database handle
// =============================================================================

#[derive(Debug)]
enum TierState {
    Remote {
        client: RemoteClient,
        mode: FallbackMode,
        sqlite_path: PathBuf,
        fallback: FallbackSlot,
    },
    Local(Arc<LocalTier>),
}

/// Handle to the logical database.
///
/// Cheap to clone; all clones share the same tier state, so a degradation
/// observed through one clone is observed through all of them.
#[derive(Clone)]
pub struct Database {
    inner: Arc<TierState>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("tier", &self.tier())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Connect and provision the backend the configuration selects.
    ///
    /// With remote credentials present the remote tier is provisioned
    /// immediately; an infrastructure-class failure there degrades to a
    /// local tier right away (in fallback mode) instead of failing startup.
    /// Without credentials the embedded file is used, and without a usable
    /// file the in-memory tables.
    ///
    /// # Errors
    /// Propagates provisioning failures (startup should fail loudly), and
    /// remote failures that are not eligible for degradation.
    pub async fn connect(config: DataConfig) -> Result<Self, DbError> {
        Self::connect_inner(config, true).await
    }

    /// Connect to a different remote database under the same account, for
    /// auxiliary read-mostly datasets. Skips schema provisioning.
    pub async fn connect_auxiliary(mut config: DataConfig, database_id: &str) -> Result<Self, DbError> {
        if let Some(remote) = config.remote.as_mut() {
            remote.database_id = database_id.to_string();
        }
        Self::connect_inner(config, false).await
    }

    /// Connect using the process environment.
    pub async fn from_env() -> Result<Self, DbError> {
        Self::connect(DataConfig::from_env()).await
    }

    /// A handle backed purely by the in-memory tables. No provisioning is
    /// needed; DDL is a no-op on this tier.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(TierState::Local(Arc::new(LocalTier::Memory(MemoryDb::new())))),
        }
    }

    async fn connect_inner(config: DataConfig, provision: bool) -> Result<Self, DbError> {
        match config.remote {
            Some(remote_config) => {
                let client = RemoteClient::new(&remote_config)?;
                let fallback = FallbackSlot::default();

                if provision {
                    if let Err(err) = schema::ensure_schema(&client).await {
                        match err {
                            DbError::Remote(remote_err) => {
                                // Degrades on infrastructure-class failures,
                                // propagates otherwise.
                                degrade(
                                    config.fallback_mode,
                                    remote_err,
                                    &fallback,
                                    &config.sqlite_path,
                                )
                                .await?;
                            }
                            other => return Err(other),
                        }
                    }
                }

                let db = Self {
                    inner: Arc::new(TierState::Remote {
                        client,
                        mode: config.fallback_mode,
                        sqlite_path: config.sqlite_path,
                        fallback,
                    }),
                };
                tracing::info!(tier = %db.tier(), "Data layer connected");
                Ok(db)
            }
            None => {
                let tier = Arc::new(open_local(&config.sqlite_path).await?);
                tracing::info!(tier = %tier.kind(), "Data layer connected");
                Ok(Self {
                    inner: Arc::new(TierState::Local(tier)),
                })
            }
        }
    }

    /// Prepare a statement. For the in-memory tier the SQL is compiled here,
    /// once, rather than on every execution.
    pub fn prepare(&self, sql: impl Into<String>) -> Statement {
        let statement = Statement {
            db: self.clone(),
            sql: sql.into(),
            plan: OnceLock::new(),
        };
        if self.tier() == TierKind::Memory {
            let _ = statement.plan();
        }
        statement
    }

    /// The tier currently answering statements.
    pub fn tier(&self) -> TierKind {
        match &*self.inner {
            TierState::Local(local) => local.kind(),
            TierState::Remote { fallback, .. } => fallback
                .current()
                .map(|local| local.kind())
                .unwrap_or(TierKind::Remote),
        }
    }

    /// Drop the fallback adapter and re-arm the degradation latch.
    ///
    /// Intended for test harnesses; a process that has degraded otherwise
    /// stays degraded for its lifetime.
    pub fn reset(&self) {
        if let TierState::Remote { fallback, .. } = &*self.inner {
            fallback.clear();
        }
    }

    /// Pick the first of `candidates` that exists as a column on `table`,
    /// falling back to the first candidate when none do.
    ///
    /// Callers use this where the deployed schema has drifted across
    /// environments and more than one column name may hold the same data.
    pub async fn existing_column(
        &self,
        table: &str,
        candidates: &[&str],
    ) -> Result<Option<String>, DbError> {
        let rows = self
            .prepare(format!("PRAGMA table_info({table})"))
            .all(&[])
            .await?;
        let present: HashSet<&str> = rows
            .iter()
            .filter_map(|row| row.get("name"))
            .filter_map(SqlValue::as_text)
            .collect();

        for candidate in candidates {
            if present.contains(candidate) {
                return Ok(Some((*candidate).to_string()));
            }
        }
        Ok(candidates.first().map(|c| (*c).to_string()))
    }
}

// =============================================================================
// Statements
// =============================================================================

/// A prepared statement bound to one SQL text.
///
/// Remote and embedded tiers receive the text verbatim; the in-memory tier
/// executes the compiled form. Execution routes through whichever tier the
/// owning [`Database`] has latched.
pub struct Statement {
    db: Database,
    sql: String,
    plan: OnceLock<ParsedStatement>,
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement").field("sql", &self.sql).finish()
    }
}

impl Statement {
    /// The SQL text this statement was prepared from.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    fn plan(&self) -> &ParsedStatement {
        self.plan.get_or_init(|| sql::parse(&self.sql))
    }

    /// Execute and return every matching row. No match is an empty vector,
    /// never an error.
    pub async fn all(&self, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        match &*self.db.inner {
            TierState::Local(local) => self.local_all(local, params),
            TierState::Remote {
                client,
                mode,
                sqlite_path,
                fallback,
            } => {
                if let Some(local) = fallback.current() {
                    return self.local_all(&local, params);
                }
                match client.query(&self.sql, params).await {
                    Ok(output) => Ok(output.rows),
                    Err(err) => {
                        let local = degrade(*mode, err, fallback, sqlite_path).await?;
                        self.local_all(&local, params)
                    }
                }
            }
        }
    }

    /// Execute and return the first matching row, or `None`.
    pub async fn get(&self, params: &[SqlValue]) -> Result<Option<Row>, DbError> {
        match &*self.db.inner {
            TierState::Local(local) => self.local_get(local, params),
            TierState::Remote {
                client,
                mode,
                sqlite_path,
                fallback,
            } => {
                if let Some(local) = fallback.current() {
                    return self.local_get(&local, params);
                }
                match client.query(&self.sql, params).await {
                    Ok(output) => Ok(output.rows.into_iter().next()),
                    Err(err) => {
                        let local = degrade(*mode, err, fallback, sqlite_path).await?;
                        self.local_get(&local, params)
                    }
                }
            }
        }
    }

    /// Execute a write and report rows affected plus, for inserts, the
    /// generated or provided identifier.
    pub async fn run(&self, params: &[SqlValue]) -> Result<ExecResult, DbError> {
        match &*self.db.inner {
            TierState::Local(local) => self.local_run(local, params),
            TierState::Remote {
                client,
                mode,
                sqlite_path,
                fallback,
            } => {
                if let Some(local) = fallback.current() {
                    return self.local_run(&local, params);
                }
                match client.query(&self.sql, params).await {
                    Ok(output) => Ok(ExecResult {
                        changes: output.meta.changes.unwrap_or(0),
                        last_insert_id: output.meta.last_row_id.map(SqlValue::Integer),
                    }),
                    Err(err) => {
                        let local = degrade(*mode, err, fallback, sqlite_path).await?;
                        self.local_run(&local, params)
                    }
                }
            }
        }
    }

    fn local_all(&self, local: &LocalTier, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        match local {
            LocalTier::Embedded(db) => db.query_all(&self.sql, params),
            LocalTier::Memory(db) => Ok(db.execute_all(self.plan(), params)),
        }
    }

    fn local_get(&self, local: &LocalTier, params: &[SqlValue]) -> Result<Option<Row>, DbError> {
        match local {
            LocalTier::Embedded(db) => db.query_get(&self.sql, params),
            LocalTier::Memory(db) => Ok(db.execute_get(self.plan(), params)),
        }
    }

    fn local_run(&self, local: &LocalTier, params: &[SqlValue]) -> Result<ExecResult, DbError> {
        match local {
            LocalTier::Embedded(db) => db.execute(&self.sql, params),
            LocalTier::Memory(db) => Ok(db.execute_run(self.plan(), params)),
        }
    }
}

//! Pitstop Data Layer
//!
//! This crate is the data-access layer of the Pitstop vehicle-service
//! scheduling platform. Controllers issue parameterized SQL through one
//! facade while the actual backend may be a remote HTTP query endpoint, an
//! embedded SQLite file, or an in-process relational emulator.
//!
//! # Architecture
//!
//! - **Config**: environment-driven tier selection and degradation policy
//! - **Remote tier**: one HTTP call per statement with typed error
//!   classification
//! - **Local tiers**: embedded SQLite, or in-memory tables interpreting a
//!   restricted SQL subset
//! - **Provisioning**: idempotent schema setup, safe to re-run every startup
//! - **Fallback**: one-way degradation from remote to local on
//!   infrastructure-class failures
//!
//! # Example
//!
//! ```rust,no_run
//! use pitstop_db::{Database, params};
//!
//! # async fn demo() -> Result<(), pitstop_db::DbError> {
//! let db = Database::from_env().await?;
//!
//! let insert = db.prepare("INSERT INTO users (id, email, role) VALUES (?, ?, ?)");
//! insert.run(&params!["u1", "a@x.com", "client"]).await?;
//!
//! let select = db.prepare("SELECT * FROM users WHERE id = ?");
//! if let Some(user) = select.get(&params!["u1"]).await? {
//!     println!("role: {:?}", user.get("role"));
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;

pub use config::{DataConfig, FallbackMode, RemoteConfig, RunMode};
pub use db::{Database, DbError, ExecResult, RemoteError, Row, SqlValue, Statement, TierKind};

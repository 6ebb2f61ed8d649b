//! Data-layer error types.
//!
//! All statement and provisioning operations return [`DbError`] on failure.
//! Remote-tier failures keep their typed category ([`RemoteError`]) so the
//! fallback protocol can tell infrastructure-class failures apart from
//! logic-class ones without inspecting message text at the call site.

use thiserror::Error;

use crate::db::remote::RemoteError;

/// Errors surfaced by the data layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// Remote query endpoint failure (classified).
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Embedded database failure.
    #[error("embedded database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem failure while preparing the embedded database location.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

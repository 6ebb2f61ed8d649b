//! HTTP client for the remote query endpoint.
//!
//! One POST per statement: the SQL text and positional parameters travel in
//! the JSON body, the API token in a bearer authorization header. The
//! response envelope carries a top-level success flag plus a nested
//! per-statement result; both must report success.
//!
//! No retries live here. Failures are classified into the closed
//! [`RemoteError`] enumeration and the degradation policy one layer up
//! decides what to do with them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RemoteConfig;
use crate::db::value::{Row, SqlValue};

/// Per-request timeout for endpoint calls.
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Message used when the envelope reports failure without saying why.
const GENERIC_FAILURE: &str = "query failed";

/// Case-insensitive envelope-message signatures that indicate an
/// infrastructure-class failure rather than a statement-level one.
const INFRA_SIGNATURES: &[&str] = &[
    "fetch failed",
    "socket",
    "connection reset",
    "host not found",
    "timed out",
    "timeout",
    "authentication",
    "invalid",
    "query failed",
];

// =============================================================================
// Errors
// =============================================================================

/// Classified remote-tier failure.
///
/// Every variant except [`RemoteError::Statement`] is infrastructure-class
/// and eligible for tier degradation. `Statement` failures are the remote
/// engine rejecting the SQL itself; degrading would only reproduce them
/// against a different engine, so they propagate.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The request never produced a response (connect failure, DNS, reset).
    #[error("remote query transport failure: {0}")]
    Transport(#[source] reqwest::Error),

    /// The request timed out.
    #[error("remote query timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    /// The endpoint rejected the credentials.
    #[error("remote authentication failed: {message}")]
    Auth { message: String },

    /// The response body was not a recognizable envelope.
    #[error("malformed remote response: {message}")]
    InvalidResponse { message: String },

    /// The envelope reported a generic or connectivity-flavored failure.
    #[error("remote query failed: {message}")]
    QueryFailed { message: String },

    /// The remote engine rejected the statement (logic-class).
    #[error("{message}")]
    Statement { message: String },
}

impl RemoteError {
    /// Whether this failure is eligible to trigger tier degradation.
    pub fn is_infrastructure(&self) -> bool {
        !matches!(self, Self::Statement { .. })
    }

    fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err)
        } else {
            Self::Transport(err)
        }
    }

    /// Categorize a server-reported envelope message.
    ///
    /// The signature set is fixed: connectivity/config-flavored messages
    /// degrade, anything else is treated as the engine talking about the
    /// statement itself.
    fn from_envelope_message(message: String) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("authentication") {
            return Self::Auth { message };
        }
        if INFRA_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
            return Self::QueryFailed { message };
        }
        Self::Statement { message }
    }
}

// =============================================================================
// Wire envelope
// =============================================================================

#[derive(Serialize)]
struct QueryRequest<'a> {
    sql: &'a str,
    params: &'a [SqlValue],
}

#[derive(Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    #[serde(default)]
    result: Option<EnvelopeResult>,
}

#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

/// The endpoint wraps single-statement results in a one-element array.
#[derive(Deserialize)]
#[serde(untagged)]
enum EnvelopeResult {
    Many(Vec<StatementResult>),
    One(StatementResult),
}

impl EnvelopeResult {
    fn into_first(self) -> Option<StatementResult> {
        match self {
            Self::Many(results) => results.into_iter().next(),
            Self::One(result) => Some(result),
        }
    }
}

#[derive(Deserialize)]
struct StatementResult {
    success: bool,
    #[serde(default)]
    results: Vec<serde_json::Value>,
    #[serde(default)]
    meta: Option<StatementMeta>,
}

/// Execution metadata reported alongside the rows.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatementMeta {
    /// Rows affected by the statement.
    #[serde(default)]
    pub changes: Option<u64>,
    /// Row identifier produced by an insert.
    #[serde(default)]
    pub last_row_id: Option<i64>,
}

/// Rows plus metadata for one executed statement.
#[derive(Debug, Default)]
pub(crate) struct QueryOutput {
    pub rows: Vec<Row>,
    pub meta: StatementMeta,
}

// =============================================================================
// Client
// =============================================================================

/// Client for the remote query endpoint.
pub(crate) struct RemoteClient {
    http: reqwest::Client,
    query_url: String,
    api_token: String,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("query_url", &self.query_url)
            .finish_non_exhaustive()
    }
}

impl RemoteClient {
    /// Build a client for the configured account and database.
    pub(crate) fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(QUERY_TIMEOUT)
            .build()
            .map_err(RemoteError::Transport)?;

        let query_url = format!(
            "{}/accounts/{}/d1/database/{}/query",
            config.api_base.trim_end_matches('/'),
            config.account_id,
            config.database_id,
        );

        Ok(Self {
            http,
            query_url,
            api_token: config.api_token.clone(),
        })
    }

    /// Execute one statement against the endpoint.
    pub(crate) async fn query(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<QueryOutput, RemoteError> {
        tracing::debug!(url = %self.query_url, "Executing remote statement");

        let response = self
            .http
            .post(&self.query_url)
            .bearer_auth(&self.api_token)
            .json(&QueryRequest { sql, params })
            .send()
            .await
            .map_err(RemoteError::from_transport)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(RemoteError::Auth {
                message: format!("endpoint returned {status}"),
            });
        }

        let envelope: Envelope = response.json().await.map_err(|err| {
            RemoteError::InvalidResponse {
                message: err.to_string(),
            }
        })?;

        if !envelope.success {
            let message = envelope
                .errors
                .into_iter()
                .next()
                .map(|e| e.message)
                .unwrap_or_else(|| GENERIC_FAILURE.to_string());
            tracing::warn!(error = %message, "Remote endpoint reported failure");
            return Err(RemoteError::from_envelope_message(message));
        }

        let statement = envelope
            .result
            .and_then(EnvelopeResult::into_first)
            .ok_or_else(|| RemoteError::QueryFailed {
                message: GENERIC_FAILURE.to_string(),
            })?;
        if !statement.success {
            return Err(RemoteError::QueryFailed {
                message: GENERIC_FAILURE.to_string(),
            });
        }

        Ok(QueryOutput {
            rows: statement.results.iter().map(Row::from_json).collect(),
            meta: statement.meta.unwrap_or_default(),
        })
    }
}

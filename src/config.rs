//! Environment-driven configuration.
//!
//! Three credentials select the remote tier; their absence (or a test run
//! mode) pushes selection toward the local tiers. Resolution is pure over a
//! key lookup so tests can feed their own environments.

use std::path::PathBuf;

use strum_macros::{AsRefStr, Display, EnumString};

/// Run mode environment key.
pub const ENV_RUN_MODE: &str = "PITSTOP_ENV";
/// Fallback mode environment key.
pub const ENV_DB_MODE: &str = "PITSTOP_DB_MODE";
/// Remote account identifier environment key.
pub const ENV_ACCOUNT_ID: &str = "PITSTOP_ACCOUNT_ID";
/// Remote database identifier environment key.
pub const ENV_DATABASE_ID: &str = "PITSTOP_DATABASE_ID";
/// Remote API token environment key.
pub const ENV_API_TOKEN: &str = "PITSTOP_API_TOKEN";
/// Embedded database file path environment key.
pub const ENV_SQLITE_PATH: &str = "PITSTOP_SQLITE_PATH";
/// Remote endpoint base URL environment key.
pub const ENV_API_BASE: &str = "PITSTOP_API_BASE";

/// Default remote endpoint base URL.
pub const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default embedded database file location, relative to the deployment root.
const DEFAULT_SQLITE_PATH: &str = "data/pitstop.sqlite";

// =============================================================================
// Modes
// =============================================================================

/// Process run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RunMode {
    /// Production deployment: degradation is disabled.
    Production,
    /// Test harness: the remote tier is never selected.
    Test,
    /// Anything else.
    #[default]
    Development,
}

impl RunMode {
    fn parse(value: Option<String>) -> Self {
        value
            .as_deref()
            .map(str::trim)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

/// Degradation policy for remote-tier failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FallbackMode {
    /// Remote failures always propagate.
    Strict,
    /// Infrastructure-class failures degrade to a local tier.
    #[default]
    Fallback,
}

// =============================================================================
// Remote configuration
// =============================================================================

/// Credentials and identifiers for the remote query endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Account identifier.
    pub account_id: String,
    /// Database identifier.
    pub database_id: String,
    /// Bearer token for the query endpoint.
    pub api_token: String,
    /// Endpoint base URL.
    pub api_base: String,
}

impl RemoteConfig {
    /// Resolve remote credentials from a key lookup.
    ///
    /// Returns `None` unless all three values are non-empty after trimming,
    /// and always `None` in [`RunMode::Test`].
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let mode = RunMode::parse(lookup(ENV_RUN_MODE));
        if mode == RunMode::Test {
            return None;
        }

        let account_id = non_empty(lookup(ENV_ACCOUNT_ID))?;
        let database_id = non_empty(lookup(ENV_DATABASE_ID))?;
        let api_token = non_empty(lookup(ENV_API_TOKEN))?;
        let api_base =
            non_empty(lookup(ENV_API_BASE)).unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Some(Self {
            account_id,
            database_id,
            api_token,
            api_base,
        })
    }

    /// Resolve remote credentials from the process environment.
    pub fn from_env() -> Option<Self> {
        Self::resolve(env_lookup)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

// =============================================================================
// Data-layer configuration
// =============================================================================

/// Full configuration for a [`crate::Database`] handle.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Remote tier credentials, when configured.
    pub remote: Option<RemoteConfig>,
    /// Degradation policy; forced to strict in production.
    pub fallback_mode: FallbackMode,
    /// Embedded database file location.
    pub sqlite_path: PathBuf,
}

impl DataConfig {
    /// Resolve the full configuration from a key lookup.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let run_mode = RunMode::parse(lookup(ENV_RUN_MODE));
        let fallback_mode = if run_mode == RunMode::Production {
            FallbackMode::Strict
        } else {
            non_empty(lookup(ENV_DB_MODE))
                .and_then(|v| v.parse().ok())
                .unwrap_or_default()
        };
        let sqlite_path = non_empty(lookup(ENV_SQLITE_PATH))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SQLITE_PATH));

        Self {
            remote: RemoteConfig::resolve(lookup),
            fallback_mode,
            sqlite_path,
        }
    }

    /// Resolve the full configuration from the process environment.
    pub fn from_env() -> Self {
        Self::resolve(env_lookup)
    }
}

// ── Core error taxonomy ──
//
// Domain-facing errors. Consumers never see raw socket errors or wire
// traps; the `From<wispctl_api::Error>` impl translates the transport
// layer into the variants below. Nothing in this crate terminates the
// hosting process -- schedulers catch per-customer, per-job.

use thiserror::Error;

use crate::store::StoreError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No usable router settings row exists (or the credentials it holds
    /// are rejected). Fatal to router operations until an administrator
    /// fixes the configuration; never retried automatically.
    #[error("Router not configured: {message}")]
    Configuration { message: String },

    /// Timeout or transport failure reaching the router. Not retried
    /// within the same call -- the next scheduled tick retries naturally.
    /// Results observed alongside this error are never cached.
    #[error("Cannot reach router: {reason}")]
    Connection { reason: String },

    /// Malformed queue parameters. Corrected or defaulted before
    /// transmission, so this never reaches an end caller.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// A migration's router-side step succeeded but the billing-mode flip
    /// did not (or vice versa). Recorded as a failed migration with enough
    /// detail to drive the repair path; never blindly rolled back.
    #[error("Migration left systems inconsistent: {detail}")]
    PartialMigration { detail: String },

    /// The router accepted the connection but rejected the command.
    #[error("Operation rejected by router: {message}")]
    Rejected { message: String },

    #[error("{entity} not found: {identifier}")]
    NotFound {
        entity: &'static str,
        identifier: String,
    },

    #[error("Billing store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn not_found(entity: &'static str, identifier: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            identifier: identifier.to_string(),
        }
    }
}

// ── Conversion from the wire layer ───────────────────────────────────

impl From<wispctl_api::Error> for CoreError {
    fn from(err: wispctl_api::Error) -> Self {
        match err {
            wispctl_api::Error::Authentication { message } => CoreError::Configuration {
                message: format!("router rejected the configured credentials: {message}"),
            },
            wispctl_api::Error::Io(e) => CoreError::Connection {
                reason: e.to_string(),
            },
            wispctl_api::Error::ConnectTimeout { timeout_secs } => CoreError::Connection {
                reason: format!("connect timed out after {timeout_secs}s"),
            },
            wispctl_api::Error::Tls(reason) => CoreError::Connection {
                reason: format!("TLS: {reason}"),
            },
            wispctl_api::Error::Protocol(reason) => CoreError::Connection {
                reason: format!("protocol desync: {reason}"),
            },
            wispctl_api::Error::Fatal { message } => CoreError::Connection {
                reason: format!("fatal router reply: {message}"),
            },
            wispctl_api::Error::Trap { message } => CoreError::Rejected { message },
        }
    }
}

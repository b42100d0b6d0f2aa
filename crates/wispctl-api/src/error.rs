use thiserror::Error;

/// Top-level error type for the `wispctl-api` crate.
///
/// Covers every failure mode of the binary control API: login, transport,
/// protocol framing, and command-level traps. `wispctl-core` maps these
/// into its own domain taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected (wrong credentials, disabled user, unsupported
    /// handshake).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// Socket-level failure (connection refused, reset, EOF mid-reply).
    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Connect attempt exceeded the configured timeout.
    #[error("Connect timed out after {timeout_secs}s")]
    ConnectTimeout { timeout_secs: u64 },

    /// TLS handshake or configuration error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Protocol ────────────────────────────────────────────────────
    /// The device sent bytes that do not form a valid sentence
    /// (reserved length prefix, non-UTF-8 word, reply without a type word).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Command-level error reply (`!trap`) from the device.
    #[error("Command rejected by router: {message}")]
    Trap { message: String },

    /// Connection-fatal reply (`!fatal`); the session is unusable afterwards.
    #[error("Fatal router error: {message}")]
    Fatal { message: String },
}

impl Error {
    /// Returns `true` if this is a transport-level failure where a fresh
    /// session might succeed (as opposed to a command the router rejected).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ConnectTimeout { .. } | Self::Fatal { .. }
        )
    }

    /// Returns `true` if the router itself rejected the command.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Trap { .. } | Self::Authentication { .. })
    }
}

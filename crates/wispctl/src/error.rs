use miette::Diagnostic;
use thiserror::Error;

/// CLI-level error, rendered through miette with an exit code.
#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] wispctl_core::CoreError),

    #[error(transparent)]
    Config(#[from] wispctl_config::ConfigError),

    #[error("{message}")]
    Validation { message: String },

    #[error("operation failed: {message}")]
    Operation { message: String },
}

impl CliError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Process exit code; configuration problems get their own code so
    /// wrappers can distinguish "fix your config" from "router is down".
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Core(wispctl_core::CoreError::Configuration { .. }) => 2,
            Self::Validation { .. } => 2,
            _ => 1,
        }
    }
}

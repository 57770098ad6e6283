//! CLI error type and exit-code mapping.

use shellup::engine::{EXIT_COMPONENT_FAILED, EXIT_FATAL};
use shellup::EngineError;
use thiserror::Error;

/// Errors surfaced to the user by the `shellup` binary.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded or is incomplete.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Logging could not be initialized.
    #[error("Logging error: {0}")]
    Logging(String),

    /// The engine reported an error.
    #[error("{0}")]
    Engine(#[from] EngineError),
}

impl CliError {
    /// Process exit code for this error.
    ///
    /// Engine-level failures (lock contention, corrupt manifest, failed
    /// rollback, bad configuration) end with `2`; anything scoped to a
    /// single component ends with `1`.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Logging(_) => EXIT_FATAL,
            Self::Engine(e) if e.is_engine_failure() => EXIT_FATAL,
            Self::Engine(_) => EXIT_COMPONENT_FAILED,
        }
    }

    /// Short kind label shown next to the message.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::Logging(_) => "IOError",
            Self::Engine(e) => e.kind().name(),
        }
    }
}

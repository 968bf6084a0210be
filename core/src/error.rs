//! Core error types and utilities

use thiserror::Error;

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Command parse error: {0}")]
    CommandParse(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Failed to spawn '{command}': {source}")]
    ProcessSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Signal error: {0}")]
    ProcessSignal(String),

    #[error("Failed to install signal handlers: {0}")]
    SignalInstall(std::io::Error),

    #[error("Supervision error: {0}")]
    Supervision(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CoreError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::CommandParse(_) => "HERD001",
            CoreError::ConfigurationError(_) => "HERD002",
            CoreError::ProcessSpawn { .. } => "HERD003",
            CoreError::ProcessSignal(_) => "HERD004",
            CoreError::SignalInstall(_) => "HERD005",
            CoreError::Supervision(_) => "HERD006",
            CoreError::IoError(_) => "HERD007",
        }
    }

    /// Whether this error is an exec-class spawn failure.
    ///
    /// An exec-class failure means the OS could create a process but the
    /// requested executable could not actually be run (missing binary,
    /// permission problem, malformed path). These are not fatal to the
    /// supervisor: the slot is treated as an ordinary child death and
    /// relaunched. Every other spawn failure (fd exhaustion, out of
    /// memory, fork failure) is fatal because the supervisor can no
    /// longer uphold its guarantees.
    pub fn is_exec_failure(&self) -> bool {
        match self {
            CoreError::ProcessSpawn { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::InvalidInput
            ),
            _ => false,
        }
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;

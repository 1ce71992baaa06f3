//! Error types for server sessions and their configuration

use std::path::PathBuf;

use crate::io::process::ProcessError;
use crate::lsp::LspError;

// ============================================================================
// Session Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Spawning or signalling the server process failed
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("LSP error: {0}")]
    Lsp(#[from] LspError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration validation and building errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid command {command:?} - {reason}")]
    InvalidCommand {
        command: Vec<String>,
        reason: String,
    },

    #[error("Workspace root validation failed: {root}")]
    RootValidation {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Workspace root cannot be expressed as a file URI: {root}")]
    RootUri { root: PathBuf },
}

impl ConfigError {
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid_command(command: &[String], reason: impl Into<String>) -> Self {
        Self::InvalidCommand {
            command: command.to_vec(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let session_error: SessionError = ConfigError::missing_field("command").into();
        assert!(matches!(
            session_error,
            SessionError::Config(ConfigError::MissingField { .. })
        ));
        assert_eq!(
            session_error.to_string(),
            "Configuration error: Missing required field: command"
        );

        let session_error: SessionError = ProcessError::NotStarted.into();
        assert!(matches!(session_error, SessionError::Process(_)));
    }
}

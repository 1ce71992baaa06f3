//! Configuration for server sessions
//!
//! [`ServerConfig`] describes one language server: how to launch it, which
//! workspace it serves and what it is told during `initialize`. Built through
//! [`ServerConfigBuilder`], which validates the command line and resolves the
//! workspace root.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::lsp::client::ClientOptions;
use crate::lsp::types::Uri;
use crate::server::error::ConfigError;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Server launched when neither the CLI nor `LSP_SERVER` names one
pub const DEFAULT_SERVER_PROGRAM: &str = "clangd";

/// Environment variable naming the server program
pub const SERVER_PROGRAM_ENV: &str = "LSP_SERVER";

/// Grace period per stage when a running session is dropped (200 ms)
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 200;

pub type StderrHandler = Arc<dyn Fn(String) + Send + Sync>;

// ============================================================================
// Core Configuration Types
// ============================================================================

#[derive(Clone)]
pub struct ServerConfig {
    /// Program followed by its arguments
    pub command: Vec<String>,

    /// Canonical workspace root; also the server's working directory
    pub root: PathBuf,

    /// `file://` form of `root`
    pub root_uri: Uri,

    /// Opaque `initializationOptions`
    pub initialization_options: Value,

    /// Advertise the semantic highlighting client capability
    pub semantic_highlighting: bool,

    /// Per-stage timeout used when a running session is dropped
    pub shutdown_timeout: Option<Duration>,

    /// Receives server stderr lines; without one they go to our stderr
    pub stderr_handler: Option<StderrHandler>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("command", &self.command)
            .field("root", &self.root)
            .field("root_uri", &self.root_uri)
            .field("initialization_options", &self.initialization_options)
            .field("semantic_highlighting", &self.semantic_highlighting)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field(
                "stderr_handler",
                &self.stderr_handler.as_ref().map(|_| "Fn(String)"),
            )
            .finish()
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    pub fn program(&self) -> &str {
        &self.command[0]
    }

    pub fn args(&self) -> &[String] {
        &self.command[1..]
    }

    pub(crate) fn client_options(&self) -> ClientOptions {
        ClientOptions {
            root_path: self.root.clone(),
            root_uri: self.root_uri.clone(),
            initialization_options: self.initialization_options.clone(),
            semantic_highlighting: self.semantic_highlighting,
        }
    }
}

/// Server program from the CLI, then `LSP_SERVER`, then the default
pub fn resolve_server_program(cli_program: Option<String>) -> String {
    cli_program
        .or_else(|| std::env::var(SERVER_PROGRAM_ENV).ok())
        .filter(|program| !program.is_empty())
        .unwrap_or_else(|| DEFAULT_SERVER_PROGRAM.to_string())
}

// ============================================================================
// Configuration Builder
// ============================================================================

pub struct ServerConfigBuilder {
    command: Vec<String>,
    root: Option<PathBuf>,
    initialization_options: Value,
    semantic_highlighting: bool,
    shutdown_timeout: Option<Duration>,
    stderr_handler: Option<StderrHandler>,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self {
            command: Vec::new(),
            root: None,
            initialization_options: Value::Null,
            semantic_highlighting: false,
            shutdown_timeout: Some(Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS)),
            stderr_handler: None,
        }
    }

    /// Set the program, replacing any previous one; arguments are kept
    pub fn program(mut self, program: impl Into<String>) -> Self {
        if self.command.is_empty() {
            self.command.push(program.into());
        } else {
            self.command[0] = program.into();
        }
        self
    }

    /// Append one argument; a program must be set first
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.command.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command.extend(args.into_iter().map(Into::into));
        self
    }

    /// Replace the whole command line
    pub fn command(mut self, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn initialization_options(mut self, options: Value) -> Self {
        self.initialization_options = options;
        self
    }

    pub fn semantic_highlighting(mut self, enabled: bool) -> Self {
        self.semantic_highlighting = enabled;
        self
    }

    /// `None` leaves a dropped session's process running
    pub fn shutdown_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn stderr_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.stderr_handler = Some(Arc::new(handler));
        self
    }

    /// Build the configuration with validation
    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        Self::validate_command(&self.command)?;
        let root = self
            .root
            .ok_or_else(|| ConfigError::missing_field("root"))?;
        let root = Self::resolve_root(&root)?;
        let root_uri = Url::from_file_path(&root)
            .ok()
            .and_then(|url| Uri::from_str(url.as_str()).ok())
            .ok_or_else(|| ConfigError::RootUri { root: root.clone() })?;

        Ok(ServerConfig {
            command: self.command,
            root,
            root_uri,
            initialization_options: self.initialization_options,
            semantic_highlighting: self.semantic_highlighting,
            shutdown_timeout: self.shutdown_timeout,
            stderr_handler: self.stderr_handler,
        })
    }

    fn validate_command(command: &[String]) -> Result<(), ConfigError> {
        let Some(program) = command.first() else {
            return Err(ConfigError::missing_field("command"));
        };
        if program.is_empty() {
            return Err(ConfigError::invalid_command(
                command,
                "Program cannot be empty",
            ));
        }
        if command.iter().any(|part| part.contains('\0')) {
            return Err(ConfigError::invalid_command(
                command,
                "Command contains null character",
            ));
        }
        Ok(())
    }

    /// The root must be an existing directory; it is canonicalized
    fn resolve_root(root: &Path) -> Result<PathBuf, ConfigError> {
        let canonical =
            std::fs::canonicalize(root).map_err(|source| ConfigError::RootValidation {
                root: root.to_path_buf(),
                source,
            })?;

        if !canonical.is_dir() {
            return Err(ConfigError::RootValidation {
                root: root.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "Workspace root is not a directory",
                ),
            });
        }

        Ok(canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_builder_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::builder()
            .program("clangd")
            .arg("--background-index")
            .root(dir.path())
            .build()
            .unwrap();

        assert_eq!(config.program(), "clangd");
        assert_eq!(config.args(), ["--background-index".to_string()]);
        assert_eq!(config.root, std::fs::canonicalize(dir.path()).unwrap());
        assert!(config.root_uri.as_str().starts_with("file:///"));
        assert_eq!(config.initialization_options, Value::Null);
        assert!(!config.semantic_highlighting);
        assert_eq!(
            config.shutdown_timeout,
            Some(Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS))
        );
    }

    #[test]
    fn test_root_uri_is_percent_encoded() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("my project");
        std::fs::create_dir(&root).unwrap();

        let config = ServerConfig::builder()
            .command(["pylsp"])
            .root(&root)
            .initialization_options(json!({"plugins": {}}))
            .build()
            .unwrap();
        assert!(config.root_uri.as_str().ends_with("/my%20project"));
        assert_eq!(config.client_options().initialization_options, json!({"plugins": {}}));
    }

    #[test]
    fn test_missing_command_and_root() {
        let dir = TempDir::new().unwrap();
        let result = ServerConfig::builder().root(dir.path()).build();
        assert!(matches!(result, Err(ConfigError::MissingField { ref field }) if field == "command"));

        let result = ServerConfig::builder().program("clangd").build();
        assert!(matches!(result, Err(ConfigError::MissingField { ref field }) if field == "root"));
    }

    #[test]
    fn test_invalid_root() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("main.cpp");
        std::fs::write(&file, "int main() {}").unwrap();

        for root in [file, dir.path().join("missing")] {
            let result = ServerConfig::builder().program("clangd").root(root).build();
            assert!(matches!(result, Err(ConfigError::RootValidation { .. })));
        }
    }

    #[test]
    fn test_invalid_command() {
        let dir = TempDir::new().unwrap();
        let result = ServerConfig::builder()
            .command(["", "--stdio"])
            .root(dir.path())
            .build();
        assert!(matches!(result, Err(ConfigError::InvalidCommand { .. })));
    }

    #[test]
    fn test_resolve_server_program_prefers_cli() {
        assert_eq!(resolve_server_program(Some("rust-analyzer".into())), "rust-analyzer");
    }
}

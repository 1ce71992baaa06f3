//! Server session layer
//!
//! Ties a supervised server process to the LSP client speaking to it.

pub mod config;
pub mod error;
pub mod session;

pub use config::{ServerConfig, ServerConfigBuilder, resolve_server_program};
pub use error::{ConfigError, SessionError};
pub use session::ServerSession;

//! Client side of the Language Server Protocol over a child process's stdio
//!
//! [`ServerSession`] spawns a language server, performs the `initialize`
//! handshake and exposes the typed request surface of [`LspClient`].
//! Server-initiated traffic arrives as [`SessionEvent`]s.

pub mod io;
pub mod logging;
pub mod lsp;
pub mod server;

#[cfg(test)]
mod test_utils;

pub use io::StopOutcome;
pub use lsp::{
    ApplyEditResponder, ClientOptions, Liveness, LspClient, LspError, ReplyHandler,
    RequestHandle, RequestKind, ServerCapabilities, SessionEvent, SessionState,
};
pub use server::{ConfigError, ServerConfig, ServerConfigBuilder, ServerSession, SessionError};

use thiserror::Error;

use crate::lsp::framing::FramingError;
use crate::lsp::types::SessionState;

#[derive(Error, Debug)]
pub enum LspError {
    #[error("Server not running (state: {0})")]
    NotRunning(SessionState),

    #[error("Transport to the server is closed")]
    TransportClosed,

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),
}

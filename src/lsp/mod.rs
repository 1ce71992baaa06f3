//! LSP protocol layer
//!
//! Framing, JSON-RPC envelopes, the typed wire codec, request correlation,
//! inbound dispatch and the client state machine built on top of them.

pub mod capabilities;
pub mod client;
pub mod codec;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod framing;
pub mod jsonrpc_utils;
pub mod params;
pub mod protocol;
pub mod semantic;
pub mod types;

pub use capabilities::ServerCapabilities;
pub use client::{ClientOptions, LspClient};
pub use correlator::{Liveness, LivenessToken, ReplyHandler, RequestHandle, RequestKind};
pub use dispatcher::{ApplyEditResponder, SessionEvent};
pub use error::LspError;
pub use framing::{FrameReader, LspFrameCodec};
pub use types::SessionState;

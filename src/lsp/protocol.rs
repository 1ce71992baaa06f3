//! JSON-RPC 2.0 protocol layer
//!
//! Envelope types for outbound messages and classification of inbound frames
//! into replies, server requests and notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;

// ============================================================================
// JSON-RPC Types
// ============================================================================

/// JSON-RPC request identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    /// Parse an identifier from a raw JSON value (numbers and strings only)
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RequestId::Number),
            Value::String(s) => Some(RequestId::String(s.clone())),
            _ => None,
        }
    }
}

impl From<u64> for RequestId {
    /// Ids beyond `i64::MAX` travel as their decimal string
    fn from(id: u64) -> Self {
        match i64::try_from(id) {
            Ok(n) => RequestId::Number(n),
            Err(_) => RequestId::String(id.to_string()),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// JSON-RPC 2.0 request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request identifier
    pub id: RequestId,

    /// Method name
    pub method: String,

    /// Optional parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request identifier (matches the request)
    pub id: RequestId,

    /// Result (present if successful)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error (present if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

/// JSON-RPC 2.0 notification message (no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Method name
    pub method: String,

    /// Optional parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    /// Error code
    pub code: i32,

    /// Error message
    pub message: String,

    /// Optional additional data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ============================================================================
// Inbound Classification
// ============================================================================

/// One inbound frame, classified by the presence of `id` and `method`
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// `id` without `method`: the answer to one of our requests
    Reply {
        id: RequestId,
        result: Value,
        error: Option<JsonRpcErrorObject>,
    },
    /// `id` and `method`: the server expects an answer from us
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    /// `method` without `id`
    Notification { method: String, params: Value },
}

impl InboundMessage {
    /// Classify a decoded frame; frames with neither `id` nor `method` yield `None`
    pub fn classify(frame: Value) -> Option<Self> {
        let Value::Object(mut fields) = frame else {
            return None;
        };

        let id = fields.remove("id").filter(|id| !id.is_null());
        let method = match fields.remove("method") {
            Some(Value::String(method)) => Some(method),
            _ => None,
        };
        let params = fields.remove("params").unwrap_or(Value::Null);

        match (id, method) {
            (Some(raw_id), method) => {
                let Some(id) = RequestId::from_value(&raw_id) else {
                    warn!("Discarding frame with unsupported id {}", raw_id);
                    return None;
                };
                match method {
                    Some(method) => Some(InboundMessage::Request { id, method, params }),
                    None => {
                        let error = fields
                            .remove("error")
                            .and_then(|e| serde_json::from_value(e).ok());
                        let result = fields.remove("result").unwrap_or(Value::Null);
                        Some(InboundMessage::Reply { id, result, error })
                    }
                }
            }
            (None, Some(method)) => Some(InboundMessage::Notification { method, params }),
            (None, None) => None,
        }
    }
}

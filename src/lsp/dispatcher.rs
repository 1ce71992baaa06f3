//! Inbound dispatcher
//!
//! Routes classified frames: replies to the correlator, notifications and
//! server requests to [`SessionEvent`]s. Server requests this client owes an
//! answer to are tracked in a small window; the oldest is evicted when a new
//! one arrives while the window is full.

use lsp_types::notification::{self as notif, Notification as _};
use lsp_types::request::{self as req, Request as _};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{Level, debug, trace, warn};

use crate::log_lsp_message;
use crate::lsp::client::ClientShared;
use crate::lsp::codec::{parse_apply_edit_params, parse_publish_diagnostics};
use crate::lsp::jsonrpc_utils::{method_not_found_response, success_response};
use crate::lsp::params::apply_edit_response;
use crate::lsp::protocol::{InboundMessage, JsonRpcErrorObject, RequestId};
use crate::lsp::semantic::{SemanticHighlightingParams, parse_semantic_highlighting};
use crate::lsp::types::{
    ApplyWorkspaceEditParams, ApplyWorkspaceEditResponse, PublishDiagnosticsParams, SessionState,
};

/// Server requests awaiting our response at any one time
pub const INBOUND_WINDOW_CAPACITY: usize = 5;

/// Pre-standard clangd extension; not part of `lsp-types`
pub const SEMANTIC_HIGHLIGHTING_METHOD: &str = "textDocument/semanticHighlighting";

// ============================================================================
// Session Events
// ============================================================================

/// Everything a session reports to its owner, in arrival order
#[derive(Debug)]
pub enum SessionEvent {
    StateChanged(SessionState),
    Diagnostics(PublishDiagnosticsParams),
    SemanticHighlighting(SemanticHighlightingParams),
    /// `workspace/applyEdit`; answer through `responder`
    ApplyEdit {
        params: ApplyWorkspaceEditParams,
        responder: ApplyEditResponder,
    },
}

/// Response continuation for one `workspace/applyEdit` request
pub struct ApplyEditResponder {
    id: RequestId,
    client: Weak<ClientShared>,
}

impl ApplyEditResponder {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Send the response; returns false when it was discarded because the
    /// request was evicted from the window or the session is gone
    pub fn respond(self, response: ApplyWorkspaceEditResponse) -> bool {
        let Some(client) = self.client.upgrade() else {
            debug!("Session gone, discarding applyEdit response {}", self.id);
            return false;
        };

        let mut core = client.lock();
        if !core.inbound.complete(&self.id) {
            warn!("Request {} no longer tracked, discarding response", self.id);
            return false;
        }

        let message = success_response(self.id, apply_edit_response(&response));
        match core.write(&message) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send applyEdit response: {}", e);
                false
            }
        }
    }
}

impl fmt::Debug for ApplyEditResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplyEditResponder")
            .field("id", &self.id)
            .finish()
    }
}

// ============================================================================
// Inbound Request Window
// ============================================================================

/// FIFO of server request ids still owed a response
#[derive(Debug, Default)]
pub(crate) struct InboundWindow {
    ids: VecDeque<RequestId>,
}

impl InboundWindow {
    /// Start tracking `id`; returns the evicted id when the window was full
    pub fn track(&mut self, id: RequestId) -> Option<RequestId> {
        let evicted = if self.ids.len() == INBOUND_WINDOW_CAPACITY {
            self.ids.pop_front()
        } else {
            None
        };
        self.ids.push_back(id);
        evicted
    }

    /// Stop tracking `id`; false when it was never tracked or already evicted
    pub fn complete(&mut self, id: &RequestId) -> bool {
        match self.ids.iter().position(|tracked| tracked == id) {
            Some(index) => {
                self.ids.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Dispatch one decoded frame
///
/// Never called with the session lock held; reply callbacks run unlocked.
pub(crate) fn dispatch(client: &Arc<ClientShared>, frame: Value) {
    let Some(message) = InboundMessage::classify(frame) else {
        debug!("Discarding unclassifiable frame");
        return;
    };

    match message {
        InboundMessage::Reply { id, result, error } => dispatch_reply(client, id, result, error),
        InboundMessage::Request { id, method, params } => {
            dispatch_request(client, id, &method, params)
        }
        InboundMessage::Notification { method, params } => {
            dispatch_notification(client, &method, &params)
        }
    }
}

fn dispatch_reply(
    client: &Arc<ClientShared>,
    id: RequestId,
    result: Value,
    error: Option<JsonRpcErrorObject>,
) {
    let pending = client.lock().correlator.take(&id);
    let Some(pending) = pending else {
        debug!("No handler for reply {}, discarding", id);
        return;
    };

    log_lsp_message!(Level::TRACE, "incoming", pending.kind.method(), &result);
    if let Some(error) = error {
        warn!(
            "{} request {} failed: {} ({})",
            pending.kind.method(),
            id,
            error.message,
            error.code
        );
    }
    (pending.deliver)(result);
}

fn dispatch_request(client: &Arc<ClientShared>, id: RequestId, method: &str, params: Value) {
    log_lsp_message!(Level::TRACE, "incoming", method, &params);

    if method != req::ApplyWorkspaceEdit::METHOD {
        warn!("Unsupported server request {}, answering MethodNotFound", method);
        if let Err(e) = client
            .lock()
            .write(&method_not_found_response(id, method))
        {
            warn!("Failed to answer {}: {}", method, e);
        }
        return;
    }

    let params = parse_apply_edit_params(&params);
    {
        let mut core = client.lock();
        if let Some(evicted) = core.inbound.track(id.clone()) {
            warn!(
                "Too many pending server requests, dropping request {}",
                evicted
            );
        }
    }

    client.emit(SessionEvent::ApplyEdit {
        params,
        responder: ApplyEditResponder {
            id,
            client: Arc::downgrade(client),
        },
    });
}

fn dispatch_notification(client: &Arc<ClientShared>, method: &str, params: &Value) {
    log_lsp_message!(Level::TRACE, "incoming", method, params);

    if method == notif::PublishDiagnostics::METHOD {
        match parse_publish_diagnostics(params) {
            Some(diagnostics) => client.emit(SessionEvent::Diagnostics(diagnostics)),
            None => warn!("Discarding publishDiagnostics without a valid uri"),
        }
    } else if method == SEMANTIC_HIGHLIGHTING_METHOD {
        client.emit(SessionEvent::SemanticHighlighting(
            parse_semantic_highlighting(params),
        ));
    } else {
        debug!("Ignoring unhandled notification {}", method);
    }
}

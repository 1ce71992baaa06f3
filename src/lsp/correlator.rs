//! Request correlation
//!
//! Outbound requests get a fresh id and a pending reply entry. A reply is
//! delivered at most once; cancelled or cleared entries are never invoked.

use lsp_types::request::{self as req, Request as _};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::lsp::codec::DecodeReply;
use crate::lsp::protocol::RequestId;

// ============================================================================
// Request Kinds
// ============================================================================

/// Every request this client issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Initialize,
    Shutdown,
    DocumentSymbol,
    Definition,
    Declaration,
    Hover,
    DocumentHighlight,
    References,
    Completion,
    SignatureHelp,
    Formatting,
    RangeFormatting,
    OnTypeFormatting,
    Rename,
    CodeAction,
    ExecuteCommand,
}

impl RequestKind {
    pub fn method(self) -> &'static str {
        match self {
            RequestKind::Initialize => req::Initialize::METHOD,
            RequestKind::Shutdown => req::Shutdown::METHOD,
            RequestKind::DocumentSymbol => req::DocumentSymbolRequest::METHOD,
            RequestKind::Definition => req::GotoDefinition::METHOD,
            RequestKind::Declaration => req::GotoDeclaration::METHOD,
            RequestKind::Hover => req::HoverRequest::METHOD,
            RequestKind::DocumentHighlight => req::DocumentHighlightRequest::METHOD,
            RequestKind::References => req::References::METHOD,
            RequestKind::Completion => req::Completion::METHOD,
            RequestKind::SignatureHelp => req::SignatureHelpRequest::METHOD,
            RequestKind::Formatting => req::Formatting::METHOD,
            RequestKind::RangeFormatting => req::RangeFormatting::METHOD,
            RequestKind::OnTypeFormatting => req::OnTypeFormatting::METHOD,
            RequestKind::Rename => req::Rename::METHOD,
            RequestKind::CodeAction => req::CodeActionRequest::METHOD,
            RequestKind::ExecuteCommand => req::ExecuteCommand::METHOD,
        }
    }
}

// ============================================================================
// Liveness
// ============================================================================

/// Owner side of a liveness pair; reply handlers bound to it are skipped once
/// it is dropped
#[derive(Debug, Default)]
pub struct Liveness(Arc<()>);

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> LivenessToken {
        LivenessToken(Arc::downgrade(&self.0))
    }
}

#[derive(Debug, Clone)]
pub struct LivenessToken(Weak<()>);

impl LivenessToken {
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

// ============================================================================
// Reply Handlers
// ============================================================================

/// Typed callback for one reply
pub struct ReplyHandler<T> {
    callback: Box<dyn FnOnce(T) + Send>,
    liveness: Option<LivenessToken>,
}

impl<T: DecodeReply> ReplyHandler<T> {
    pub fn new(callback: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            callback: Box::new(callback),
            liveness: None,
        }
    }

    /// Only invoke `callback` while `owner` is still alive
    pub fn bound(owner: &Liveness, callback: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            callback: Box::new(callback),
            liveness: Some(owner.token()),
        }
    }

    /// Erase the reply type; the decoder runs once, at dispatch time
    pub(crate) fn into_pending(self, kind: RequestKind) -> PendingReply {
        let ReplyHandler { callback, liveness } = self;
        PendingReply {
            kind,
            deliver: Box::new(move |result: Value| {
                if liveness.as_ref().is_some_and(|token| !token.is_alive()) {
                    debug!("Dropping {} reply for a released receiver", kind.method());
                    return;
                }
                callback(T::decode_reply(&result));
            }),
        }
    }
}

impl<T> fmt::Debug for ReplyHandler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyHandler")
            .field("bound", &self.liveness.is_some())
            .finish()
    }
}

/// Type-erased reply continuation stored under a request id
pub(crate) struct PendingReply {
    pub kind: RequestKind,
    pub deliver: Box<dyn FnOnce(Value) + Send>,
}

impl fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReply").field("kind", &self.kind).finish()
    }
}

// ============================================================================
// Correlator
// ============================================================================

/// Id allocation and the id -> pending reply map
#[derive(Debug, Default)]
pub(crate) struct RequestCorrelator {
    next_id: u64,
    pending: HashMap<u64, PendingReply>,
}

impl RequestCorrelator {
    /// Ids start at 1 and are never reused
    pub fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn register(&mut self, id: u64, reply: PendingReply) {
        self.pending.insert(id, reply);
    }

    /// Remove the entry a reply with `id` answers, if any
    pub fn take(&mut self, id: &RequestId) -> Option<PendingReply> {
        let key = match id {
            RequestId::Number(n) => u64::try_from(*n).ok(),
            // only ids too large for a JSON number were sent as strings
            RequestId::String(s) => s
                .parse::<u64>()
                .ok()
                .filter(|n| RequestId::from(*n) == *id),
        }?;
        self.pending.remove(&key)
    }

    /// Returns whether a handler was still registered
    pub fn cancel(&mut self, id: u64) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Drop every pending entry without invoking it
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

// ============================================================================
// Request Handles
// ============================================================================

/// Seam between handles and the session that issued them
pub(crate) trait CancelRequest: Send + Sync {
    fn cancel_request(&self, id: u64);
}

/// Identifies one in-flight request; empty when the request was not sent
#[derive(Clone, Default)]
pub struct RequestHandle {
    id: Option<u64>,
    owner: Option<Weak<dyn CancelRequest>>,
}

impl RequestHandle {
    pub(crate) fn new(id: u64, owner: Weak<dyn CancelRequest>) -> Self {
        Self {
            id: Some(id),
            owner: Some(owner),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn id(&self) -> Option<u64> {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.id.is_some()
    }

    /// Best-effort cancellation; a no-op once the reply was dispatched
    pub fn cancel(&self) {
        if let (Some(id), Some(owner)) = (self.id, self.owner.as_ref().and_then(Weak::upgrade)) {
            owner.cancel_request(id);
        }
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle").field("id", &self.id).finish()
    }
}

//! Typed structures exchanged with collaborators
//!
//! Positions, ranges, locations and a handful of protocol enums come from
//! `lsp-types`; the reply shapes below are the lenient, already-normalized
//! views produced by [`crate::lsp::codec`].

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

pub use lsp_types::{
    CompletionItemKind, DiagnosticSeverity, DocumentHighlight, DocumentHighlightKind, Location,
    MarkupContent, MarkupKind, Position, Range, SymbolKind, TextEdit, Uri,
};

// ============================================================================
// Session State
// ============================================================================

/// Lifecycle of one server session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SessionState {
    /// No process, or the process went away
    #[default]
    None,
    /// Process spawned, `initialize` in flight
    Started,
    /// Handshake complete, feature requests allowed
    Running,
    /// `shutdown` + `exit` sent
    Shutdown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::None => "none",
            SessionState::Started => "started",
            SessionState::Running => "running",
            SessionState::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Reply Types
// ============================================================================

/// Document symbol with its nested children
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSymbol {
    pub name: String,
    pub detail: String,
    pub kind: Option<SymbolKind>,
    pub range: Range,
    pub children: Vec<DocumentSymbol>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Hover {
    pub contents: Vec<MarkupContent>,
    pub range: Option<Range>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionItem {
    pub label: String,
    pub kind: Option<CompletionItemKind>,
    pub detail: String,
    pub documentation: Option<MarkupContent>,
    /// Falls back to `label` when the server sends none
    pub sort_text: String,
    /// Falls back to `label` when the server sends none
    pub insert_text: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SignatureHelp {
    pub signatures: Vec<SignatureInformation>,
    pub active_signature: usize,
    pub active_parameter: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignatureInformation {
    pub label: String,
    pub documentation: Option<MarkupContent>,
    pub parameters: Vec<ParameterInformation>,
}

/// Parameter position inside its signature label, as character offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParameterInformation {
    pub start: Option<usize>,
    pub end: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct WorkspaceEdit {
    pub changes: HashMap<Uri, Vec<TextEdit>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Command {
    pub title: String,
    pub command: String,
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeAction {
    pub title: String,
    pub kind: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub edit: WorkspaceEdit,
    pub command: Option<Command>,
}

/// One entry of a `textDocument/codeAction` reply
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CodeActionOrCommand {
    Command(Command),
    CodeAction(CodeAction),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub range: Range,
    pub severity: Option<DiagnosticSeverity>,
    /// Numeric codes are carried in their decimal form
    pub code: Option<String>,
    pub source: Option<String>,
    pub message: String,
    pub related_information: Vec<DiagnosticRelatedInformation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticRelatedInformation {
    pub location: Location,
    pub message: String,
}

// ============================================================================
// Inbound Params
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishDiagnosticsParams {
    pub uri: Uri,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ApplyWorkspaceEditParams {
    pub label: Option<String>,
    pub edit: WorkspaceEdit,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ApplyWorkspaceEditResponse {
    pub applied: bool,
    pub failure_reason: Option<String>,
}

// ============================================================================
// Outbound Params
// ============================================================================

/// One `didChange` content change; no range means the full text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocumentContentChange {
    pub range: Option<Range>,
    pub text: String,
}

impl TextDocumentContentChange {
    pub fn full(text: impl Into<String>) -> Self {
        Self {
            range: None,
            text: text.into(),
        }
    }

    pub fn ranged(range: Range, text: impl Into<String>) -> Self {
        Self {
            range: Some(range),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormattingOptions {
    pub tab_size: u32,
    pub insert_spaces: bool,
    /// Additional properties sent verbatim alongside the two required ones
    pub extra: Map<String, Value>,
}

impl Default for FormattingOptions {
    fn default() -> Self {
        Self {
            tab_size: 4,
            insert_spaces: true,
            extra: Map::new(),
        }
    }
}

//! Capability negotiation
//!
//! What this client advertises in `initialize`, and the snapshot of what the
//! server declared in return.

use lsp_types as lsp;
use serde::Serialize;
use serde_json::{Value, json};

/// `textDocumentSync` change mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DocumentSyncKind {
    #[default]
    None,
    Full,
    Incremental,
}

impl DocumentSyncKind {
    fn from_value(value: &Value) -> Self {
        match value.as_u64() {
            Some(1) => DocumentSyncKind::Full,
            Some(2) => DocumentSyncKind::Incremental,
            _ => DocumentSyncKind::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CompletionOptions {
    pub provider: bool,
    pub resolve_provider: bool,
    pub trigger_characters: Vec<char>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SignatureHelpOptions {
    pub provider: bool,
    pub trigger_characters: Vec<char>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct OnTypeFormattingOptions {
    pub provider: bool,
    /// `firstTriggerCharacter` first, then `moreTriggerCharacter`
    pub trigger_characters: Vec<char>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SemanticHighlightingOptions {
    /// Scope names per scope id, as declared by the server
    pub scopes: Vec<Vec<String>>,
}

/// Server capabilities as declared in the `initialize` reply
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ServerCapabilities {
    pub text_document_sync: DocumentSyncKind,
    pub hover_provider: bool,
    pub completion_provider: CompletionOptions,
    pub signature_help_provider: SignatureHelpOptions,
    pub definition_provider: bool,
    pub declaration_provider: bool,
    pub references_provider: bool,
    pub document_symbol_provider: bool,
    pub document_highlight_provider: bool,
    pub document_formatting_provider: bool,
    pub document_range_formatting_provider: bool,
    pub document_on_type_formatting_provider: OnTypeFormattingOptions,
    pub rename_provider: bool,
    pub code_action_provider: bool,
    pub semantic_highlighting_provider: SemanticHighlightingOptions,
}

/// Providers may be declared as `true` or as an options object
fn provider_flag(value: &Value) -> bool {
    value.as_bool().unwrap_or_else(|| value.is_object())
}

fn trigger_characters(value: &Value) -> Vec<char> {
    value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|t| t.as_str().and_then(|s| s.chars().next()))
        .collect()
}

impl ServerCapabilities {
    /// Parse the `capabilities` member of an `initialize` result; anything
    /// absent or mistyped stays unsupported
    pub fn from_json(caps: &Value) -> Self {
        let sync = &caps["textDocumentSync"];
        let text_document_sync = if sync.is_object() {
            DocumentSyncKind::from_value(&sync["change"])
        } else {
            DocumentSyncKind::from_value(sync)
        };

        let completion = &caps["completionProvider"];
        let completion_provider = if completion.is_object() {
            CompletionOptions {
                provider: true,
                resolve_provider: completion["resolveProvider"].as_bool().unwrap_or(false),
                trigger_characters: trigger_characters(&completion["triggerCharacters"]),
            }
        } else {
            CompletionOptions::default()
        };

        let signature = &caps["signatureHelpProvider"];
        let signature_help_provider = if signature.is_object() {
            SignatureHelpOptions {
                provider: true,
                trigger_characters: trigger_characters(&signature["triggerCharacters"]),
            }
        } else {
            SignatureHelpOptions::default()
        };

        let on_type = &caps["documentOnTypeFormattingProvider"];
        let document_on_type_formatting_provider = if on_type.is_object() {
            let mut trigger_characters = trigger_characters(&on_type["moreTriggerCharacter"]);
            if let Some(first) = on_type["firstTriggerCharacter"]
                .as_str()
                .and_then(|s| s.chars().next())
            {
                trigger_characters.insert(0, first);
            }
            OnTypeFormattingOptions {
                provider: true,
                trigger_characters,
            }
        } else {
            OnTypeFormattingOptions::default()
        };

        let scopes = caps["semanticHighlighting"]["scopes"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|entry| {
                entry
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(|name| name.as_str().unwrap_or_default().to_string())
                    .collect()
            })
            .collect();

        Self {
            text_document_sync,
            hover_provider: provider_flag(&caps["hoverProvider"]),
            completion_provider,
            signature_help_provider,
            definition_provider: provider_flag(&caps["definitionProvider"]),
            declaration_provider: provider_flag(&caps["declarationProvider"]),
            references_provider: provider_flag(&caps["referencesProvider"]),
            document_symbol_provider: provider_flag(&caps["documentSymbolProvider"]),
            document_highlight_provider: provider_flag(&caps["documentHighlightProvider"]),
            document_formatting_provider: provider_flag(&caps["documentFormattingProvider"]),
            document_range_formatting_provider: provider_flag(
                &caps["documentRangeFormattingProvider"],
            ),
            document_on_type_formatting_provider,
            rename_provider: provider_flag(&caps["renameProvider"]),
            code_action_provider: provider_flag(&caps["codeActionProvider"]),
            semantic_highlighting_provider: SemanticHighlightingOptions { scopes },
        }
    }
}

/// Client capabilities advertised in `initialize`
pub fn client_capabilities() -> lsp::ClientCapabilities {
    lsp::ClientCapabilities {
        text_document: Some(lsp::TextDocumentClientCapabilities {
            document_symbol: Some(lsp::DocumentSymbolClientCapabilities {
                hierarchical_document_symbol_support: Some(true),
                ..Default::default()
            }),
            publish_diagnostics: Some(lsp::PublishDiagnosticsClientCapabilities {
                related_information: Some(true),
                ..Default::default()
            }),
            code_action: Some(lsp::CodeActionClientCapabilities {
                code_action_literal_support: Some(lsp::CodeActionLiteralSupport {
                    code_action_kind: lsp::CodeActionKindLiteralSupport {
                        value_set: Vec::new(),
                    },
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Add the pre-standard `semanticHighlightingCapabilities` member, which
/// `lsp-types` does not model, to serialized client capabilities
pub fn advertise_semantic_highlighting(capabilities: &mut Value, enabled: bool) {
    capabilities["textDocument"]["semanticHighlightingCapabilities"] =
        json!({"semanticHighlighting": enabled});
}

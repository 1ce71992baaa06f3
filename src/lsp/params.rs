//! Wire codec: outbound params
//!
//! Builders for the `params` member of every request and notification this
//! client sends. Standard messages go through the `lsp-types` structs; only the
//! pieces those structs cannot carry are patched in as raw JSON.

use lsp_types as lsp;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tracing::warn;

use crate::lsp::capabilities::{advertise_semantic_highlighting, client_capabilities};
use crate::lsp::types::{
    ApplyWorkspaceEditResponse, Diagnostic, FormattingOptions, Position, Range,
    TextDocumentContentChange, Uri,
};

/// Serialize a params struct; a failure degrades to `null`, which is omitted
pub(crate) fn to_json<T: Serialize>(params: &T) -> Value {
    serde_json::to_value(params).unwrap_or_else(|e| {
        warn!("Failed to serialize params: {}", e);
        Value::Null
    })
}

fn identifier(uri: &Uri) -> lsp::TextDocumentIdentifier {
    lsp::TextDocumentIdentifier::new(uri.clone())
}

fn document_position(uri: &Uri, position: &Position) -> lsp::TextDocumentPositionParams {
    lsp::TextDocumentPositionParams::new(identifier(uri), *position)
}

/// Diagnostics are echoed back in `codeAction` requests
fn lsp_diagnostic(diagnostic: &Diagnostic) -> lsp::Diagnostic {
    let related: Vec<_> = diagnostic
        .related_information
        .iter()
        .map(|related| lsp::DiagnosticRelatedInformation {
            location: related.location.clone(),
            message: related.message.clone(),
        })
        .collect();

    lsp::Diagnostic {
        range: diagnostic.range,
        severity: diagnostic.severity,
        code: diagnostic.code.clone().map(lsp::NumberOrString::String),
        source: diagnostic.source.clone(),
        message: diagnostic.message.clone(),
        related_information: (!related.is_empty()).then_some(related),
        ..Default::default()
    }
}

/// `tabSize` and `insertSpaces` always come from the typed fields
fn lsp_formatting_options(options: &FormattingOptions) -> lsp::FormattingOptions {
    lsp::FormattingOptions {
        tab_size: options.tab_size,
        insert_spaces: options.insert_spaces,
        ..Default::default()
    }
}

/// Merge free-form formatting properties into a serialized `options` member
fn with_extra_options(mut params: Value, options: &FormattingOptions) -> Value {
    if let Some(serialized) = params["options"].as_object_mut() {
        for (key, value) in &options.extra {
            serialized.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    params
}

pub fn initialized_params() -> Value {
    to_json(&lsp::InitializedParams {})
}

/// Ids past `i32::MAX` travel in their string form
pub fn cancel_params(id: u64) -> Value {
    let id = i32::try_from(id).map_or_else(
        |_| lsp::NumberOrString::String(id.to_string()),
        lsp::NumberOrString::Number,
    );
    to_json(&lsp::CancelParams { id })
}

pub fn text_document_position_params(uri: &Uri, position: &Position) -> Value {
    to_json(&document_position(uri, position))
}

pub fn document_symbol_params(uri: &Uri) -> Value {
    to_json(&lsp::DocumentSymbolParams {
        text_document: identifier(uri),
        work_done_progress_params: Default::default(),
        partial_result_params: Default::default(),
    })
}

pub fn completion_params(uri: &Uri, position: &Position) -> Value {
    to_json(&lsp::CompletionParams {
        text_document_position: document_position(uri, position),
        work_done_progress_params: Default::default(),
        partial_result_params: Default::default(),
        context: None,
    })
}

pub fn signature_help_params(uri: &Uri, position: &Position) -> Value {
    to_json(&lsp::SignatureHelpParams {
        context: None,
        text_document_position_params: document_position(uri, position),
        work_done_progress_params: Default::default(),
    })
}

pub fn did_open_params(uri: &Uri, version: i32, language_id: &str, text: &str) -> Value {
    to_json(&lsp::DidOpenTextDocumentParams {
        text_document: lsp::TextDocumentItem::new(
            uri.clone(),
            language_id.to_string(),
            version,
            text.to_string(),
        ),
    })
}

pub fn did_change_params(
    uri: &Uri,
    version: Option<i32>,
    changes: &[TextDocumentContentChange],
) -> Value {
    let content_changes = changes
        .iter()
        .map(|change| lsp::TextDocumentContentChangeEvent {
            range: change.range,
            range_length: None,
            text: change.text.clone(),
        })
        .collect();

    let mut params = to_json(&lsp::DidChangeTextDocumentParams {
        text_document: lsp::VersionedTextDocumentIdentifier::new(
            uri.clone(),
            version.unwrap_or_default(),
        ),
        content_changes,
    });
    // an unknown version is left out rather than invented
    if version.is_none() {
        if let Some(document) = params["textDocument"].as_object_mut() {
            document.remove("version");
        }
    }
    params
}

pub fn did_save_params(uri: &Uri, text: Option<&str>) -> Value {
    to_json(&lsp::DidSaveTextDocumentParams {
        text_document: identifier(uri),
        text: text.map(str::to_string),
    })
}

pub fn did_close_params(uri: &Uri) -> Value {
    to_json(&lsp::DidCloseTextDocumentParams {
        text_document: identifier(uri),
    })
}

pub fn reference_params(uri: &Uri, position: &Position, include_declaration: bool) -> Value {
    to_json(&lsp::ReferenceParams {
        text_document_position: document_position(uri, position),
        work_done_progress_params: Default::default(),
        partial_result_params: Default::default(),
        context: lsp::ReferenceContext {
            include_declaration,
        },
    })
}

pub fn formatting_params(uri: &Uri, options: &FormattingOptions) -> Value {
    let params = to_json(&lsp::DocumentFormattingParams {
        text_document: identifier(uri),
        options: lsp_formatting_options(options),
        work_done_progress_params: Default::default(),
    });
    with_extra_options(params, options)
}

pub fn range_formatting_params(uri: &Uri, range: &Range, options: &FormattingOptions) -> Value {
    let params = to_json(&lsp::DocumentRangeFormattingParams {
        text_document: identifier(uri),
        range: *range,
        options: lsp_formatting_options(options),
        work_done_progress_params: Default::default(),
    });
    with_extra_options(params, options)
}

pub fn on_type_formatting_params(
    uri: &Uri,
    position: &Position,
    ch: char,
    options: &FormattingOptions,
) -> Value {
    let params = to_json(&lsp::DocumentOnTypeFormattingParams {
        text_document_position: document_position(uri, position),
        ch: ch.to_string(),
        options: lsp_formatting_options(options),
    });
    with_extra_options(params, options)
}

pub fn rename_params(uri: &Uri, position: &Position, new_name: &str) -> Value {
    to_json(&lsp::RenameParams {
        text_document_position: document_position(uri, position),
        new_name: new_name.to_string(),
        work_done_progress_params: Default::default(),
    })
}

pub fn code_action_params(
    uri: &Uri,
    range: &Range,
    kinds: &[String],
    diagnostics: &[Diagnostic],
) -> Value {
    let only = (!kinds.is_empty()).then(|| {
        kinds
            .iter()
            .map(|kind| lsp::CodeActionKind::from(kind.clone()))
            .collect()
    });

    to_json(&lsp::CodeActionParams {
        text_document: identifier(uri),
        range: *range,
        context: lsp::CodeActionContext {
            diagnostics: diagnostics.iter().map(lsp_diagnostic).collect(),
            only,
            trigger_kind: None,
        },
        work_done_progress_params: Default::default(),
        partial_result_params: Default::default(),
    })
}

/// An array is spread into `arguments`; `null` sends none
pub fn execute_command_params(command: &str, arguments: Value) -> Value {
    let arguments = match arguments {
        Value::Array(arguments) => arguments,
        Value::Null => Vec::new(),
        single => vec![single],
    };
    to_json(&lsp::ExecuteCommandParams {
        command: command.to_string(),
        arguments,
        work_done_progress_params: Default::default(),
    })
}

pub fn did_change_configuration_params(settings: Value) -> Value {
    to_json(&lsp::DidChangeConfigurationParams { settings })
}

pub fn apply_edit_response(response: &ApplyWorkspaceEditResponse) -> Value {
    to_json(&lsp::ApplyWorkspaceEditResponse {
        applied: response.applied,
        failure_reason: response.failure_reason.clone(),
        failed_change: None,
    })
}

pub fn initialize_params(
    process_id: u32,
    root_path: &Path,
    root_uri: &Uri,
    semantic_highlighting: bool,
    initialization_options: Value,
) -> Value {
    let params = lsp::InitializeParams {
        process_id: Some(process_id),
        #[allow(deprecated)]
        root_path: Some(root_path.to_string_lossy().into_owned()),
        #[allow(deprecated)]
        root_uri: Some(root_uri.clone()),
        initialization_options: (!initialization_options.is_null())
            .then_some(initialization_options),
        capabilities: client_capabilities(),
        trace: None,
        workspace_folders: None,
        client_info: Some(lsp::ClientInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
        locale: None,
        work_done_progress_params: Default::default(),
    };

    let mut params = to_json(&params);
    advertise_semantic_highlighting(&mut params["capabilities"], semantic_highlighting);
    params
}

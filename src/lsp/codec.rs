//! Wire codec: JSON payloads to typed structures
//!
//! Decoding is lenient. Missing or mistyped members fall back to empty values
//! and entries without a usable position are skipped rather than failing the
//! whole reply.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use url::Url;

use crate::lsp::types::{
    ApplyWorkspaceEditParams, CodeAction, CodeActionOrCommand, Command, CompletionItem,
    Diagnostic, DiagnosticRelatedInformation, DocumentHighlight, DocumentHighlightKind,
    DocumentSymbol, Hover, Location, MarkupContent, MarkupKind, ParameterInformation, Position,
    PublishDiagnosticsParams, Range, SignatureHelp, SignatureInformation, TextEdit, Uri,
    WorkspaceEdit,
};

/// Decoder attached to a request kind; applied once to the reply's `result`
pub trait DecodeReply: Sized + Send + 'static {
    fn decode_reply(result: &Value) -> Self;
}

// ============================================================================
// Primitives
// ============================================================================

fn string_field(value: &Value, key: &str) -> String {
    value[key].as_str().unwrap_or_default().to_string()
}

fn optional_string(value: &Value, key: &str) -> Option<String> {
    value[key]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Protocol enums are transparent integers in `lsp-types`
fn protocol_enum<T: DeserializeOwned>(value: &Value) -> Option<T> {
    if value.is_number() {
        serde_json::from_value(value.clone()).ok()
    } else {
        None
    }
}

fn array(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or_default()
}

pub fn parse_position(value: &Value) -> Option<Position> {
    let line = u32::try_from(value["line"].as_u64()?).ok()?;
    let character = u32::try_from(value["character"].as_u64()?).ok()?;
    Some(Position::new(line, character))
}

pub fn parse_range(value: &Value) -> Option<Range> {
    Some(Range::new(
        parse_position(&value["start"])?,
        parse_position(&value["end"])?,
    ))
}

fn range_contains(outer: &Range, inner: &Range) -> bool {
    let key = |p: &Position| (p.line, p.character);
    key(&outer.start) <= key(&inner.start) && key(&inner.end) <= key(&outer.end)
}

/// Normalize a document URI: local files are canonicalized when they exist,
/// other URIs only lose their `.` and `..` segments
pub fn normalize_uri(raw: &str) -> Option<Uri> {
    let Ok(url) = Url::parse(raw) else {
        return Uri::from_str(raw).ok();
    };

    let url = if url.scheme() == "file" {
        url.to_file_path()
            .ok()
            .and_then(|path| std::fs::canonicalize(path).ok())
            .and_then(|path| Url::from_file_path(path).ok())
            .unwrap_or(url)
    } else {
        url
    };

    Uri::from_str(url.as_str()).ok()
}

pub fn parse_uri(value: &Value) -> Option<Uri> {
    value.as_str().and_then(normalize_uri)
}

/// Accepts both `Location` and `LocationLink`
pub fn parse_location(value: &Value) -> Option<Location> {
    if let Some(uri) = parse_uri(&value["uri"]) {
        return Some(Location::new(uri, parse_range(&value["range"])?));
    }
    let uri = parse_uri(&value["targetUri"])?;
    let range = parse_range(&value["targetSelectionRange"])
        .or_else(|| parse_range(&value["targetRange"]))?;
    Some(Location::new(uri, range))
}

pub fn parse_markup_content(value: &Value) -> Option<MarkupContent> {
    match value {
        Value::String(text) => Some(MarkupContent {
            kind: MarkupKind::PlainText,
            value: text.clone(),
        }),
        Value::Object(_) => {
            let kind = match value["kind"].as_str() {
                Some("markdown") => MarkupKind::Markdown,
                _ => MarkupKind::PlainText,
            };
            Some(MarkupContent {
                kind,
                value: string_field(value, "value"),
            })
        }
        _ => None,
    }
}

// ============================================================================
// Replies
// ============================================================================

/// Hover contents may be a string, a MarkupContent, a MarkedString or an array
/// of the latter two
fn parse_hover_element(value: &Value) -> Option<MarkupContent> {
    let content = match value.get("language").and_then(Value::as_str) {
        Some(language) => MarkupContent {
            kind: MarkupKind::Markdown,
            value: format!("```{}\n{}\n```", language, string_field(value, "value")),
        },
        None => parse_markup_content(value)?,
    };
    (!content.value.is_empty()).then_some(content)
}

pub fn parse_hover(result: &Value) -> Hover {
    let contents = match &result["contents"] {
        Value::Array(items) => items.iter().filter_map(parse_hover_element).collect(),
        other => parse_hover_element(other).into_iter().collect(),
    };
    Hover {
        contents,
        range: parse_range(&result["range"]),
    }
}

struct SymbolNode {
    symbol: DocumentSymbol,
    children: Vec<usize>,
}

#[derive(Default)]
struct SymbolTree {
    nodes: Vec<SymbolNode>,
    roots: Vec<usize>,
    by_name: HashMap<String, Vec<usize>>,
}

impl SymbolTree {
    /// Container lookup for the flat form: the most recent symbol with that
    /// name, unless an earlier one encloses `range`
    fn container_for(&self, name: &str, range: &Range) -> Option<usize> {
        let candidates = self.by_name.get(name)?;
        candidates
            .iter()
            .rev()
            .copied()
            .find(|&idx| range_contains(&self.nodes[idx].symbol.range, range))
            .or_else(|| candidates.last().copied())
    }

    fn insert(&mut self, entry: &Value, parent: Option<usize>) {
        let range = match entry.get("range") {
            Some(range) => parse_range(range),
            None => parse_range(&entry["location"]["range"]),
        };
        let Some(range) = range else {
            return;
        };

        let parent = parent.or_else(|| {
            entry["containerName"]
                .as_str()
                .filter(|name| !name.is_empty())
                .and_then(|name| self.container_for(name, &range))
        });

        let name = string_field(entry, "name");
        let idx = self.nodes.len();
        self.nodes.push(SymbolNode {
            symbol: DocumentSymbol {
                name: name.clone(),
                detail: string_field(entry, "detail"),
                kind: protocol_enum(&entry["kind"]),
                range,
                children: Vec::new(),
            },
            children: Vec::new(),
        });
        match parent {
            Some(parent) => self.nodes[parent].children.push(idx),
            None => self.roots.push(idx),
        }
        self.by_name.entry(name).or_default().push(idx);

        for child in array(&entry["children"]) {
            self.insert(child, Some(idx));
        }
    }

    fn build(&self, idx: usize) -> DocumentSymbol {
        let node = &self.nodes[idx];
        DocumentSymbol {
            children: node.children.iter().map(|&c| self.build(c)).collect(),
            ..node.symbol.clone()
        }
    }
}

/// Accepts hierarchical `DocumentSymbol[]` and flat `SymbolInformation[]`;
/// the flat form is rebuilt into a tree through `containerName`, assuming
/// containers are listed before their members
pub fn parse_document_symbols(result: &Value) -> Vec<DocumentSymbol> {
    let mut tree = SymbolTree::default();
    for entry in array(result) {
        tree.insert(entry, None);
    }
    tree.roots.iter().map(|&idx| tree.build(idx)).collect()
}

pub fn parse_locations(result: &Value) -> Vec<Location> {
    match result {
        Value::Array(items) => items.iter().filter_map(parse_location).collect(),
        Value::Object(_) => parse_location(result).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn parse_document_highlight(value: &Value) -> Option<DocumentHighlight> {
    Some(DocumentHighlight {
        range: parse_range(&value["range"])?,
        kind: Some(protocol_enum(&value["kind"]).unwrap_or(DocumentHighlightKind::TEXT)),
    })
}

pub fn parse_document_highlights(result: &Value) -> Vec<DocumentHighlight> {
    match result {
        Value::Array(items) => items.iter().filter_map(parse_document_highlight).collect(),
        Value::Object(_) => parse_document_highlight(result).into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Accepts `CompletionItem[]` and `CompletionList`
pub fn parse_completion(result: &Value) -> Vec<CompletionItem> {
    let items = match result {
        Value::Array(items) => items.as_slice(),
        other => array(&other["items"]),
    };

    items
        .iter()
        .map(|item| {
            let label = string_field(item, "label");
            CompletionItem {
                kind: protocol_enum(&item["kind"]),
                detail: string_field(item, "detail"),
                documentation: parse_markup_content(&item["documentation"]),
                sort_text: optional_string(item, "sortText").unwrap_or_else(|| label.clone()),
                insert_text: optional_string(item, "insertText").unwrap_or_else(|| label.clone()),
                label,
            }
        })
        .collect()
}

fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Parameter labels are either `[start, end]` offsets or a substring of the
/// signature label; offsets are UTF-16 code units
fn parse_parameter(label: &str, parameter: &Value) -> ParameterInformation {
    let label_len = utf16_len(label);
    match &parameter["label"] {
        Value::Array(bounds) if bounds.len() == 2 => {
            let offset = |v: &Value| {
                v.as_u64()
                    .and_then(|o| usize::try_from(o).ok())
                    .filter(|&o| o <= label_len)
            };
            ParameterInformation {
                start: offset(&bounds[0]),
                end: offset(&bounds[1]),
            }
        }
        Value::String(sub) if !sub.is_empty() => match label.find(sub.as_str()) {
            Some(byte_offset) => {
                let start = utf16_len(&label[..byte_offset]);
                ParameterInformation {
                    start: Some(start),
                    end: Some(start + utf16_len(sub)),
                }
            }
            None => ParameterInformation {
                start: None,
                end: None,
            },
        },
        _ => ParameterInformation {
            start: None,
            end: None,
        },
    }
}

fn clamp_index(value: &Value, len: usize) -> usize {
    let index = value.as_u64().unwrap_or(0);
    usize::try_from(index)
        .unwrap_or(usize::MAX)
        .min(len.saturating_sub(1))
}

pub fn parse_signature_help(result: &Value) -> SignatureHelp {
    let signatures: Vec<SignatureInformation> = array(&result["signatures"])
        .iter()
        .map(|signature| {
            let label = string_field(signature, "label");
            let parameters = array(&signature["parameters"])
                .iter()
                .map(|p| parse_parameter(&label, p))
                .collect();
            SignatureInformation {
                documentation: parse_markup_content(&signature["documentation"]),
                parameters,
                label,
            }
        })
        .collect();

    let active_signature = clamp_index(&result["activeSignature"], signatures.len());
    let parameter_count = signatures
        .get(active_signature)
        .map_or(0, |s| s.parameters.len());
    let active_parameter = clamp_index(&result["activeParameter"], parameter_count);

    SignatureHelp {
        signatures,
        active_signature,
        active_parameter,
    }
}

pub fn parse_text_edits(result: &Value) -> Vec<TextEdit> {
    array(result)
        .iter()
        .filter_map(|edit| {
            Some(TextEdit::new(
                parse_range(&edit["range"])?,
                string_field(edit, "newText"),
            ))
        })
        .collect()
}

/// Reads `changes` and the text-document entries of `documentChanges`;
/// resource operations (create, rename, delete) are ignored
pub fn parse_workspace_edit(value: &Value) -> WorkspaceEdit {
    let mut changes: HashMap<Uri, Vec<TextEdit>> = HashMap::new();

    if let Some(map) = value["changes"].as_object() {
        for (raw_uri, edits) in map {
            if let Some(uri) = normalize_uri(raw_uri) {
                changes.entry(uri).or_default().extend(parse_text_edits(edits));
            }
        }
    }

    for document_change in array(&value["documentChanges"]) {
        if document_change.get("kind").is_some() {
            continue;
        }
        if let Some(uri) = parse_uri(&document_change["textDocument"]["uri"]) {
            changes
                .entry(uri)
                .or_default()
                .extend(parse_text_edits(&document_change["edits"]));
        }
    }

    WorkspaceEdit { changes }
}

pub fn parse_command(value: &Value) -> Command {
    Command {
        title: string_field(value, "title"),
        command: string_field(value, "command"),
        arguments: array(&value["arguments"]).to_vec(),
    }
}

/// Entries are Commands when `command` is a string, CodeActions otherwise
pub fn parse_code_actions(result: &Value) -> Vec<CodeActionOrCommand> {
    array(result)
        .iter()
        .map(|entry| {
            if entry["command"].is_string() {
                CodeActionOrCommand::Command(parse_command(entry))
            } else {
                CodeActionOrCommand::CodeAction(CodeAction {
                    title: string_field(entry, "title"),
                    kind: optional_string(entry, "kind"),
                    diagnostics: parse_diagnostics(&entry["diagnostics"]),
                    edit: parse_workspace_edit(&entry["edit"]),
                    command: entry["command"].is_object().then(|| parse_command(&entry["command"])),
                })
            }
        })
        .collect()
}

fn diagnostic_code(value: &Value) -> Option<String> {
    match value {
        Value::String(code) => Some(code.clone()),
        Value::Number(code) => Some(code.to_string()),
        _ => None,
    }
}

pub fn parse_diagnostics(value: &Value) -> Vec<Diagnostic> {
    array(value)
        .iter()
        .filter_map(|diagnostic| {
            let related_information = array(&diagnostic["relatedInformation"])
                .iter()
                .filter_map(|related| {
                    Some(DiagnosticRelatedInformation {
                        location: parse_location(&related["location"])?,
                        message: string_field(related, "message"),
                    })
                })
                .collect();

            Some(Diagnostic {
                range: parse_range(&diagnostic["range"])?,
                severity: protocol_enum(&diagnostic["severity"]),
                code: diagnostic_code(&diagnostic["code"]),
                source: optional_string(diagnostic, "source"),
                message: string_field(diagnostic, "message"),
                related_information,
            })
        })
        .collect()
}

// ============================================================================
// Inbound Params
// ============================================================================

pub fn parse_publish_diagnostics(params: &Value) -> Option<PublishDiagnosticsParams> {
    Some(PublishDiagnosticsParams {
        uri: parse_uri(&params["uri"])?,
        diagnostics: parse_diagnostics(&params["diagnostics"]),
    })
}

pub fn parse_apply_edit_params(params: &Value) -> ApplyWorkspaceEditParams {
    ApplyWorkspaceEditParams {
        label: optional_string(params, "label"),
        edit: parse_workspace_edit(&params["edit"]),
    }
}

// ============================================================================
// Reply Decoders
// ============================================================================

impl DecodeReply for Value {
    fn decode_reply(result: &Value) -> Self {
        result.clone()
    }
}

impl DecodeReply for Vec<DocumentSymbol> {
    fn decode_reply(result: &Value) -> Self {
        parse_document_symbols(result)
    }
}

impl DecodeReply for Vec<Location> {
    fn decode_reply(result: &Value) -> Self {
        parse_locations(result)
    }
}

impl DecodeReply for Hover {
    fn decode_reply(result: &Value) -> Self {
        parse_hover(result)
    }
}

impl DecodeReply for Vec<DocumentHighlight> {
    fn decode_reply(result: &Value) -> Self {
        parse_document_highlights(result)
    }
}

impl DecodeReply for Vec<CompletionItem> {
    fn decode_reply(result: &Value) -> Self {
        parse_completion(result)
    }
}

impl DecodeReply for SignatureHelp {
    fn decode_reply(result: &Value) -> Self {
        parse_signature_help(result)
    }
}

impl DecodeReply for Vec<TextEdit> {
    fn decode_reply(result: &Value) -> Self {
        parse_text_edits(result)
    }
}

impl DecodeReply for WorkspaceEdit {
    fn decode_reply(result: &Value) -> Self {
        parse_workspace_edit(result)
    }
}

impl DecodeReply for Vec<CodeActionOrCommand> {
    fn decode_reply(result: &Value) -> Self {
        parse_code_actions(result)
    }
}

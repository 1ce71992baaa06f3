//! `textDocument/semanticHighlighting` payloads
//!
//! Each line carries its tokens as one base64 string. Decoded, the string is a
//! sequence of fixed 8-byte records, all fields big-endian:
//!
//! | bytes | field       |
//! |-------|-------------|
//! | 0..4  | `character` (u32) |
//! | 4..6  | `length` (u16)    |
//! | 6..8  | `scope` (u16)     |

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::lsp::codec::parse_uri;
use crate::lsp::types::Uri;

/// Size of one encoded token record
pub const TOKEN_RECORD_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SemanticHighlightingToken {
    pub character: u32,
    pub length: u16,
    pub scope: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SemanticHighlightingLine {
    pub line: i64,
    pub tokens: Vec<SemanticHighlightingToken>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SemanticHighlightingParams {
    pub uri: Option<Uri>,
    pub version: Option<i32>,
    pub lines: Vec<SemanticHighlightingLine>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenDecodeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decoded size {0} is not a multiple of the 8-byte record size")]
    RecordSize(usize),
}

/// Decode one line's base64 token string
pub fn decode_tokens(encoded: &str) -> Result<Vec<SemanticHighlightingToken>, TokenDecodeError> {
    let raw = STANDARD.decode(encoded)?;
    if raw.len() % TOKEN_RECORD_SIZE != 0 {
        return Err(TokenDecodeError::RecordSize(raw.len()));
    }

    Ok(raw
        .chunks_exact(TOKEN_RECORD_SIZE)
        .map(|record| SemanticHighlightingToken {
            character: u32::from_be_bytes([record[0], record[1], record[2], record[3]]),
            length: u16::from_be_bytes([record[4], record[5]]),
            scope: u16::from_be_bytes([record[6], record[7]]),
        })
        .collect())
}

/// Encode tokens into the wire representation
pub fn encode_tokens(tokens: &[SemanticHighlightingToken]) -> String {
    let mut raw = Vec::with_capacity(tokens.len() * TOKEN_RECORD_SIZE);
    for token in tokens {
        raw.extend_from_slice(&token.character.to_be_bytes());
        raw.extend_from_slice(&token.length.to_be_bytes());
        raw.extend_from_slice(&token.scope.to_be_bytes());
    }
    STANDARD.encode(raw)
}

/// Parse notification params; lines with undecodable tokens are skipped
pub fn parse_semantic_highlighting(params: &Value) -> SemanticHighlightingParams {
    let document = &params["textDocument"];
    let version = document["version"]
        .as_i64()
        .and_then(|v| i32::try_from(v).ok());

    let mut lines = Vec::new();
    for entry in params["lines"].as_array().into_iter().flatten() {
        let line = entry["line"].as_i64().unwrap_or(-1);
        let encoded = entry["tokens"].as_str().unwrap_or_default();
        match decode_tokens(encoded) {
            Ok(tokens) => lines.push(SemanticHighlightingLine { line, tokens }),
            Err(e) => warn!("Skipping semantic highlighting for line {}: {}", line, e),
        }
    }

    SemanticHighlightingParams {
        uri: parse_uri(&document["uri"]),
        version,
        lines,
    }
}

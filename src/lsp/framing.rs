//! LSP message framing layer
//!
//! Handles LSP-specific message framing using Content-Length headers
//! as specified in the Language Server Protocol specification.
//!
//! LSP message framing format:
//! Content-Length: <length>\r\n\r\n<content>
//!
//! The read side never fails: malformed headers, oversized declarations and
//! garbage without any header are discarded and scanning resumes on whatever
//! bytes follow.

use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

/// Header token that starts every frame
const CONTENT_LENGTH: &[u8] = b"Content-Length:";

/// Separator between the header block and the payload
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Buffered bytes without any header token beyond which the buffer is dropped
pub const GARBAGE_LIMIT: usize = 1 << 20;

/// Largest declared payload accepted from a peer
pub const MAX_MESSAGE_SIZE: usize = 1 << 29;

/// Error types for LSP framing
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Content-Length codec producing one JSON object per frame
///
/// Keeps scan offsets across calls so a frame trickling in byte by byte is
/// searched once rather than from the start of the buffer on every read.
#[derive(Debug, Default, Clone)]
pub struct LspFrameCodec {
    /// Buffer prefix known not to start a header token
    token_scan: usize,
    /// Buffer prefix known not to hold the header terminator
    header_scan: usize,
}

impl LspFrameCodec {
    fn rewind(&mut self) {
        self.token_scan = 0;
        self.header_scan = 0;
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

fn parse_length(raw: &[u8]) -> Option<usize> {
    std::str::from_utf8(raw).ok()?.trim().parse::<usize>().ok()
}

impl Decoder for LspFrameCodec {
    type Item = Value;
    type Error = FramingError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Value>, FramingError> {
        loop {
            let Some(token) = find(buf, CONTENT_LENGTH, self.token_scan) else {
                if buf.len() > GARBAGE_LIMIT {
                    warn!(
                        "LspFrameCodec: no header in {} buffered bytes, discarding",
                        buf.len()
                    );
                    buf.clear();
                    self.rewind();
                } else {
                    // a partial token may straddle the end of the buffer
                    self.token_scan = buf.len().saturating_sub(CONTENT_LENGTH.len() - 1);
                }
                return Ok(None);
            };
            self.token_scan = token;

            let value_start = token + CONTENT_LENGTH.len();
            let header_from = self.header_scan.max(value_start);
            let Some(header_end) = find(buf, HEADER_END, header_from) else {
                self.header_scan = buf
                    .len()
                    .saturating_sub(HEADER_END.len() - 1)
                    .max(value_start);
                return Ok(None);
            };

            // the header end is itself a line break, so a line end always exists
            let line_end = find(buf, b"\r\n", value_start).unwrap_or(header_end);
            let Some(length) = parse_length(&buf[value_start..line_end]) else {
                warn!(
                    "LspFrameCodec: invalid Content-Length {:?}, skipping header",
                    String::from_utf8_lossy(&buf[value_start..line_end])
                );
                buf.advance(header_end + HEADER_END.len());
                self.rewind();
                continue;
            };

            if length > MAX_MESSAGE_SIZE {
                warn!(
                    "LspFrameCodec: declared length {} exceeds {}, discarding buffer",
                    length, MAX_MESSAGE_SIZE
                );
                buf.clear();
                self.rewind();
                continue;
            }

            let body_start = header_end + HEADER_END.len();
            if buf.len() < body_start + length {
                self.header_scan = header_end;
                trace!(
                    "LspFrameCodec: incomplete message - need {} more bytes",
                    body_start + length - buf.len()
                );
                return Ok(None);
            }

            buf.advance(body_start);
            let payload = buf.split_to(length);
            self.rewind();

            match serde_json::from_slice::<Value>(&payload) {
                Ok(value) if value.is_object() => {
                    trace!("LspFrameCodec: parsed complete message ({} bytes)", length);
                    return Ok(Some(value));
                }
                Ok(_) => warn!("LspFrameCodec: discarding non-object payload"),
                Err(e) => warn!("LspFrameCodec: discarding invalid JSON payload: {}", e),
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Value>, FramingError> {
        let frame = self.decode(buf)?;
        if frame.is_none() && !buf.is_empty() {
            trace!("LspFrameCodec: {} trailing bytes at end of stream", buf.len());
            buf.clear();
            self.rewind();
        }
        Ok(frame)
    }
}

impl Encoder<&Value> for LspFrameCodec {
    type Error = FramingError;

    fn encode(&mut self, message: &Value, dst: &mut BytesMut) -> Result<(), FramingError> {
        let body = serde_json::to_vec(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        dst.reserve(header.len() + body.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}

/// Frame a single message into a freshly allocated buffer
pub fn encode_frame(message: &Value) -> Result<BytesMut, FramingError> {
    let mut dst = BytesMut::new();
    LspFrameCodec::default().encode(message, &mut dst)?;
    Ok(dst)
}

/// Accumulates raw bytes pushed by a transport and drains complete frames
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: BytesMut,
    codec: LspFrameCodec,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every frame that is now complete, in arrival order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        // decode never fails on the read side; see LspFrameCodec::decode
        while let Ok(Some(frame)) = self.codec.decode(&mut self.buffer) {
            frames.push(frame);
        }
        frames
    }

    /// Number of bytes waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

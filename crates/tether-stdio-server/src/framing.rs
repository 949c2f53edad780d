//! Frame extraction from an arbitrarily chunked byte stream.
//!
//! [`FrameReader`] owns the connection's receive buffer. Each call to
//! [`FrameReader::push`] appends one chunk and returns every complete frame it
//! can now cut, in order, interleaved with any protocol violations. Partial
//! data stays buffered for the next chunk, so the same byte sequence yields
//! the same frames no matter how it was split.
//!
//! In [`FramingMode::Auto`] the discipline is chosen from the first
//! non-whitespace bytes and never changes afterwards:
//!
//! ```text
//! Content-Length:...  -> content-length   (checked first)
//! { or [              -> newline
//! anything else       -> keep buffering
//! ```

use std::ops::Range;

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tracing::debug;

use tether_json_rpc_server::{JsonRpcErrorObject, RequestId, error_codes, recover_request_id};

use crate::config::{DEFAULT_MAX_HEADER_SIZE, DEFAULT_MAX_MESSAGE_SIZE, TransportConfig};
use crate::detect::{Framing, FramingMode};

const CONTENT_LENGTH_TOKEN: &[u8] = b"content-length:";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Output of one extraction step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// Bytes of exactly one encoded JSON value
    Frame(Bytes),
    /// A rejected frame or header; the stream continues
    Violation(FrameError),
    /// A rejected frame whose request id could still be read, so the peer
    /// can be answered
    Rejected { id: RequestId, error: FrameError },
}

/// Protocol violations detected while framing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("header block of {size} bytes exceeds limit of {limit} bytes")]
    HeaderTooLarge { size: usize, limit: usize },

    #[error("message of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("header block has no Content-Length")]
    MissingContentLength,

    #[error("invalid Content-Length value '{0}'")]
    InvalidContentLength(String),
}

impl FrameError {
    /// JSON-RPC code describing the violation, for logs and metrics.
    pub fn code(&self) -> i64 {
        match self {
            FrameError::HeaderTooLarge { .. } | FrameError::MessageTooLarge { .. } => {
                error_codes::MESSAGE_TOO_LARGE
            }
            FrameError::MissingContentLength | FrameError::InvalidContentLength(_) => {
                error_codes::INVALID_REQUEST
            }
        }
    }

    /// Error object sent back for a [`FrameEvent::Rejected`] frame.
    pub fn error_object(&self) -> JsonRpcErrorObject {
        JsonRpcErrorObject {
            code: self.code(),
            message: self.to_string(),
            data: None,
        }
    }
}

/// Per-connection receive state.
#[derive(Debug)]
pub struct FrameReader {
    mode: FramingMode,
    resolved: Option<Framing>,
    buffer: BytesMut,
    max_message_size: usize,
    max_header_size: usize,
    /// Declared body length once a content-length header has been consumed.
    pending_body: Option<usize>,
    /// Dropping the remainder of an oversized newline-framed line.
    discarding_line: bool,
}

impl FrameReader {
    /// Create a reader with the default size limits.
    pub fn new(mode: FramingMode) -> Self {
        Self::with_limits(mode, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_HEADER_SIZE)
    }

    pub fn with_limits(mode: FramingMode, max_message_size: usize, max_header_size: usize) -> Self {
        Self {
            mode,
            resolved: mode.fixed(),
            buffer: BytesMut::with_capacity(8 * 1024),
            max_message_size,
            max_header_size,
            pending_body: None,
            discarding_line: false,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::with_limits(config.framing, config.max_message_size, config.max_header_size)
    }

    /// Configured mode.
    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Active discipline, once known.
    pub fn framing(&self) -> Option<Framing> {
        self.resolved
    }

    /// Bytes held back waiting for more input.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Append a chunk and extract every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<FrameEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        if self.resolved.is_none() {
            self.detect(&mut events);
        }
        match self.resolved {
            Some(Framing::ContentLength) => self.extract_content_length(&mut events),
            Some(Framing::Newline) => self.extract_newline(&mut events),
            None => {}
        }
        events
    }

    /// Stop transition: drop buffered bytes and, in auto mode, forget the
    /// detected discipline.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending_body = None;
        self.discarding_line = false;
        self.resolved = self.mode.fixed();
    }

    fn detect(&mut self, events: &mut Vec<FrameEvent>) {
        let Some(start) = self.buffer.iter().position(|b| !b.is_ascii_whitespace()) else {
            // Whitespace is skipped by both disciplines anyway.
            self.buffer.clear();
            return;
        };
        let pending = &self.buffer[start..];

        // Header prefix strictly before JSON start.
        let decision = if starts_with_ignore_case(pending, CONTENT_LENGTH_TOKEN) {
            Some(Framing::ContentLength)
        } else if pending[0] == b'{' || pending[0] == b'[' {
            Some(Framing::Newline)
        } else if starts_with_ignore_case(CONTENT_LENGTH_TOKEN, pending) {
            // Could still become a header; wait.
            None
        } else if pending.contains(&b'\n') {
            // A complete line that can never be a header.
            Some(Framing::Newline)
        } else {
            None
        };

        match decision {
            Some(framing) => {
                debug!(framing = %framing, "framing detected");
                self.resolved = Some(framing);
            }
            None if self.buffer.len() > self.max_header_size => {
                events.push(FrameEvent::Violation(FrameError::HeaderTooLarge {
                    size: self.buffer.len(),
                    limit: self.max_header_size,
                }));
                self.buffer.clear();
            }
            None => {}
        }
    }

    fn extract_content_length(&mut self, events: &mut Vec<FrameEvent>) {
        loop {
            if let Some(length) = self.pending_body {
                if self.buffer.len() < length {
                    return;
                }
                let body = self.buffer.split_to(length).freeze();
                self.pending_body = None;
                events.push(FrameEvent::Frame(body));
                continue;
            }

            let gap = self
                .buffer
                .iter()
                .take_while(|b| b.is_ascii_whitespace())
                .count();
            self.buffer.advance(gap);
            if self.buffer.is_empty() {
                return;
            }

            let window = self.buffer.len().min(self.max_header_size + HEADER_TERMINATOR.len());
            let Some(header_end) = find(&self.buffer[..window], HEADER_TERMINATOR) else {
                if self.buffer.len() > self.max_header_size {
                    events.push(FrameEvent::Violation(FrameError::HeaderTooLarge {
                        size: self.buffer.len(),
                        limit: self.max_header_size,
                    }));
                    self.buffer.clear();
                }
                return;
            };

            // The window bounds `header_end` by `max_header_size`.
            let parsed = parse_content_length(&self.buffer[..header_end], self.max_message_size);
            // Only the header block is consumed; a rejected body is never read.
            self.buffer.advance(header_end + HEADER_TERMINATOR.len());

            match parsed {
                Ok(length) => self.pending_body = Some(length),
                Err(err) => events.push(FrameEvent::Violation(err)),
            }
        }
    }

    fn extract_newline(&mut self, events: &mut Vec<FrameEvent>) {
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.split_to(newline + 1).freeze();
            if self.discarding_line {
                self.discarding_line = false;
                continue;
            }

            let range = trimmed_range(&line);
            if range.is_empty() {
                continue;
            }
            if range.len() > self.max_message_size {
                let error = FrameError::MessageTooLarge {
                    size: range.len(),
                    limit: self.max_message_size,
                };
                // The whole line is buffered, so a request id is still readable.
                events.push(match recover_request_id(&line[range]) {
                    Some(id) => FrameEvent::Rejected { id, error },
                    None => FrameEvent::Violation(error),
                });
                continue;
            }
            events.push(FrameEvent::Frame(line.slice(range)));
        }

        // The trimmed partial line only grows, so once it is too large the
        // whole line is a lost cause.
        if self.discarding_line {
            self.buffer.clear();
        } else {
            let partial = trimmed_range(&self.buffer).len();
            if partial > self.max_message_size {
                events.push(FrameEvent::Violation(FrameError::MessageTooLarge {
                    size: partial,
                    limit: self.max_message_size,
                }));
                self.buffer.clear();
                self.discarding_line = true;
            }
        }
    }
}

fn parse_content_length(header: &[u8], max_message_size: usize) -> Result<usize, FrameError> {
    let text = String::from_utf8_lossy(header);
    for line in text.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("content-length") {
            continue;
        }

        let value = value.trim();
        let length: usize = match value.parse() {
            Ok(length) if !value.starts_with('+') => length,
            _ => return Err(FrameError::InvalidContentLength(value.to_string())),
        };
        if length > max_message_size {
            return Err(FrameError::MessageTooLarge {
                size: length,
                limit: max_message_size,
            });
        }
        return Ok(length);
    }
    Err(FrameError::MissingContentLength)
}

fn starts_with_ignore_case(haystack: &[u8], prefix: &[u8]) -> bool {
    haystack.len() >= prefix.len() && haystack[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn trimmed_range(bytes: &[u8]) -> Range<usize> {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |last| last + 1);
    start..end
}

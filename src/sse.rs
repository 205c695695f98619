//! Server-Sent Events (SSE) line framing and frame decoding.
//!
//! Upstream format:
//! ```text
//! data: {"key": "value"}
//!
//! data: {"another": "event"}
//!
//! data: [DONE]
//! ```

use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;

use crate::client::ClientError;

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

/// Classification of one trimmed upstream line.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame<T> {
    /// Not a `data: ` line. Blank lines, comments and raw error bodies land here.
    NonEvent,
    /// The `[DONE]` sentinel.
    Done,
    /// A decoded event payload.
    Event(T),
}

/// Classify a trimmed line and decode its payload into `T`.
///
/// A `data: ` line whose payload is not valid JSON for `T` is an error.
///
/// # Example
/// ```
/// use completion_relay::sse::{decode_frame, Frame};
///
/// let frame = decode_frame::<serde_json::Value>("data: {\"id\":\"1\"}").unwrap();
/// assert!(matches!(frame, Frame::Event(_)));
/// assert_eq!(decode_frame::<serde_json::Value>("data: [DONE]").unwrap(), Frame::Done);
/// assert_eq!(decode_frame::<serde_json::Value>(": keep-alive").unwrap(), Frame::NonEvent);
/// ```
pub fn decode_frame<T: DeserializeOwned>(line: &str) -> Result<Frame<T>, ClientError> {
    match parse_sse_line(line) {
        None => Ok(Frame::NonEvent),
        Some(data) if is_done_marker(data) => Ok(Frame::Done),
        Some(data) => Ok(Frame::Event(serde_json::from_str(data)?)),
    }
}

/// Parse an SSE line to extract the data portion.
///
/// SSE lines are in the format: `data: <content>`
///
/// # Example
/// ```
/// use completion_relay::sse::parse_sse_line;
///
/// let line = "data: {\"key\": \"value\"}";
/// assert_eq!(parse_sse_line(line), Some("{\"key\": \"value\"}"));
///
/// let line = "invalid";
/// assert_eq!(parse_sse_line(line), None);
/// ```
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix(DATA_PREFIX).map(|s| s.trim())
}

/// Check if an SSE data line indicates the stream is done.
///
/// # Example
/// ```
/// use completion_relay::sse::is_done_marker;
///
/// assert!(is_done_marker("[DONE]"));
/// assert!(!is_done_marker(""));
/// assert!(!is_done_marker("{\"data\": \"value\"}"));
/// ```
pub fn is_done_marker(data: &str) -> bool {
    data == DONE_MARKER
}

/// Splits an upstream byte stream into `\n`-terminated lines.
///
/// Lines are kept as raw bytes until they are complete, so a multi-byte
/// UTF-8 sequence split across chunks is reassembled. A final line without a
/// trailing newline is returned once the byte stream ends. A pending line
/// longer than `max_line` bytes fails with [`ClientError::LineTooLong`].
pub struct LineReader {
    inner: BoxStream<'static, Result<Bytes, ClientError>>,
    buffer: BytesMut,
    // Bytes of `buffer` already searched for a newline.
    scanned: usize,
    max_line: usize,
    ended: bool,
}

impl LineReader {
    pub fn new(inner: BoxStream<'static, Result<Bytes, ClientError>>, max_line: usize) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            scanned: 0,
            max_line,
            ended: false,
        }
    }

    /// Read the next line, including its terminator if present.
    ///
    /// Returns `Ok(None)` at end of input. On a read error the unterminated
    /// tail stays buffered and can be recovered with
    /// [`take_partial`](Self::take_partial).
    pub async fn next_line(&mut self) -> Result<Option<Bytes>, ClientError> {
        loop {
            if let Some(pos) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
                let end = self.scanned + pos + 1;
                self.scanned = 0;
                return Ok(Some(self.buffer.split_to(end).freeze()));
            }
            self.scanned = self.buffer.len();

            if self.buffer.len() > self.max_line {
                return Err(ClientError::LineTooLong {
                    limit: self.max_line,
                });
            }

            if self.ended {
                return Ok(self.take_partial());
            }

            match self.inner.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e),
                None => self.ended = true,
            }
        }
    }

    /// Take the buffered bytes of an unterminated line, if any.
    pub fn take_partial(&mut self) -> Option<Bytes> {
        self.scanned = 0;
        if self.buffer.is_empty() {
            return None;
        }
        Some(self.buffer.split().freeze())
    }
}

//! Buffer for non-event lines, re-parsed as an API error when a stream fails.

use bytes::BytesMut;

use crate::client::ClientError;
use crate::model::{ApiError, ErrorResponse};

/// Collects the bytes of lines that were not `data: ` frames.
///
/// Upstreams that fail mid-stream often write a plain JSON error body instead
/// of SSE frames. Keeping those lines lets the reader report the structured
/// error instead of a bare transport failure.
#[derive(Debug)]
pub struct ErrorAccumulator {
    buffer: BytesMut,
    limit: usize,
}

impl ErrorAccumulator {
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            limit,
        }
    }

    /// Append a line. Fails once the buffer would exceed its limit; the
    /// buffer is left untouched in that case.
    pub fn write(&mut self, line: &[u8]) -> Result<(), ClientError> {
        if self.buffer.len() + line.len() > self.limit {
            return Err(ClientError::Accumulation { limit: self.limit });
        }
        self.buffer.extend_from_slice(line);
        Ok(())
    }

    /// Parse the buffered bytes as an `{"error": {...}}` envelope.
    pub fn unmarshal_error(&self) -> Option<ApiError> {
        if self.buffer.is_empty() {
            return None;
        }
        serde_json::from_slice::<ErrorResponse>(&self.buffer)
            .ok()
            .and_then(|resp| resp.error)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

//! Pull-based reader over an upstream SSE completion stream.

use std::marker::PhantomData;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::accumulator::ErrorAccumulator;
use crate::client::{ClientError, EventSource};
use crate::model::Streamable;
use crate::options::{EmptyMessagePolicy, StreamOptions};
use crate::sse::{decode_frame, parse_sse_line, Frame, LineReader};

/// Lifecycle of a [`StreamReader`]. `Open -> Finished` is one way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Finished,
}

/// Reads typed events from an upstream SSE body.
///
/// The reader exclusively owns the body. It is released when the stream
/// finishes or when [`close`](Self::close) is called, whichever comes first.
pub struct StreamReader<T> {
    lines: Option<LineReader>,
    status: StatusCode,
    options: StreamOptions,
    accumulator: ErrorAccumulator,
    empty_messages: usize,
    state: StreamState,
    _event: PhantomData<fn() -> T>,
}

impl<T: Streamable> StreamReader<T> {
    /// Wrap a raw byte stream. `status` is the HTTP status the body arrived
    /// with and is attached to errors surfaced from it.
    pub fn new(
        body: BoxStream<'static, Result<Bytes, ClientError>>,
        status: StatusCode,
        options: StreamOptions,
    ) -> Self {
        Self {
            lines: Some(LineReader::new(body, options.max_line_bytes)),
            status,
            accumulator: ErrorAccumulator::new(options.error_buffer_limit),
            options,
            empty_messages: 0,
            state: StreamState::Open,
            _event: PhantomData,
        }
    }

    /// Take ownership of a successful upstream response.
    pub fn from_response(response: reqwest::Response, options: StreamOptions) -> Self {
        let status = response.status();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from))
            .boxed();
        Self::new(body, status, options)
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == StreamState::Finished
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Pull the next event.
    ///
    /// Returns `Ok(None)` on the `[DONE]` sentinel, on a clean end of the
    /// body, and on every call after the stream has finished. Non-event lines
    /// are skipped until the empty-message limit is exceeded.
    pub async fn recv(&mut self) -> Result<Option<T>, ClientError> {
        loop {
            if self.is_finished() {
                return Ok(None);
            }
            let Some(lines) = self.lines.as_mut() else {
                self.state = StreamState::Finished;
                return Ok(None);
            };

            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return self.finish_at_eof(),
                Err(e @ ClientError::LineTooLong { .. }) => {
                    warn!(error = %e, "upstream line too long");
                    self.finish();
                    return Err(e);
                }
                Err(e) => return Err(self.fail_read(e)),
            };

            let text = String::from_utf8_lossy(&line);
            let line = text.trim();

            match decode_frame::<T>(line) {
                Ok(Frame::Event(event)) => {
                    if self.options.empty_message_policy == EmptyMessagePolicy::PerEvent {
                        self.empty_messages = 0;
                    }
                    return Ok(Some(event));
                }
                Ok(Frame::Done) => {
                    debug!("upstream sent [DONE]");
                    self.finish();
                    return Ok(None);
                }
                Ok(Frame::NonEvent) => {
                    if let Err(e) = self.accumulator.write(line.as_bytes()) {
                        self.finish();
                        return Err(e);
                    }
                    self.empty_messages += 1;
                    if self.empty_messages > self.options.empty_messages_limit {
                        warn!(
                            limit = self.options.empty_messages_limit,
                            "too many empty stream messages"
                        );
                        self.finish();
                        return Err(ClientError::TooManyEmptyMessages);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to decode stream frame");
                    self.finish();
                    return Err(e);
                }
            }
        }
    }

    /// Release the upstream body. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.lines.take().is_some() {
            debug!("upstream body released");
        }
        self.state = StreamState::Finished;
    }

    fn finish(&mut self) {
        self.close();
    }

    // End of body without the sentinel. An accumulated error envelope wins
    // over a clean end.
    fn finish_at_eof(&mut self) -> Result<Option<T>, ClientError> {
        self.finish();
        match self.accumulator.unmarshal_error() {
            Some(err) => Err(ClientError::Api(err.with_status(self.status.as_u16()))),
            None => Ok(None),
        }
    }

    // A transport error. The unterminated tail read so far may hold the end
    // of an error body, so it is accumulated before the envelope is parsed.
    fn fail_read(&mut self, err: ClientError) -> ClientError {
        if let Some(partial) = self.lines.as_mut().and_then(LineReader::take_partial) {
            let text = String::from_utf8_lossy(&partial);
            let line = text.trim();
            if parse_sse_line(line).is_none()
                && self.accumulator.write(line.as_bytes()).is_err()
            {
                debug!("partial line dropped, error accumulator full");
            }
        }
        self.finish();
        match self.accumulator.unmarshal_error() {
            Some(api) => ClientError::Api(api.with_status(self.status.as_u16())),
            None => ClientError::Request {
                status: self.status,
                message: err.to_string(),
            },
        }
    }
}

#[async_trait]
impl<T: Streamable> EventSource for StreamReader<T> {
    type Event = T;

    async fn recv(&mut self) -> Result<Option<T>, ClientError> {
        StreamReader::recv(self).await
    }

    fn close(&mut self) {
        StreamReader::close(self)
    }
}

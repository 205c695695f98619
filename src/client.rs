//! Error taxonomy and the pull-based event source seam.

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::model::ApiError;

/// Errors that can occur while opening, reading or relaying a stream.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic request failure when no structured error body was available.
    #[error("error, status code: {}, message: {message}", .status.as_u16())]
    Request { status: StatusCode, message: String },

    /// Structured error envelope returned by the upstream API.
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("stream has sent too many empty messages")]
    TooManyEmptyMessages,

    #[error("error accumulator exceeded {limit} bytes")]
    Accumulation { limit: usize },

    #[error("stream line exceeded {limit} bytes without a newline")]
    LineTooLong { limit: usize },

    #[error("Stream cancelled")]
    StreamCancelled,

    #[error("stream deadline exceeded")]
    DeadlineExceeded,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// True for errors caused by the upstream breaking the SSE framing
    /// contract rather than by transport or API failures.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ClientError::TooManyEmptyMessages
                | ClientError::Parse(_)
                | ClientError::Accumulation { .. }
                | ClientError::LineTooLong { .. }
        )
    }

    /// HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Request { status, .. } => Some(*status),
            ClientError::Api(e) => StatusCode::from_u16(e.http_status_code).ok(),
            ClientError::Http(e) => e.status(),
            _ => None,
        }
    }
}

/// A pull-based source of decoded events.
///
/// `recv` returns `Ok(None)` once the source has finished; calling it again
/// after that keeps returning `Ok(None)`. `close` releases the underlying
/// resource and must be safe to call more than once.
///
/// The relay is generic over this trait, so anything that can hand out events
/// one at a time can be relayed downstream.
#[async_trait]
pub trait EventSource: Send {
    /// Event type produced by this source.
    type Event: Send;

    /// Pull the next event.
    async fn recv(&mut self) -> Result<Option<Self::Event>, ClientError>;

    /// Release the upstream resource.
    fn close(&mut self);
}

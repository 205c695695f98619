//! # completion-relay - streaming completion relay
//!
//! Opens an upstream completion response encoded as Server-Sent Events,
//! decodes its `data: ` frames into typed events and republishes them to a
//! downstream SSE client through a bounded channel.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Generic over the event shape via [`Streamable`]
//! - Tolerates a bounded number of non-event lines
//! - Re-parses error bodies written mid-stream as structured API errors
//! - Backpressure through a bounded channel, cancellation on client disconnect
//!
//! ## Architecture
//!
//! - **`sse`**: line framing and frame classification
//! - **`accumulator`**: buffer of non-event lines for error recovery
//! - **`stream`**: the pull-based [`StreamReader`]
//! - **`relay`**: producer task, channel and downstream frames
//! - **`http`**: sends the pre-authorised upstream request
//!
//! ## Example
//! ```no_run
//! use completion_relay::http::{build_http_client, open_stream, UpstreamRequest};
//! use completion_relay::model::ChatCompletionStreamResponse;
//! use completion_relay::options::{HttpTransport, RelayOptions, StreamOptions, TransportOptions};
//! use completion_relay::relay::Relay;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = TransportOptions::new(
//!         HttpTransport::default().with_base_url("https://api.openai.com".to_string()),
//!     );
//!     let client = build_http_client(&transport)?;
//!
//!     let request = UpstreamRequest::new(
//!         "/v1/chat/completions",
//!         serde_json::json!({"model": "gpt-4o", "stream": true, "messages": []}),
//!     )
//!     .with_authorization("Bearer sk-...");
//!
//!     let reader = open_stream::<ChatCompletionStreamResponse>(
//!         &client,
//!         &transport,
//!         request,
//!         StreamOptions::default(),
//!     )
//!     .await?;
//!
//!     let mut frames = Box::pin(Relay::spawn(reader, RelayOptions::default()).into_frames());
//!     while let Some(frame) = frames.next().await {
//!         print!("{}", frame.encode());
//!     }
//!     Ok(())
//! }
//! ```

pub mod accumulator;
pub mod client;
pub mod http;
pub mod model;
pub mod options;
pub mod relay;
pub mod sse;
pub mod stream;

// Re-exports for convenience
pub use client::{ClientError, EventSource};
pub use model::{ApiError, ChatCompletionStreamResponse, CompletionResponse, Streamable};
pub use relay::{Relay, RelayHandle, SseFrame};
pub use stream::StreamReader;

//! Relay server example: forwards streamed chat completions to SSE clients.
//!
//! Run with:
//! ```bash
//! export UPSTREAM_URL="https://api.openai.com/v1/chat/completions"
//! RUST_LOG=completion_relay=debug cargo run --example relay_server
//! ```
//!
//! Then:
//! ```bash
//! curl -N http://127.0.0.1:8080/v1/chat/completions \
//!   -H "Authorization: Bearer $OPENAI_API_KEY" \
//!   -H "Content-Type: application/json" \
//!   -d '{"model":"gpt-4o","stream":true,"messages":[{"role":"user","content":"Hi"}]}'
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use completion_relay::http::{build_http_client, open_stream, UpstreamRequest};
use completion_relay::model::ChatCompletionStreamResponse;
use completion_relay::options::{HttpTransport, RelayOptions, StreamOptions, TransportOptions};
use completion_relay::{ClientError, Relay};
use tracing_subscriber::EnvFilter;

struct AppState {
    client: reqwest::Client,
    transport: TransportOptions<HttpTransport>,
    upstream_url: String,
}

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let mut request = UpstreamRequest::new(state.upstream_url.clone(), body);
    if let Some(auth) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        request = request.with_authorization(auth);
    }

    let reader = match open_stream::<ChatCompletionStreamResponse>(
        &state.client,
        &state.transport,
        request,
        StreamOptions::default(),
    )
    .await
    {
        Ok(reader) => reader,
        Err(e) => return error_response(e),
    };

    Relay::spawn(reader, RelayOptions::default())
        .into_sse()
        .into_response()
}

fn error_response(err: ClientError) -> Response {
    tracing::warn!(error = %err, "failed to open upstream stream");
    let status = err.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match err {
        ClientError::Api(api) => serde_json::json!({ "error": api }),
        other => serde_json::json!({ "error": { "message": other.to_string() } }),
    };
    (status, Json(body)).into_response()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let upstream_url = std::env::var("UPSTREAM_URL")
        .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    let transport = TransportOptions::new(HttpTransport::default());
    let state = Arc::new(AppState {
        client: build_http_client(&transport)?,
        transport,
        upstream_url,
    });

    let app = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "relay listening");

    axum::serve(listener, app).await?;
    Ok(())
}

//! HTTP plumbing for opening an upstream completion stream.
//!
//! The caller hands over an already-authorised request description; this
//! module sends it, maps non-success responses to errors and wraps a
//! successful body in a [`StreamReader`].

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::client::ClientError;
use crate::model::{ErrorResponse, Streamable};
use crate::options::{HttpTransport, SecretString, StreamOptions, TransportOptions};
use crate::stream::StreamReader;

/// A request prepared by the caller, credentials included.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// Absolute URL, or a path joined onto the transport base URL.
    pub url: String,
    /// JSON request body.
    pub body: serde_json::Value,
    /// Value forwarded verbatim as the `Authorization` header.
    pub authorization: Option<SecretString>,
    /// Ask the upstream for `text/event-stream`.
    pub stream: bool,
}

impl UpstreamRequest {
    pub fn new(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            url: url.into(),
            body,
            authorization: None,
            stream: true,
        }
    }

    pub fn with_authorization(mut self, authorization: impl Into<SecretString>) -> Self {
        self.authorization = Some(authorization.into());
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// Build a configured HTTP client from transport options.
///
/// This applies common configuration like timeouts and proxies.
///
/// # Example
/// ```ignore
/// let client = build_http_client(&transport_options)?;
/// ```
pub fn build_http_client(
    transport_options: &TransportOptions<HttpTransport>,
) -> Result<Client, ClientError> {
    let mut builder = Client::builder();

    if let Some(timeout) = transport_options.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = &transport_options.provider.proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| ClientError::Config(format!("invalid proxy {}: {}", proxy_url, e)))?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Add extra headers to a request if specified in transport options.
pub fn add_extra_headers(
    mut request: RequestBuilder,
    extra_headers: &Option<HashMap<String, String>>,
) -> RequestBuilder {
    if let Some(headers) = extra_headers {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }
    request
}

/// Resolve the request URL against the transport base URL.
pub fn resolve_url(transport: &HttpTransport, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    match &transport.base_url {
        Some(base) => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            url.trim_start_matches('/')
        ),
        None => url.to_string(),
    }
}

/// Send `request` and return a reader over the event stream.
///
/// A non-success status is turned into [`ClientError::Api`] when the body is
/// an error envelope and into [`ClientError::Request`] otherwise.
pub async fn open_stream<T: Streamable>(
    client: &Client,
    transport_options: &TransportOptions<HttpTransport>,
    request: UpstreamRequest,
    options: StreamOptions,
) -> Result<StreamReader<T>, ClientError> {
    let url = resolve_url(&transport_options.provider, &request.url);

    let mut req = client
        .post(&url)
        .header(CONTENT_TYPE, "application/json");
    if let Some(authorization) = &request.authorization {
        req = req.header(AUTHORIZATION, authorization.expose_secret());
    }
    if request.stream {
        req = req.header(ACCEPT, "text/event-stream");
    }
    req = add_extra_headers(req, &transport_options.provider.extra_headers);

    let response = req.json(&request.body).send().await?;
    let status = response.status();

    if !status.is_success() {
        warn!(%status, %url, "upstream rejected stream request");
        return Err(error_from_body(status, response.text().await));
    }

    info!(%status, %url, "upstream stream opened");
    Ok(StreamReader::from_response(response, options))
}

/// Map the result of reading a rejected response's body to an error.
///
/// A body that cannot be read still yields a [`ClientError::Request`] with
/// the upstream status, carrying the read failure as its message.
pub fn error_from_body<E: std::fmt::Display>(
    status: StatusCode,
    body: Result<String, E>,
) -> ClientError {
    match body {
        Ok(body) => handle_error_response(status, &body),
        Err(e) => {
            warn!(%status, error = %e, "failed to read upstream error body");
            ClientError::Request {
                status,
                message: format!("failed to read error body: {}", e),
            }
        }
    }
}

/// Map a non-success upstream response to an error.
pub fn handle_error_response(status: StatusCode, body: &str) -> ClientError {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse { error: Some(err) }) => {
            ClientError::Api(err.with_status(status.as_u16()))
        }
        _ => ClientError::Request {
            status,
            message: if body.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                body.to_string()
            },
        },
    }
}

//! Options for reading, relaying and transporting completion streams.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Default number of non-event lines tolerated before a stream is declared broken.
pub const DEFAULT_EMPTY_MESSAGES_LIMIT: usize = 10;

/// Default ceiling for bytes buffered by the error accumulator.
pub const DEFAULT_ERROR_BUFFER_LIMIT: usize = 64 * 1024;

/// Default ceiling for one unterminated upstream line.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Default capacity of the relay channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// A secret string type for sensitive data like API keys.
/// Prevents accidental logging or display of secrets.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    /// Create a new secret string.
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Get the underlying secret value.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

/// How the empty-message counter behaves across successfully decoded events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmptyMessagePolicy {
    /// The counter restarts after every decoded event, so the limit bounds
    /// consecutive non-event lines.
    #[default]
    PerEvent,
    /// One budget for the whole stream.
    Cumulative,
}

/// Options applied by a [`StreamReader`](crate::stream::StreamReader).
///
/// # Example
/// ```rust
/// use completion_relay::options::{EmptyMessagePolicy, StreamOptions};
///
/// let options = StreamOptions::default()
///     .with_empty_messages_limit(20)
///     .with_empty_message_policy(EmptyMessagePolicy::Cumulative);
/// assert_eq!(options.empty_messages_limit, 20);
/// ```
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Non-event lines tolerated before failing with too many empty messages.
    pub empty_messages_limit: usize,

    /// Maximum bytes the error accumulator may buffer.
    pub error_buffer_limit: usize,

    /// Maximum bytes buffered while waiting for a line terminator.
    pub max_line_bytes: usize,

    pub empty_message_policy: EmptyMessagePolicy,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            empty_messages_limit: DEFAULT_EMPTY_MESSAGES_LIMIT,
            error_buffer_limit: DEFAULT_ERROR_BUFFER_LIMIT,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            empty_message_policy: EmptyMessagePolicy::default(),
        }
    }
}

impl StreamOptions {
    /// Set the empty-message limit.
    pub fn with_empty_messages_limit(mut self, limit: usize) -> Self {
        self.empty_messages_limit = limit;
        self
    }

    /// Set the error accumulator ceiling.
    pub fn with_error_buffer_limit(mut self, limit: usize) -> Self {
        self.error_buffer_limit = limit;
        self
    }

    /// Set the maximum length of a pending line.
    pub fn with_max_line_bytes(mut self, limit: usize) -> Self {
        self.max_line_bytes = limit;
        self
    }

    /// Set the empty-message counter policy.
    pub fn with_empty_message_policy(mut self, policy: EmptyMessagePolicy) -> Self {
        self.empty_message_policy = policy;
        self
    }
}

/// Options applied by a [`Relay`](crate::relay::Relay).
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Capacity of the bounded channel between producer and emitter.
    pub channel_capacity: usize,

    /// Wall-clock deadline for the whole stream.
    pub deadline: Option<Instant>,

    /// Treat an event without choices as the end of the stream.
    pub finish_on_empty_choices: bool,

    /// Emit an `error` frame with the failure message before the final `stop`.
    pub report_errors: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            deadline: None,
            finish_on_empty_choices: false,
            report_errors: false,
        }
    }
}

impl RelayOptions {
    /// Set the channel capacity. Zero is raised to one.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Set an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_finish_on_empty_choices(mut self, enabled: bool) -> Self {
        self.finish_on_empty_choices = enabled;
        self
    }

    pub fn with_report_errors(mut self, enabled: bool) -> Self {
        self.report_errors = enabled;
        self
    }
}

/// Generic transport options containing truly generic transport fields
/// and provider-specific transport configuration.
///
/// # Example
/// ```rust
/// use completion_relay::options::{TransportOptions, HttpTransport};
/// use std::time::Duration;
///
/// let options = TransportOptions {
///     timeout: Some(Duration::from_secs(30)),
///     provider: HttpTransport {
///         base_url: Some("https://api.openai.com".to_string()),
///         proxy: None,
///         extra_headers: None,
///     },
/// };
/// ```
#[derive(Debug, Clone)]
pub struct TransportOptions<T> {
    /// Request timeout (applies to all transports)
    pub timeout: Option<Duration>,

    /// Provider-specific transport options
    pub provider: T,
}

/// HTTP-specific transport options.
/// Used as the provider field in `TransportOptions<HttpTransport>`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    /// Base URL that relative request paths are joined onto
    pub base_url: Option<String>,

    /// HTTP proxy URL
    pub proxy: Option<String>,

    /// Additional HTTP headers to include in requests
    pub extra_headers: Option<HashMap<String, String>>,
}

impl HttpTransport {
    /// Set the base URL.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Set the proxy URL.
    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Add a single extra header.
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.extra_headers
            .get_or_insert_with(HashMap::new)
            .insert(key, value);
        self
    }
}

impl<T> TransportOptions<T> {
    /// Create new transport options with provider-specific configuration.
    pub fn new(provider: T) -> Self {
        Self {
            timeout: None,
            provider,
        }
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

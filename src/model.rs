//! Wire models for streamed completion events and upstream error envelopes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capability of being decoded from one SSE frame and re-serialised for the
/// downstream client.
pub trait Streamable: DeserializeOwned + Serialize + Send + 'static {
    /// Whether the event carries at least one choice.
    ///
    /// Some upstreams signal the end of a stream with an event that has no
    /// choices instead of the `[DONE]` sentinel.
    fn has_choices(&self) -> bool {
        true
    }
}

/// One incremental chat completion event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionStreamResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChatCompletionStreamChoice>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionStreamChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: ChatCompletionStreamChoiceDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionStreamChoiceDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Streamable for ChatCompletionStreamResponse {
    fn has_choices(&self) -> bool {
        !self.choices.is_empty()
    }
}

/// Legacy text completion event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompletionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompletionChoice {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<LogprobResult>,
}

/// Log probabilities of the sampled tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LogprobResult {
    #[serde(default)]
    pub tokens: Vec<String>,
    #[serde(default)]
    pub token_logprobs: Vec<f32>,
    #[serde(default)]
    pub top_logprobs: Vec<std::collections::HashMap<String, f32>>,
    #[serde(default)]
    pub text_offset: Vec<u32>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Streamable for CompletionResponse {
    fn has_choices(&self) -> bool {
        !self.choices.is_empty()
    }
}

/// Envelope wrapping an upstream API error: `{"error": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: Option<ApiError>,
}

/// Error information returned by the upstream API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// HTTP status of the upstream response; `0` when unknown.
    #[serde(skip)]
    pub http_status_code: u16,
}

impl ApiError {
    /// Attach the HTTP status the error arrived with.
    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status_code = status;
        self
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.http_status_code > 0 {
            write!(
                f,
                "error, status code: {}, message: {}",
                self.http_status_code, self.message
            )
        } else {
            f.write_str(&self.message)
        }
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_delta_deserialize() {
        let json = concat!(
            r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","created":1700000000,"#,
            r#""model":"gpt-4o","choices":[{"index":0,"#,
            r#""delta":{"role":"assistant","content":"Hi"},"finish_reason":null}]}"#
        );
        let event: ChatCompletionStreamResponse = serde_json::from_str(json).unwrap();
        assert_eq!(event.id, "chatcmpl-1");
        assert_eq!(event.choices.len(), 1);
        assert_eq!(event.choices[0].delta.content.as_deref(), Some("Hi"));
        assert_eq!(event.choices[0].delta.role.as_deref(), Some("assistant"));
        assert!(event.choices[0].finish_reason.is_none());
        assert!(event.has_choices());
    }

    #[test]
    fn test_chat_delta_missing_fields() {
        let event: ChatCompletionStreamResponse = serde_json::from_str(r#"{"id":"1"}"#).unwrap();
        assert_eq!(event.id, "1");
        assert!(!event.has_choices());
    }

    #[test]
    fn test_completion_deserialize() {
        let json = concat!(
            r#"{"id":"cmpl-1","object":"text_completion","created":1,"model":"davinci","#,
            r#""choices":[{"text":"foo","index":0,"finish_reason":"stop","logprobs":null}],"#,
            r#""usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#
        );
        let event: CompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(event.choices[0].text, "foo");
        assert_eq!(event.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(event.usage.map(|u| u.total_tokens), Some(4));
    }

    #[test]
    fn test_error_envelope() {
        let json = concat!(
            r#"{"error":{"code":"rate_limit","message":"slow down","#,
            r#""param":null,"type":"requests"}}"#
        );
        let resp: ErrorResponse = serde_json::from_str(json).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.message, "slow down");
        assert_eq!(err.error_type, "requests");
        assert_eq!(err.code, Some(Value::String("rate_limit".into())));
        assert_eq!(err.to_string(), "slow down");
        assert_eq!(
            err.with_status(429).to_string(),
            "error, status code: 429, message: slow down"
        );
    }

    #[test]
    fn test_error_envelope_numeric_code() {
        let json = r#"{"error":{"code":42,"message":"m","type":"t"}}"#;
        let resp: ErrorResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.error.unwrap().code, Some(Value::from(42)));
    }
}

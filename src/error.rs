//! Error types for the SDK.
//!
//! `Error` carries the structured classification fields (`retryable`,
//! `retry_after_ms`, `http_status`, `provider_error_code`) directly on each
//! provider-facing variant, so the engine's retry loop can query them instead
//! of pattern-matching on message text.

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Structured detail shared by every provider-facing error variant.
#[derive(Debug, Clone, Default)]
pub struct ErrorDetail {
    pub message: String,
    pub http_status: Option<u16>,
    pub provider_error_code: Option<String>,
    pub retry_after_ms: Option<u64>,
    /// Raw, unredacted error body as returned by the provider, kept for logging.
    pub raw_error: Option<String>,
}

impl ErrorDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_error_code = Some(code.into());
        self
    }

    pub fn with_retry_after_ms(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw_error = Some(raw.into());
        self
    }
}

/// Main error type for the SDK.
///
/// The provider-facing variants (`RateLimit` through `Unknown`) mirror the
/// error-kind taxonomy every adapter classifies backend failures into:
/// status code, and where available an exception/error-type name, decide the
/// variant; the variant alone then decides retryability.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP transport failure (connection refused, DNS, TLS, etc.)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// 429 / provider-reported rate limiting. Retryable.
    #[error("rate limited: {}", .0.message)]
    RateLimit(ErrorDetail),

    /// Prompt or response exceeded the model's context window. Not retryable.
    #[error("context length exceeded: {}", .0.message)]
    ContextLength(ErrorDetail),

    /// 400-class request the backend rejected as malformed. Not retryable.
    #[error("invalid request: {}", .0.message)]
    InvalidRequest(ErrorDetail),

    /// 401/403, bad or missing credentials. Not retryable.
    #[error("authentication failed: {}", .0.message)]
    Auth(ErrorDetail),

    /// 5xx backend failure. Retryable.
    #[error("server error: {}", .0.message)]
    Server(ErrorDetail),

    /// Transport-level failure classified as retryable at the adapter level
    /// (distinct from `Http`, which is the raw `reqwest` error before
    /// classification).
    #[error("network error: {}", .0.message)]
    Network(ErrorDetail),

    /// Request or stream exceeded its deadline. Retryable.
    #[error("request timed out: {}", .0.message)]
    Timeout(ErrorDetail),

    /// Caller-initiated cancellation. Not retryable.
    #[error("aborted: {}", .0.message)]
    Abort(ErrorDetail),

    /// Content policy / moderation refusal. Not retryable.
    #[error("safety refusal: {}", .0.message)]
    Safety(ErrorDetail),

    /// Feature not supported by the selected adapter/model. Not retryable.
    #[error("unsupported: {}", .0.message)]
    Unsupported(ErrorDetail),

    /// Could not classify the backend failure into any of the above.
    #[error("unknown error: {}", .0.message)]
    Unknown(ErrorDetail),

    /// Streaming error (parser/engine-local, not a provider classification)
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Tool execution error
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Legacy-shaped constructor kept for call sites that only have a
    /// message string and no further classification (e.g. a malformed
    /// response body). Classifies as `Unknown`.
    pub fn api(msg: impl Into<String>) -> Self {
        Error::Unknown(ErrorDetail::new(msg))
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    pub fn timeout() -> Self {
        Error::Timeout(ErrorDetail::new("request timeout"))
    }

    /// Classify an HTTP status code plus a raw error body into an `Error`.
    /// Used by every provider adapter so status-to-kind mapping lives in one
    /// place rather than being re-derived per adapter.
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let detail = ErrorDetail::new(body.clone())
            .with_status(status)
            .with_raw(body);
        match status {
            429 => Error::RateLimit(detail),
            401 | 403 => Error::Auth(detail),
            400 => Error::InvalidRequest(detail),
            500..=599 => Error::Server(detail),
            _ => Error::Unknown(detail),
        }
    }

    /// Whether the engine's retry loop should consume an attempt and retry.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimit(_) | Error::Server(_) | Error::Network(_) | Error::Timeout(_)
        )
    }

    /// Provider-suggested backoff, if any (e.g. from a `Retry-After` header).
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Error::RateLimit(d)
            | Error::ContextLength(d)
            | Error::InvalidRequest(d)
            | Error::Auth(d)
            | Error::Server(d)
            | Error::Network(d)
            | Error::Timeout(d)
            | Error::Abort(d)
            | Error::Safety(d)
            | Error::Unsupported(d)
            | Error::Unknown(d) => d.retry_after_ms,
            _ => None,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::RateLimit(d)
            | Error::ContextLength(d)
            | Error::InvalidRequest(d)
            | Error::Auth(d)
            | Error::Server(d)
            | Error::Network(d)
            | Error::Timeout(d)
            | Error::Abort(d)
            | Error::Safety(d)
            | Error::Unsupported(d)
            | Error::Unknown(d) => d.http_status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_config() {
        let err = Error::config("Invalid model");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "Invalid configuration: Invalid model");
    }

    #[test]
    fn test_error_stream() {
        let err = Error::stream("Connection lost");
        assert!(matches!(err, Error::Stream(_)));
        assert_eq!(err.to_string(), "Streaming error: Connection lost");
    }

    #[test]
    fn test_error_tool() {
        let err = Error::tool("Tool not found");
        assert!(matches!(err, Error::Tool(_)));
        assert_eq!(err.to_string(), "Tool execution error: Tool not found");
    }

    #[test]
    fn test_error_invalid_input() {
        let err = Error::invalid_input("Missing parameter");
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(err.to_string(), "Invalid input: Missing parameter");
    }

    #[test]
    fn test_error_timeout() {
        let err = Error::timeout();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(err.retryable());
    }

    #[test]
    fn test_error_other() {
        let err = Error::other("Something went wrong");
        assert!(matches!(err, Error::Other(_)));
        assert_eq!(err.to_string(), "Error: Something went wrong");
    }

    #[test]
    fn test_from_http_status_classification() {
        assert!(matches!(
            Error::from_http_status(429, "slow down"),
            Error::RateLimit(_)
        ));
        assert!(matches!(
            Error::from_http_status(401, "bad key"),
            Error::Auth(_)
        ));
        assert!(matches!(
            Error::from_http_status(503, "overloaded"),
            Error::Server(_)
        ));
        assert!(matches!(
            Error::from_http_status(400, "bad request"),
            Error::InvalidRequest(_)
        ));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::from_http_status(429, "x").retryable());
        assert!(Error::from_http_status(500, "x").retryable());
        assert!(!Error::from_http_status(401, "x").retryable());
        assert!(!Error::from_http_status(400, "x").retryable());
    }

    #[test]
    fn test_retry_after_ms_roundtrip() {
        let detail = ErrorDetail::new("slow down").with_retry_after_ms(2500);
        let err = Error::RateLimit(detail);
        assert_eq!(err.retry_after_ms(), Some(2500));
    }

    #[test]
    fn test_error_from_reqwest() {
        fn _test_conversion(_e: reqwest::Error) -> Error {
            Error::Http(_e)
        }
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn _returns_result() -> Result<i32> {
            Ok(42)
        }

        fn _returns_error() -> Result<i32> {
            Err(Error::timeout())
        }
    }
}

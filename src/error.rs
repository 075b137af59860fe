//! Error taxonomy for the chat proxy core.
//!
//! Every variant maps to one row of the error-handling design: a pre-stream
//! HTTP status for failures before the SSE response opens, or an in-band
//! `error` [`crate::event::StreamEvent`] for failures after it. See
//! [`Error::http_status`] and [`Error::is_retryable`].

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the proxy, from request validation through to
/// upstream transport failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Request body failed to parse or did not match the expected schema.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// UIMessage list failed conversion-phase validation (§4.1).
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Credentials missing or invalid.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// Network error, 5xx, or 429 from the upstream LLM. Retryable.
    #[error("upstream transient error: {0}")]
    UpstreamTransient(String),

    /// Non-retryable 4xx (excluding 429) from the upstream LLM.
    #[error("upstream error: {0}")]
    UpstreamFatal(String),

    /// A tool handler returned an error or an invalid payload.
    #[error("tool execution failed: {0}")]
    ToolFailure(String),

    /// Upstream tool-call arguments could not be parsed as JSON.
    #[error("failed to parse tool arguments: {0}")]
    ParseFailure(String),

    /// Wall-clock deadline exceeded.
    #[error("request timed out")]
    Timeout,

    /// Configuration failed to load or failed validation. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error not already classified above.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport-level error from the HTTP client, not already classified.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Error::InvalidRequest(msg.into())
    }

    pub fn invalid_message(msg: impl Into<String>) -> Self {
        Error::InvalidMessage(msg.into())
    }

    pub fn auth_failure(msg: impl Into<String>) -> Self {
        Error::AuthFailure(msg.into())
    }

    pub fn upstream_transient(msg: impl Into<String>) -> Self {
        Error::UpstreamTransient(msg.into())
    }

    pub fn upstream_fatal(msg: impl Into<String>) -> Self {
        Error::UpstreamFatal(msg.into())
    }

    pub fn tool_failure(msg: impl Into<String>) -> Self {
        Error::ToolFailure(msg.into())
    }

    pub fn parse_failure(msg: impl Into<String>) -> Self {
        Error::ParseFailure(msg.into())
    }

    pub fn timeout() -> Self {
        Error::Timeout
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// HTTP status to use if this error occurs before the SSE response opens.
    /// Callers after the first byte never consult this — see §7 propagation policy.
    pub fn http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::InvalidRequest(_) | Error::InvalidMessage(_) | Error::Json(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Error::AuthFailure(_) => StatusCode::UNAUTHORIZED,
            Error::UpstreamTransient(_) | Error::Http(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::UpstreamFatal(_) => StatusCode::BAD_GATEWAY,
            Error::ToolFailure(_) | Error::ParseFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code for the `{ detail, code }` body (§7).
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) | Error::Json(_) => "invalid_request",
            Error::InvalidMessage(_) => "invalid_message",
            Error::AuthFailure(_) => "auth_failure",
            Error::UpstreamTransient(_) | Error::Http(_) => "upstream_transient",
            Error::UpstreamFatal(_) => "upstream_fatal",
            Error::ToolFailure(_) => "tool_failure",
            Error::ParseFailure(_) => "parse_failure",
            Error::Timeout => "timeout",
            Error::Config(_) => "config_error",
        }
    }

    /// Whether the initial upstream connection attempt should be retried (§4.8).
    /// Only meaningful before any bytes have been streamed back to the client.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::UpstreamTransient(_) | Error::Http(_) | Error::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_request_maps_to_422() {
        let err = Error::invalid_request("bad json");
        assert_eq!(err.http_status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn auth_failure_maps_to_401() {
        let err = Error::auth_failure("missing key");
        assert_eq!(err.http_status(), axum::http::StatusCode::UNAUTHORIZED);
        assert_eq!(err.code(), "auth_failure");
    }

    #[test]
    fn upstream_transient_is_retryable() {
        assert!(Error::upstream_transient("503").is_retryable());
        assert!(Error::timeout().is_retryable());
        assert!(!Error::upstream_fatal("404").is_retryable());
        assert!(!Error::invalid_message("bad part").is_retryable());
    }

    #[test]
    fn display_messages_are_concise() {
        assert_eq!(
            Error::tool_failure("boom").to_string(),
            "tool execution failed: boom"
        );
        assert_eq!(Error::timeout().to_string(), "request timed out");
    }
}

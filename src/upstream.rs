//! Upstream HTTP client (C16): builds OpenAI-compatible chat completion
//! requests and parses both the streaming and non-streaming response shapes.
//!
//! Streaming responses are framed with [`eventsource_stream`], the same crate
//! the teacher depends on for SSE parsing, rather than hand-splitting lines —
//! it correctly reassembles a `data:` field split across TCP reads.

use crate::convert::LLMMessage;
use crate::error::Error;
use crate::openai::{
    OpenAICompletion, OpenAIFunction, OpenAIMessage, OpenAIRequest, OpenAIToolCall,
};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Result;
use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;

/// Shared upstream client: one `reqwest::Client` reused across all requests
/// (connection pooling), plus the base URL and bearer key for the configured
/// backend (§4.11's `upstream` config section).
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryConfig,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, connect_timeout: Duration) -> Result<Self> {
        Self::with_retry(base_url, api_key, connect_timeout, RetryConfig::default())
    }

    /// Same as [`Self::new`], with an explicit retry policy for the initial
    /// upstream connection (§4.8) instead of the default 3-attempt backoff.
    pub fn with_retry(
        base_url: impl Into<String>,
        api_key: Option<String>,
        connect_timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(Error::Http)?;
        Ok(Self { http, base_url: base_url.into(), api_key, retry })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_builder(&self, body: &OpenAIRequest) -> reqwest::RequestBuilder {
        let mut builder = self.http.post(self.endpoint()).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    /// Opens a streaming chat completion, retrying the initial connection per
    /// §4.8's backoff policy on a transient failure. Once the connection
    /// succeeds and a stream is handed back, no further retry applies — a
    /// mid-stream failure is no longer retryable (see [`crate::sse`]).
    pub(crate) async fn stream_chat_completion(
        &self,
        request: &OpenAIRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<OpenAIChunkOwned>> + Send>>> {
        retry_with_backoff(self.retry.clone(), || self.try_stream_chat_completion(request)).await
    }

    async fn try_stream_chat_completion(
        &self,
        request: &OpenAIRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<OpenAIChunkOwned>> + Send>>> {
        let response = self.request_builder(request).send().await.map_err(classify_transport_error)?;

        if !response.status().is_success() {
            return Err(classify_status_error(response.status()).await_msg(response).await);
        }

        Ok(parse_sse_stream(response))
    }

    /// Non-streaming chat completion, used by the title generator (§4.7).
    /// Retried the same way as the streaming path (§4.8) since the failure
    /// being classified here is still the initial connection attempt.
    pub(crate) async fn chat_completion(&self, request: &OpenAIRequest) -> Result<OpenAICompletion> {
        retry_with_backoff(self.retry.clone(), || self.try_chat_completion(request)).await
    }

    async fn try_chat_completion(&self, request: &OpenAIRequest) -> Result<OpenAICompletion> {
        let response = self.request_builder(request).send().await.map_err(classify_transport_error)?;

        if !response.status().is_success() {
            return Err(classify_status_error(response.status()).await_msg(response).await);
        }

        response.json::<OpenAICompletion>().await.map_err(Error::Http)
    }

    /// Lightweight reachability check for `/health/ready` (§4.13): a bare
    /// request against `base_url` with a short, caller-supplied timeout — no
    /// chat-completion payload, no retry policy. Any response at all (even a
    /// 404) counts as "reachable"; only a transport-level failure or timeout
    /// is treated as unreachable.
    pub(crate) async fn check_reachable(&self, timeout: Duration) -> Result<()> {
        self.http
            .get(&self.base_url)
            .timeout(timeout)
            .send()
            .await
            .map(|_| ())
            .map_err(classify_transport_error)
    }
}

/// Re-exported alias so call sites don't need to import `crate::openai` just
/// to name the stream item type.
pub(crate) type OpenAIChunkOwned = crate::openai::OpenAIChunk;

fn classify_transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::timeout()
    } else if err.is_connect() {
        Error::upstream_transient(format!("connection failed: {err}"))
    } else {
        Error::Http(err)
    }
}

/// Builds the classification half of a status error; the message is filled
/// in by `.await_msg`, which needs to consume the response body.
struct StatusErrorBuilder {
    retryable: bool,
    status: reqwest::StatusCode,
}

impl StatusErrorBuilder {
    async fn await_msg(self, response: reqwest::Response) -> Error {
        let status = self.status;
        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            format!("upstream returned {status}")
        } else {
            format!("upstream returned {status}: {body}")
        };
        if self.retryable {
            Error::upstream_transient(message)
        } else {
            Error::upstream_fatal(message)
        }
    }
}

/// 429 and 5xx are transient; all other 4xx are fatal (§7).
fn classify_status_error(status: reqwest::StatusCode) -> StatusErrorBuilder {
    let retryable = status.as_u16() == 429 || status.is_server_error();
    StatusErrorBuilder { retryable, status }
}

/// Parses a raw HTTP response body as an SSE stream of [`OpenAIChunk`]s.
/// The `data: [DONE]` sentinel ends the stream without emitting an item;
/// any other non-JSON or transport-level framing error is reported as a
/// [`Error::ParseFailure`] or [`Error::Http`] item respectively.
fn parse_sse_stream(
    body: reqwest::Response,
) -> Pin<Box<dyn Stream<Item = Result<OpenAIChunkOwned>> + Send>> {
    let stream = body.bytes_stream().eventsource().filter_map(move |event| async move {
        let event = match event {
            Ok(e) => e,
            Err(e) => return Some(Err(Error::upstream_transient(format!("SSE framing error: {e}")))),
        };

        if event.data.trim() == "[DONE]" {
            return None;
        }

        match serde_json::from_str::<OpenAIChunkOwned>(&event.data) {
            Ok(chunk) => Some(Ok(chunk)),
            Err(e) => Some(Err(Error::parse_failure(format!("failed to parse upstream chunk: {e}")))),
        }
    });

    Box::pin(stream)
}

/// Builds the request body from the flat message list, model, and tool set.
/// `stream` is `false` for the title-generation sibling (§4.7) and for any
/// agent whose descriptor has `streaming: false` (§4.3).
pub(crate) fn build_request(
    model: impl Into<String>,
    messages: &[LLMMessage],
    tools: Option<Vec<serde_json::Value>>,
    stream: bool,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
) -> OpenAIRequest {
    OpenAIRequest {
        model: model.into(),
        messages: messages.iter().map(to_openai_message).collect(),
        stream,
        max_tokens,
        temperature,
        tools,
    }
}

fn to_openai_message(message: &LLMMessage) -> OpenAIMessage {
    match message {
        LLMMessage::System { text } => OpenAIMessage {
            role: "system".into(),
            content: Some(text.clone()),
            tool_calls: None,
            tool_call_id: None,
        },
        LLMMessage::User { text } => OpenAIMessage {
            role: "user".into(),
            content: Some(text.clone()),
            tool_calls: None,
            tool_call_id: None,
        },
        LLMMessage::Assistant { text, tool_calls } => OpenAIMessage {
            role: "assistant".into(),
            content: text.clone(),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(
                    tool_calls
                        .iter()
                        .map(|call| OpenAIToolCall {
                            id: call.id.clone(),
                            call_type: "function".into(),
                            function: OpenAIFunction {
                                name: call.name.clone(),
                                arguments: call.args.to_string(),
                            },
                        })
                        .collect(),
                )
            },
            tool_call_id: None,
        },
        LLMMessage::Tool { id, result, .. } => OpenAIMessage {
            role: "tool".into(),
            content: Some(result.to_string()),
            tool_calls: None,
            tool_call_id: Some(id.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ToolCallRef;

    #[test]
    fn builds_system_and_user_messages() {
        let messages = vec![
            LLMMessage::System { text: "be terse".into() },
            LLMMessage::User { text: "hi".into() },
        ];
        let request = build_request("gpt-4o-mini", &messages, None, true, None, None);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].role, "user");
        assert!(request.stream);
    }

    #[test]
    fn assistant_tool_call_args_are_json_stringified() {
        let messages = vec![LLMMessage::Assistant {
            text: None,
            tool_calls: vec![ToolCallRef {
                id: "c1".into(),
                name: "generateChart".into(),
                args: serde_json::json!({"x": 1}),
            }],
        }];
        let request = build_request("m", &messages, None, true, None, None);
        let calls = request.messages[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, r#"{"x":1}"#);
    }

    #[test]
    fn tool_message_carries_tool_call_id() {
        let messages = vec![LLMMessage::Tool {
            id: "c1".into(),
            name: "generateChart".into(),
            result: serde_json::json!({"ok": true}),
        }];
        let request = build_request("m", &messages, None, true, None, None);
        assert_eq!(request.messages[0].role, "tool");
        assert_eq!(request.messages[0].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn status_classification_marks_429_and_5xx_retryable() {
        assert!(classify_status_error(reqwest::StatusCode::TOO_MANY_REQUESTS).retryable);
        assert!(classify_status_error(reqwest::StatusCode::BAD_GATEWAY).retryable);
        assert!(!classify_status_error(reqwest::StatusCode::NOT_FOUND).retryable);
        assert!(!classify_status_error(reqwest::StatusCode::UNAUTHORIZED).retryable);
    }

    /// A connection refused on every attempt must exhaust the configured
    /// retry budget before surfacing, per §4.8's "applied only at the
    /// initial upstream connection" rule.
    #[tokio::test]
    async fn refused_connection_is_retried_up_to_max_attempts() {
        // Bind then drop a listener to reserve a port nothing is listening on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let retry = RetryConfig::new()
            .with_max_attempts(2)
            .with_initial_delay(Duration::from_millis(1));
        let client = UpstreamClient::with_retry(
            format!("http://127.0.0.1:{port}/v1"),
            None,
            Duration::from_millis(200),
            retry,
        )
        .unwrap();

        let request = build_request("m", &[LLMMessage::User { text: "hi".into() }], None, true, None, None);
        let result = client.stream_chat_completion(&request).await;
        assert!(result.is_err());
    }
}

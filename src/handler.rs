//! Chat handler (C9): the request state machine described in §4.6 —
//! parse → validate → resolve agent dispatch → convert → open SSE → stream →
//! close. Every failure from this point has an explicit place in the
//! taxonomy: before the SSE response is built, it's an HTTP status; after,
//! it's the stream's terminal `error` event.

use crate::agent::{open_first_connection, run_chat_turn, AgentRun, FirstConnection};
use crate::convert::convert_messages;
use crate::error::Error;
use crate::event::StreamEvent;
use crate::message::{validate_conversation, UIMessage};
use crate::sse::sse_response;
use crate::state::AppState;
use crate::tools::{Tool, ToolRegistry};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, Stream};
use serde::Deserialize;
use std::pin::Pin;
use std::task::{Context, Poll};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<UIMessage>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Client-requested tool subset. Ignored when `agent` names a registered
    /// agent — a named agent's tool set always wins (§4.2).
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default, rename = "maxTokens")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

pub async fn chat(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return error_response(Error::invalid_request(format!("invalid request body: {e}"))),
    };

    if let Err(err) = validate_conversation(&request.messages) {
        return error_response(err);
    }

    let request_id = request_id_from(&headers);
    let timeout = state.config.upstream.request_timeout();

    let resolution = match resolve(&state, &request) {
        Ok(r) => r,
        Err(unknown_agent_message) => {
            let events = stream::iter(vec![StreamEvent::error(unknown_agent_message)]);
            return sse_response(&request_id, timeout, events);
        }
    };

    let llm_messages = match convert_messages(&request.messages) {
        Ok(mut messages) => {
            if let Some(prompt) = resolution.system_prompt {
                messages.insert(0, crate::convert::LLMMessage::System { text: prompt });
            }
            messages
        }
        Err(err) => return error_response(err),
    };

    let run = AgentRun {
        model: resolution.model,
        messages: llm_messages,
        tools: resolution.tools,
        max_tokens: resolution.max_tokens,
        temperature: resolution.temperature,
        streaming: resolution.streaming,
    };

    // §4.8/§7: the initial upstream connection (with its retry loop) is
    // awaited here, before any byte of the response is committed. Retries
    // exhausting at this point is a pre-stream HTTP status, not an in-band
    // `error` — only once this succeeds does a later failure become part of
    // the SSE stream.
    let first = match open_first_connection(&state.upstream, &run).await {
        Ok(first) => first,
        Err(err) => return error_response(err),
    };

    sse_response(&request_id, timeout, run_stream(state, run, first))
}

fn error_response(err: Error) -> Response {
    let status = err.http_status();
    let body = Json(serde_json::json!({ "detail": err.to_string(), "code": err.code() }));
    (status, body).into_response()
}

fn request_id_from(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

struct Resolution {
    system_prompt: Option<String>,
    model: String,
    tools: ToolRegistry,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    streaming: bool,
}

/// Resolves the effective model/prompt/tools for a request. `Err` carries the
/// in-band error message to emit when a named agent doesn't exist — a
/// dispatch miss is reported inside the stream, not as a pre-stream 404,
/// since agent names are conversational input, not a resource path.
fn resolve(state: &AppState, request: &ChatRequest) -> Result<Resolution, String> {
    if let Some(name) = &request.agent {
        let descriptor = state.agents.get(name).ok_or_else(|| {
            format!("unknown agent '{name}'; available: [{}]", state.agents.names().join(", "))
        })?;

        let tools = subset_tools(state, &descriptor.tool_names);
        return Ok(Resolution {
            system_prompt: Some(descriptor.system_prompt.clone()),
            model: descriptor.model.clone().unwrap_or_else(|| state.config.upstream.default_model.clone()),
            tools,
            max_tokens: descriptor.max_tokens,
            temperature: descriptor.temperature,
            streaming: descriptor.streaming,
        });
    }

    // §4.2: tools are opt-in per request. Omitting `tools` disables them
    // entirely (no tool declarations sent upstream) rather than defaulting
    // to the full registry.
    let tools = match &request.tools {
        Some(names) => subset_tools(state, names),
        None => ToolRegistry::new(Vec::new()),
    };

    Ok(Resolution {
        system_prompt: None,
        model: request.model.clone().unwrap_or_else(|| state.config.upstream.default_model.clone()),
        tools,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        streaming: true,
    })
}

fn subset_tools(state: &AppState, names: &[String]) -> ToolRegistry {
    let selected: Vec<Tool> = names.iter().filter_map(|name| state.tools.get(name).cloned()).collect();
    ToolRegistry::new(selected)
}

/// Bridges the agent's callback-style emission to a `Stream<Item =
/// StreamEvent>` by running the turn on a background task and forwarding
/// events over a channel — the SSE framer consumes the receiver end directly.
///
/// The turn runs on its own task so the upstream read loop and the SSE write
/// loop can each make progress independently. Two of §5's three cancellation
/// sources are handled right here: [`RunStream`]'s `Drop` aborts the task the
/// instant the framer drops this stream (client disconnect or timeout,
/// closing the in-flight upstream connection within the same scheduler
/// quantum); `state.shutdown` is raced against the turn itself so a process
/// shutdown still in progress ends every open stream with a terminal `error`
/// instead of being silently aborted mid-write.
fn run_stream(
    state: AppState,
    run: AgentRun,
    first: FirstConnection,
) -> impl Stream<Item = StreamEvent> + Send + 'static {
    let (tx, rx) = tokio::sync::mpsc::channel::<StreamEvent>(32);
    let shutdown = state.shutdown.clone();

    let handle = tokio::spawn(async move {
        let send_tx = tx.clone();
        let turn = run_chat_turn(&state.upstream, run, first, move |event| {
            let tx = send_tx.clone();
            async move {
                let _ = tx.send(event).await;
            }
        });

        tokio::select! {
            result = turn => {
                if let Err(err) = result {
                    let _ = tx.send(StreamEvent::error(err.to_string())).await;
                } else {
                    let _ = tx.send(StreamEvent::finish()).await;
                }
            }
            _ = shutdown.cancelled() => {
                let _ = tx.send(StreamEvent::error("server is shutting down")).await;
            }
        }
    });

    RunStream { rx, handle }
}

struct RunStream {
    rx: tokio::sync::mpsc::Receiver<StreamEvent>,
    handle: tokio::task::JoinHandle<()>,
}

impl Stream for RunStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for RunStream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, AuthConfig, HealthConfig, LoggingConfig, ServerConfig, TitleConfig, UpstreamConfig};
    use crate::message::{MessagePart, Role};
    use crate::registry::{default_agents, AgentRegistry};
    use crate::tools::default_tools;
    use crate::upstream::UpstreamClient;

    fn test_state() -> AppState {
        let config = AppConfig {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            upstream: UpstreamConfig::default(),
            logging: LoggingConfig::default(),
            title: TitleConfig::default(),
            health: HealthConfig::default(),
        };
        let upstream =
            UpstreamClient::new(config.upstream.base_url.clone(), None, config.upstream.connect_timeout()).unwrap();
        AppState::new(config, upstream, AgentRegistry::new(default_agents()), ToolRegistry::new(default_tools()))
    }

    fn user_message(text: &str) -> ChatRequest {
        ChatRequest {
            messages: vec![UIMessage::new("m1", Role::User, vec![MessagePart::Text { text: text.into() }])],
            agent: None,
            model: None,
            tools: None,
            max_tokens: None,
            temperature: None,
        }
    }

    #[test]
    fn resolve_disables_tools_entirely_when_none_requested() {
        let state = test_state();
        let request = user_message("hi");
        let resolution = resolve(&state, &request).unwrap();
        assert!(resolution.system_prompt.is_none());
        assert!(resolution.tools.names().is_empty());
        assert!(resolution.streaming);
    }

    #[test]
    fn resolve_applies_named_agent_overrides() {
        let state = test_state();
        let mut request = user_message("hi");
        request.agent = Some("code_review".into());
        let resolution = resolve(&state, &request).unwrap();
        assert!(resolution.system_prompt.is_some());
        assert_eq!(resolution.tools.names(), vec!["generateCode"]);
        assert!(!resolution.streaming);
    }

    #[test]
    fn resolve_reports_unknown_agent_as_dispatch_miss() {
        let state = test_state();
        let mut request = user_message("hi");
        request.agent = Some("does_not_exist".into());
        let err = resolve(&state, &request).unwrap_err();
        assert!(err.contains("unknown agent"));
        assert!(err.contains("[main, research, code_review]"));
    }

    #[test]
    fn resolve_restricts_to_client_requested_tool_subset() {
        let state = test_state();
        let mut request = user_message("hi");
        request.tools = Some(vec!["generateForm".into()]);
        let resolution = resolve(&state, &request).unwrap();
        assert_eq!(resolution.tools.names(), vec!["generateForm"]);
    }
}

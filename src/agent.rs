//! Chat agent (C5): drives the upstream conversation to completion, turning
//! streamed OpenAI chunks into [`StreamEvent`]s and executing tool calls
//! in between upstream turns.
//!
//! Text deltas are forwarded to the caller as they arrive; tool call deltas
//! are buffered per-index (mirroring the teacher's `ToolCallAggregator` in
//! `utils.rs`) and only dispatched once a `finish_reason` closes out the
//! turn, since a tool can't be invoked on a half-received argument string.
//!
//! An agent may also run in non-streaming mode (§4.3): the full completion
//! is fetched in one shot and replayed as a single text-delta followed by
//! any tool events, so the caller's event taxonomy is identical either way.

use crate::convert::{LLMMessage, ToolCallRef};
use crate::error::Error;
use crate::event::StreamEvent;
use crate::openai::{OpenAIChunk, OpenAICompletion};
use crate::tools::ToolRegistry;
use crate::upstream::{build_request, OpenAIChunkOwned, UpstreamClient};
use crate::Result;
use futures::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;

/// Safety bound on the number of upstream round-trips a single chat request
/// may take while the model keeps calling tools. Prevents a runaway
/// tool-call loop from holding a connection open indefinitely.
const MAX_TOOL_ITERATIONS: u32 = 8;

/// Parameters resolved by the caller (handler + agent registry) before
/// running a turn: which model to target, which tools are available, and
/// the conversation so far.
pub struct AgentRun {
    pub model: String,
    pub messages: Vec<LLMMessage>,
    pub tools: ToolRegistry,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// When `false`, the turn is fetched as a single non-streaming
    /// completion and replayed as one text-delta (§4.3).
    pub streaming: bool,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// The two upstream-agnostic facts a single turn produces, regardless of
/// whether it was fetched by streaming deltas or one non-streaming reply:
/// the assistant's text (if any) and the tool calls it asked to make.
struct TurnOutcome {
    text: Option<String>,
    call_refs: Vec<ToolCallRef>,
}

/// The opening leg of a turn, connected up front so its §4.8 retry loop can
/// run (and, on exhaustion, surface as a pre-stream HTTP status) before the
/// caller commits to a 200 SSE response. See `handler::chat`.
pub(crate) enum FirstConnection {
    Streaming(Pin<Box<dyn Stream<Item = Result<OpenAIChunkOwned>> + Send>>),
    NonStreaming(OpenAICompletion),
}

/// Opens the first upstream connection for `run`, retrying per §4.8. Must be
/// awaited by the caller before any bytes of the response are committed —
/// once it resolves successfully, every further failure in the turn is an
/// in-band `error` event, not an HTTP status.
///
/// `pub(crate)`, not `pub`, for the same reason as `UpstreamClient`'s own
/// connection methods: [`FirstConnection`] carries the deliberately-private
/// `openai`/`OpenAIChunkOwned` types, so it can't be named from outside the crate.
pub(crate) async fn open_first_connection(client: &UpstreamClient, run: &AgentRun) -> Result<FirstConnection> {
    let tool_defs = if run.tools.names().is_empty() { None } else { Some(run.tools.to_openai_format()) };
    let request = build_request(&run.model, &run.messages, tool_defs, run.streaming, run.max_tokens, run.temperature);

    if run.streaming {
        Ok(FirstConnection::Streaming(client.stream_chat_completion(&request).await?))
    } else {
        Ok(FirstConnection::NonStreaming(client.chat_completion(&request).await?))
    }
}

/// Runs a chat turn to completion, invoking `emit` for every [`StreamEvent`]
/// produced along the way. `first` is the already-opened initial connection
/// from [`open_first_connection`]; every later upstream round-trip (after a
/// tool call) opens its own connection the usual way. Returns once a
/// `finish_reason` with no further tool calls is reached, the iteration
/// bound is hit, or an error occurs.
///
/// `emit` is async so the caller can write directly to the SSE body without
/// buffering the whole event list in memory. `pub(crate)` for the same
/// reason as [`open_first_connection`] — it takes a [`FirstConnection`] by value.
pub(crate) async fn run_chat_turn<F, Fut>(
    client: &UpstreamClient,
    mut run: AgentRun,
    first: FirstConnection,
    mut emit: F,
) -> Result<()>
where
    F: FnMut(StreamEvent) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut first = Some(first);

    for _ in 0..MAX_TOOL_ITERATIONS {
        let outcome = match first.take() {
            Some(FirstConnection::Streaming(stream)) => consume_stream(stream, &mut emit).await?,
            Some(FirstConnection::NonStreaming(completion)) => consume_completion(completion, &mut emit).await?,
            None if run.streaming => run_streaming_turn(client, &run, &mut emit).await?,
            None => run_non_streaming_turn(client, &run, &mut emit).await?,
        };

        if outcome.call_refs.is_empty() {
            run.messages.push(LLMMessage::Assistant { text: outcome.text, tool_calls: vec![] });
            return Ok(());
        }

        run.messages.push(LLMMessage::Assistant {
            text: outcome.text,
            tool_calls: outcome.call_refs.clone(),
        });

        for call in &outcome.call_refs {
            emit(StreamEvent::tool_call(call.id.clone(), call.name.clone(), call.args.clone())).await;

            let result = match run.tools.get(&call.name) {
                Some(tool) => tool.execute(call.args.clone()).await,
                None => Err(Error::tool_failure(format!("unknown tool '{}'", call.name))),
            };

            // §4.3: a tool-handler failure (or an unknown-tool dispatch) ends
            // the turn immediately — it is never smuggled into a
            // `tool-result` payload for the model to see. The caller (see
            // `handler::run_stream`) turns this `Err` into the stream's one
            // terminal `error` event.
            let result = match result {
                Ok(value) => value,
                Err(err) => return Err(err),
            };

            emit(StreamEvent::tool_result(call.id.clone(), result.clone())).await;
            run.messages.push(LLMMessage::Tool { id: call.id.clone(), name: call.name.clone(), result });
        }
    }

    Err(Error::tool_failure("exceeded maximum tool-call iterations for a single turn"))
}

/// Streams one upstream turn, forwarding text deltas as they arrive and
/// buffering tool-call deltas per-index until `finish_reason` closes the
/// turn out.
async fn run_streaming_turn<F, Fut>(
    client: &UpstreamClient,
    run: &AgentRun,
    emit: &mut F,
) -> Result<TurnOutcome>
where
    F: FnMut(StreamEvent) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let tool_defs = if run.tools.names().is_empty() { None } else { Some(run.tools.to_openai_format()) };

    let request = build_request(&run.model, &run.messages, tool_defs, true, run.max_tokens, run.temperature);

    let stream = client.stream_chat_completion(&request).await?;

    consume_stream(stream, emit).await
}

/// Reads an already-opened streaming response to completion, projecting each
/// chunk into [`StreamEvent`]s as it arrives.
async fn consume_stream<F, Fut>(
    mut stream: Pin<Box<dyn Stream<Item = Result<OpenAIChunkOwned>> + Send>>,
    emit: &mut F,
) -> Result<TurnOutcome>
where
    F: FnMut(StreamEvent) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut text_buffer = String::new();
    let mut tool_calls: HashMap<u32, PartialToolCall> = HashMap::new();
    let mut finished = false;

    while let Some(item) = stream.next().await {
        let chunk: OpenAIChunk = item?;
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    text_buffer.push_str(&content);
                    emit(StreamEvent::text_delta(content)).await;
                }
            }

            if let Some(deltas) = choice.delta.tool_calls {
                for delta in deltas {
                    let entry = tool_calls.entry(delta.index).or_default();
                    if let Some(id) = delta.id {
                        entry.id = Some(id);
                    }
                    if let Some(function) = delta.function {
                        if let Some(name) = function.name {
                            entry.name = Some(name);
                        }
                        if let Some(args) = function.arguments {
                            entry.arguments.push_str(&args);
                        }
                    }
                }
            }

            if choice.finish_reason.is_some() {
                finished = true;
            }
        }
    }

    if !finished {
        return Err(Error::upstream_fatal("stream ended without a finish_reason"));
    }

    let call_refs = resolve_partial_tool_calls(tool_calls)?;

    Ok(TurnOutcome { text: none_if_empty(text_buffer), call_refs })
}

/// Fetches one upstream turn as a single non-streaming completion and
/// replays it as a single text-delta followed by the resolved tool calls
/// (§4.3) — the model never sees a difference in how its turn was served,
/// only the caller's event cadence changes.
async fn run_non_streaming_turn<F, Fut>(
    client: &UpstreamClient,
    run: &AgentRun,
    emit: &mut F,
) -> Result<TurnOutcome>
where
    F: FnMut(StreamEvent) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let tool_defs = if run.tools.names().is_empty() { None } else { Some(run.tools.to_openai_format()) };

    let request = build_request(&run.model, &run.messages, tool_defs, false, run.max_tokens, run.temperature);

    let completion = client.chat_completion(&request).await?;
    consume_completion(completion, emit).await
}

/// Projects an already-fetched non-streaming completion into a [`TurnOutcome`],
/// replaying its content as a single text-delta (§4.3).
async fn consume_completion<F, Fut>(completion: OpenAICompletion, emit: &mut F) -> Result<TurnOutcome>
where
    F: FnMut(StreamEvent) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let message = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::upstream_fatal("non-streaming completion carried no choices"))?
        .message;

    if let Some(text) = message.content.as_ref().filter(|t| !t.is_empty()) {
        emit(StreamEvent::text_delta(text.clone())).await;
    }

    let mut call_refs = Vec::new();
    for call in message.tool_calls.into_iter().flatten() {
        let args: serde_json::Value = if call.function.arguments.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&call.function.arguments)
                .map_err(|e| Error::parse_failure(format!("invalid tool arguments: {e}")))?
        };
        call_refs.push(ToolCallRef { id: call.id, name: call.function.name, args });
    }

    Ok(TurnOutcome { text: none_if_empty(message.content.unwrap_or_default()), call_refs })
}

fn none_if_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Assembles buffered per-index deltas into ordered [`ToolCallRef`]s, so a
/// deterministic caller sees a stable ordering (§ Open Questions #2). Any
/// index that never received both an id and a name is dropped as
/// incomplete rather than dispatched.
fn resolve_partial_tool_calls(mut tool_calls: HashMap<u32, PartialToolCall>) -> Result<Vec<ToolCallRef>> {
    let mut indices: Vec<u32> = tool_calls.keys().copied().collect();
    indices.sort_unstable();

    let mut call_refs = Vec::with_capacity(indices.len());
    for index in &indices {
        let partial = tool_calls.remove(index).expect("index came from this map");
        let (Some(id), Some(name)) = (partial.id, partial.name) else {
            continue;
        };
        let args: serde_json::Value = if partial.arguments.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&partial.arguments)
                .map_err(|e| Error::parse_failure(format!("invalid tool arguments: {e}")))?
        };
        call_refs.push(ToolCallRef { id, name, args });
    }

    Ok(call_refs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{default_tools, ToolRegistry};

    #[test]
    fn agent_run_carries_resolved_parameters() {
        let run = AgentRun {
            model: "gpt-4o-mini".into(),
            messages: vec![LLMMessage::User { text: "hi".into() }],
            tools: ToolRegistry::new(default_tools()),
            max_tokens: Some(512),
            temperature: Some(0.7),
            streaming: true,
        };
        assert_eq!(run.model, "gpt-4o-mini");
        assert_eq!(run.messages.len(), 1);
        assert!(run.streaming);
    }

    /// A model asking for a tool that isn't registered must end the turn
    /// with a terminal error — never a fabricated `tool-result` — and the
    /// loop must not take another iteration. Drives `run_chat_turn` against
    /// a real (if minimal) upstream connection rather than asserting on an
    /// `Error` value built by hand.
    #[tokio::test]
    async fn unknown_tool_dispatch_terminates_the_turn_with_an_error_event() {
        use crate::retry::RetryConfig;
        use crate::upstream::UpstreamClient;
        use std::time::Duration;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;

            let chunk = serde_json::json!({
                "id": "1", "object": "chat.completion.chunk", "created": 0, "model": "m",
                "choices": [{
                    "index": 0,
                    "delta": {"tool_calls": [{
                        "index": 0,
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "doesNotExist", "arguments": "{}"}
                    }]},
                    "finish_reason": "tool_calls"
                }]
            });
            let body = format!("data: {chunk}\n\ndata: [DONE]\n\n");
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });

        let client = UpstreamClient::with_retry(
            format!("http://127.0.0.1:{port}/v1"),
            None,
            Duration::from_millis(500),
            RetryConfig::new().with_max_attempts(1),
        )
        .unwrap();

        let run = AgentRun {
            model: "m".into(),
            messages: vec![LLMMessage::User { text: "hi".into() }],
            tools: ToolRegistry::new(default_tools()),
            max_tokens: None,
            temperature: None,
            streaming: true,
        };

        let first = open_first_connection(&client, &run).await.unwrap();

        let events = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let collected = events.clone();
        let result = run_chat_turn(&client, run, first, move |event| {
            let collected = collected.clone();
            async move {
                collected.lock().unwrap().push(event);
            }
        })
        .await;

        assert!(result.is_err());
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1, "expected only the tool-call event, got {events:?}");
        assert!(matches!(events[0], StreamEvent::ToolCall { .. }));
    }

    #[test]
    fn resolves_tool_calls_in_index_order() {
        let mut calls = HashMap::new();
        calls.insert(
            1,
            PartialToolCall { id: Some("b".into()), name: Some("generateCard".into()), arguments: "{}".into() },
        );
        calls.insert(
            0,
            PartialToolCall { id: Some("a".into()), name: Some("generateForm".into()), arguments: "{}".into() },
        );

        let resolved = resolve_partial_tool_calls(calls).unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].id, "a");
        assert_eq!(resolved[1].id, "b");
    }

    #[test]
    fn incomplete_partial_tool_calls_are_dropped() {
        let mut calls = HashMap::new();
        calls.insert(0, PartialToolCall { id: None, name: Some("generateForm".into()), arguments: String::new() });

        let resolved = resolve_partial_tool_calls(calls).unwrap();
        assert!(resolved.is_empty());
    }
}

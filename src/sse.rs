//! SSE framer (C7): turns a [`StreamEvent`] producer into an HTTP response
//! body, enforcing the wire format and the terminal-event guarantee — every
//! stream this crate emits ends in exactly one `finish` or `error` event,
//! regardless of how the producer itself exits (§4.5).

use crate::event::StreamEvent;
use axum::body::{Body, Bytes};
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderValue, Response, StatusCode};
use futures::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio::time::Instant;

const REQUEST_ID_HEADER: &str = "x-request-id";

struct FramerState<S> {
    inner: Pin<Box<S>>,
    deadline: Instant,
    done: bool,
}

/// Wraps a raw event stream so it never runs past `timeout` and always ends
/// with a terminal frame, synthesizing one if the producer didn't supply it.
fn framed<S>(events: S, timeout: Duration) -> impl Stream<Item = Bytes> + Send + 'static
where
    S: Stream<Item = StreamEvent> + Send + 'static,
{
    let state = FramerState { inner: Box::pin(events), deadline: Instant::now() + timeout, done: false };

    stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }

        tokio::select! {
            biased;
            item = state.inner.next() => {
                match item {
                    Some(event) => {
                        if event.is_terminal() {
                            state.done = true;
                        }
                        let frame = Bytes::from(event.to_sse_frame());
                        Some((frame, state))
                    }
                    None => {
                        state.done = true;
                        let frame = Bytes::from(
                            StreamEvent::error("stream ended without a terminal event").to_sse_frame(),
                        );
                        Some((frame, state))
                    }
                }
            }
            _ = tokio::time::sleep_until(state.deadline) => {
                state.done = true;
                let frame = Bytes::from(StreamEvent::error("request timed out").to_sse_frame());
                Some((frame, state))
            }
        }
    })
}

/// Builds the full SSE HTTP response: headers per §4.5, plus the framed,
/// timeout-bounded, terminal-guaranteed body.
pub fn sse_response<S>(request_id: &str, timeout: Duration, events: S) -> Response<Body>
where
    S: Stream<Item = StreamEvent> + Send + 'static,
{
    let body = Body::from_stream(framed(events, timeout).map(Ok::<_, std::convert::Infallible>));

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .header(CONNECTION, "keep-alive")
        .body(body)
        .expect("static headers and a streaming body always build a valid response");

    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{iter, StreamExt};

    async fn collect_frames(s: impl Stream<Item = Bytes>) -> Vec<String> {
        s.map(|b| String::from_utf8(b.to_vec()).unwrap()).collect().await
    }

    #[tokio::test]
    async fn passes_through_a_well_formed_stream_unchanged() {
        let events = iter(vec![StreamEvent::text_delta("hi"), StreamEvent::finish()]);
        let frames = collect_frames(framed(events, Duration::from_secs(5))).await;
        assert_eq!(frames.len(), 2);
        assert!(frames[1].contains("\"type\":\"finish\""));
    }

    #[tokio::test]
    async fn synthesizes_error_when_producer_ends_without_terminal_event() {
        let events = iter(vec![StreamEvent::text_delta("hi")]);
        let frames = collect_frames(framed(events, Duration::from_secs(5))).await;
        assert_eq!(frames.len(), 2);
        assert!(frames[1].contains("stream ended without a terminal event"));
    }

    #[tokio::test]
    async fn stops_after_first_terminal_event_even_if_more_follow() {
        let events = iter(vec![StreamEvent::finish(), StreamEvent::text_delta("should not appear")]);
        let frames = collect_frames(framed(events, Duration::from_secs(5))).await;
        assert_eq!(frames.len(), 1);
    }

    #[tokio::test]
    async fn emits_timeout_error_when_deadline_elapses_first() {
        let events = stream::pending::<StreamEvent>();
        let frames = collect_frames(framed(events, Duration::from_millis(10))).await;
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("request timed out"));
    }
}

//! Output event taxonomy (C1).
//!
//! A closed tagged union wire-serialized as `{"type": "...", ...}`. Every
//! stream contains exactly one of [`StreamEvent::Finish`] or
//! [`StreamEvent::Error`] as its terminal event — see [`crate::sse`] for the
//! guarantee that enforces this regardless of how the producer exits.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "text-delta")]
    TextDelta {
        #[serde(rename = "textDelta")]
        text_delta: String,
    },

    #[serde(rename = "tool-call")]
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        args: serde_json::Value,
    },

    #[serde(rename = "tool-result")]
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        result: serde_json::Value,
    },

    #[serde(rename = "finish")]
    Finish {},

    #[serde(rename = "error")]
    Error { error: String },
}

impl StreamEvent {
    pub fn text_delta(text: impl Into<String>) -> Self {
        StreamEvent::TextDelta { text_delta: text.into() }
    }

    pub fn tool_call(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        StreamEvent::ToolCall {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, result: serde_json::Value) -> Self {
        StreamEvent::ToolResult { tool_call_id: tool_call_id.into(), result }
    }

    pub fn finish() -> Self {
        StreamEvent::Finish {}
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error { error: message.into() }
    }

    /// Whether this event is one of the two terminal variants.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Finish {} | StreamEvent::Error { .. })
    }

    /// Serializes this event as a single SSE `data:` frame, including the
    /// trailing blank line. See §4.5.
    pub fn to_sse_frame(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","error":"failed to serialize event"}"#.to_string()
        });
        format!("data: {json}\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_delta_wire_format() {
        let event = StreamEvent::text_delta("He");
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"text-delta","textDelta":"He"}"#);
    }

    #[test]
    fn tool_call_wire_format() {
        let event = StreamEvent::tool_call("call_1", "generateForm", serde_json::json!({"a": 1}));
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"type":"tool-call","toolCallId":"call_1","toolName":"generateForm","args":{"a":1}}"#
        );
    }

    #[test]
    fn finish_has_no_fields() {
        let json = serde_json::to_string(&StreamEvent::finish()).unwrap();
        assert_eq!(json, r#"{"type":"finish"}"#);
    }

    #[test]
    fn terminal_classification() {
        assert!(StreamEvent::finish().is_terminal());
        assert!(StreamEvent::error("x").is_terminal());
        assert!(!StreamEvent::text_delta("x").is_terminal());
        assert!(!StreamEvent::tool_result("id", serde_json::json!({})).is_terminal());
    }

    #[test]
    fn sse_frame_has_trailing_blank_line() {
        let frame = StreamEvent::finish().to_sse_frame();
        assert_eq!(frame, "data: {\"type\":\"finish\"}\n\n");
    }

    #[test]
    fn round_trip_is_byte_identical() {
        let events = vec![
            StreamEvent::text_delta("hi"),
            StreamEvent::tool_call("c1", "generateChart", serde_json::json!({"x":1})),
            StreamEvent::tool_result("c1", serde_json::json!({"x":1})),
            StreamEvent::finish(),
            StreamEvent::error("oops"),
        ];
        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let parsed: StreamEvent = serde_json::from_str(&json).unwrap();
            let re_serialized = serde_json::to_string(&parsed).unwrap();
            assert_eq!(json, re_serialized);
        }
    }
}

//! Message converter (C4): UIMessages → flat ordered LLMMessages, per §4.1.

use crate::error::Error;
use crate::message::{MessagePart, Role, UIMessage};
use serde_json::Value;

/// A single tool call emitted by an assistant entry, prior to upstream dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRef {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// Flat, ordered message model consumed by the upstream LLM client (§3).
#[derive(Debug, Clone, PartialEq)]
pub enum LLMMessage {
    System { text: String },
    User { text: String },
    Assistant { text: Option<String>, tool_calls: Vec<ToolCallRef> },
    Tool { id: String, name: String, result: Value },
}

/// Converts a validated UIMessage list into the flat LLMMessage list the
/// upstream client sends. Callers must run
/// [`crate::message::validate_conversation`] first — this function still
/// re-checks the invariants that are cheaper to enforce locally per message
/// (empty parts, unknown part types) so it can be used standalone in tests.
pub fn convert_messages(messages: &[UIMessage]) -> Result<Vec<LLMMessage>, Error> {
    let mut out = Vec::with_capacity(messages.len());

    for message in messages {
        if message.parts.is_empty() {
            return Err(Error::invalid_message(format!(
                "message '{}' has no parts",
                message.id
            )));
        }

        match message.role {
            Role::System => out.push(LLMMessage::System { text: concat_text_only(message)? }),
            Role::User => convert_user_message(message, &mut out)?,
            Role::Assistant => convert_assistant_message(message, &mut out)?,
        }
    }

    Ok(out)
}

/// `system`/`user` messages may only contain `text` parts (§4.1 step 2).
fn concat_text_only(message: &UIMessage) -> Result<String, Error> {
    let mut text = String::new();
    for part in &message.parts {
        match part {
            MessagePart::Text { text: t } => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(t);
            }
            MessagePart::ToolInvocation { .. } => {
                return Err(Error::invalid_message(format!(
                    "non-text part in '{}' message '{}'",
                    role_label(message.role),
                    message.id
                )));
            }
        }
    }
    Ok(text)
}

/// A `tool-invocation` in a `user` message is the client handing back a tool
/// result from the UI (§4.1 step 4); it becomes a `tool` entry directly, and
/// any interleaved text becomes its own `user` entry preserving order.
fn convert_user_message(message: &UIMessage, out: &mut Vec<LLMMessage>) -> Result<(), Error> {
    let mut text_buf = String::new();

    let flush_text = |buf: &mut String, out: &mut Vec<LLMMessage>| {
        if !buf.is_empty() {
            out.push(LLMMessage::User { text: std::mem::take(buf) });
        }
    };

    for part in &message.parts {
        match part {
            MessagePart::Text { text } => {
                if !text_buf.is_empty() {
                    text_buf.push('\n');
                }
                text_buf.push_str(text);
            }
            MessagePart::ToolInvocation { tool_call_id, tool_name, result, .. } => {
                flush_text(&mut text_buf, out);
                let result = result.clone().ok_or_else(|| {
                    Error::invalid_message(format!(
                        "user-supplied tool-invocation '{tool_call_id}' is missing a result"
                    ))
                })?;
                out.push(LLMMessage::Tool {
                    id: tool_call_id.clone(),
                    name: tool_name.clone(),
                    result,
                });
            }
        }
    }
    flush_text(&mut text_buf, out);
    Ok(())
}

/// Scans an assistant message's parts in order, combining consecutive text
/// and tool-invocation parts into one assistant entry, splitting into a new
/// assistant entry whenever a tool result forces a turn boundary (§4.1 step 3).
fn convert_assistant_message(message: &UIMessage, out: &mut Vec<LLMMessage>) -> Result<(), Error> {
    let mut text_buf: Option<String> = None;
    let mut calls: Vec<ToolCallRef> = Vec::new();
    let mut pending_results: Vec<(String, String, Value)> = Vec::new();

    let flush = |text_buf: &mut Option<String>,
                 calls: &mut Vec<ToolCallRef>,
                 pending_results: &mut Vec<(String, String, Value)>,
                 out: &mut Vec<LLMMessage>| {
        if text_buf.is_some() || !calls.is_empty() {
            out.push(LLMMessage::Assistant {
                text: text_buf.take(),
                tool_calls: std::mem::take(calls),
            });
        }
        for (id, name, result) in pending_results.drain(..) {
            out.push(LLMMessage::Tool { id, name, result });
        }
    };

    for part in &message.parts {
        match part {
            MessagePart::Text { text } => {
                // A text part following an already-resolved tool call starts a
                // new assistant entry, since the tool result must sit between
                // them on the wire (§4.1 step 3's "splits into two" rule).
                if !pending_results.is_empty() {
                    flush(&mut text_buf, &mut calls, &mut pending_results, out);
                }
                let buf = text_buf.get_or_insert_with(String::new);
                if !buf.is_empty() {
                    buf.push('\n');
                }
                buf.push_str(text);
            }
            MessagePart::ToolInvocation { tool_call_id, tool_name, args, result } => {
                calls.push(ToolCallRef {
                    id: tool_call_id.clone(),
                    name: tool_name.clone(),
                    args: args.clone(),
                });
                if let Some(result) = result {
                    pending_results.push((tool_call_id.clone(), tool_name.clone(), result.clone()));
                }
            }
        }
    }
    flush(&mut text_buf, &mut calls, &mut pending_results, out);
    Ok(())
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::UIMessage;
    use serde_json::json;

    fn text(s: &str) -> MessagePart {
        MessagePart::Text { text: s.to_string() }
    }

    #[test]
    fn plain_chat_converts_to_single_user_entry() {
        let messages = vec![UIMessage::new("m1", Role::User, vec![text("hi")])];
        let out = convert_messages(&messages).unwrap();
        assert_eq!(out, vec![LLMMessage::User { text: "hi".into() }]);
    }

    #[test]
    fn system_message_rejects_non_text_parts() {
        let messages = vec![UIMessage::new(
            "m1",
            Role::System,
            vec![MessagePart::ToolInvocation {
                tool_call_id: "c1".into(),
                tool_name: "x".into(),
                args: json!({}),
                result: None,
            }],
        )];
        assert!(convert_messages(&messages).is_err());
    }

    #[test]
    fn assistant_tool_call_with_embedded_result_splits_on_following_text() {
        let messages = vec![UIMessage::new(
            "m1",
            Role::Assistant,
            vec![
                text("checking"),
                MessagePart::ToolInvocation {
                    tool_call_id: "c1".into(),
                    tool_name: "generateChart".into(),
                    args: json!({"x": 1}),
                    result: Some(json!({"x": 1})),
                },
                text("done"),
            ],
        )];
        let out = convert_messages(&messages).unwrap();
        assert_eq!(
            out,
            vec![
                LLMMessage::Assistant {
                    text: Some("checking".into()),
                    tool_calls: vec![ToolCallRef {
                        id: "c1".into(),
                        name: "generateChart".into(),
                        args: json!({"x": 1}),
                    }],
                },
                LLMMessage::Tool { id: "c1".into(), name: "generateChart".into(), result: json!({"x": 1}) },
                LLMMessage::Assistant { text: Some("done".into()), tool_calls: vec![] },
            ]
        );
    }

    #[test]
    fn pending_tool_call_without_result_produces_no_tool_entry() {
        let messages = vec![UIMessage::new(
            "m1",
            Role::Assistant,
            vec![MessagePart::ToolInvocation {
                tool_call_id: "c1".into(),
                tool_name: "generateForm".into(),
                args: json!({}),
                result: None,
            }],
        )];
        let out = convert_messages(&messages).unwrap();
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], LLMMessage::Assistant { tool_calls, .. } if tool_calls.len() == 1));
    }

    #[test]
    fn user_supplied_tool_invocation_becomes_tool_entry() {
        let messages = vec![UIMessage::new(
            "m1",
            Role::User,
            vec![MessagePart::ToolInvocation {
                tool_call_id: "c1".into(),
                tool_name: "generateForm".into(),
                args: json!({}),
                result: Some(json!({"ok": true})),
            }],
        )];
        let out = convert_messages(&messages).unwrap();
        assert_eq!(
            out,
            vec![LLMMessage::Tool { id: "c1".into(), name: "generateForm".into(), result: json!({"ok": true}) }]
        );
    }

    #[test]
    fn conversion_is_deterministic() {
        let messages = vec![UIMessage::new("m1", Role::User, vec![text("hi"), text("there")])];
        let a = convert_messages(&messages).unwrap();
        let b = convert_messages(&messages).unwrap();
        assert_eq!(a, b);
    }
}

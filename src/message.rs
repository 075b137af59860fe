//! Input message model (C2): UIMessages as received from a client, and the
//! structural validation they must pass before conversion (§4.1).

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessagePart {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool-invocation")]
    ToolInvocation {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        args: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UIMessage {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
}

impl UIMessage {
    pub fn new(id: impl Into<String>, role: Role, parts: Vec<MessagePart>) -> Self {
        Self { id: id.into(), role, parts }
    }
}

/// Validates the structural invariants from §3 across an entire conversation:
/// every message has non-empty parts, `tool-invocation` parts only appear in
/// `assistant` messages, and every `toolCallId` is globally unique.
///
/// This runs once, ahead of conversion (C4), so the converter itself can
/// assume a well-formed list.
pub fn validate_conversation(messages: &[UIMessage]) -> Result<(), Error> {
    let mut seen_ids = HashSet::new();

    for message in messages {
        if message.parts.is_empty() {
            return Err(Error::invalid_message(format!(
                "message '{}' has no parts",
                message.id
            )));
        }

        for part in &message.parts {
            if let MessagePart::ToolInvocation { tool_call_id, .. } = part {
                if message.role != Role::Assistant && message.role != Role::User {
                    return Err(Error::invalid_message(format!(
                        "tool-invocation part in '{}' message '{}' is not allowed",
                        role_name(message.role),
                        message.id
                    )));
                }
                if !seen_ids.insert(tool_call_id.clone()) {
                    return Err(Error::invalid_message(format!(
                        "duplicate toolCallId '{tool_call_id}'"
                    )));
                }
            }
        }
    }

    Ok(())
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(s: &str) -> MessagePart {
        MessagePart::Text { text: s.to_string() }
    }

    #[test]
    fn empty_parts_rejected() {
        let messages = vec![UIMessage::new("m1", Role::User, vec![])];
        let err = validate_conversation(&messages).unwrap_err();
        assert!(matches!(err, Error::InvalidMessage(_)));
    }

    #[test]
    fn tool_invocation_in_system_message_rejected() {
        let messages = vec![UIMessage::new(
            "m1",
            Role::System,
            vec![MessagePart::ToolInvocation {
                tool_call_id: "c1".into(),
                tool_name: "generateForm".into(),
                args: json!({}),
                result: None,
            }],
        )];
        assert!(validate_conversation(&messages).is_err());
    }

    #[test]
    fn duplicate_tool_call_id_rejected() {
        let make = |id: &str| MessagePart::ToolInvocation {
            tool_call_id: id.into(),
            tool_name: "generateForm".into(),
            args: json!({}),
            result: Some(json!({})),
        };
        let messages = vec![
            UIMessage::new("m1", Role::Assistant, vec![make("c1")]),
            UIMessage::new("m2", Role::Assistant, vec![make("c1")]),
        ];
        let err = validate_conversation(&messages).unwrap_err();
        assert!(matches!(err, Error::InvalidMessage(_)));
    }

    #[test]
    fn well_formed_conversation_passes() {
        let messages = vec![
            UIMessage::new("m1", Role::User, vec![text("hi")]),
            UIMessage::new(
                "m2",
                Role::Assistant,
                vec![
                    text("let me check"),
                    MessagePart::ToolInvocation {
                        tool_call_id: "c1".into(),
                        tool_name: "generateChart".into(),
                        args: json!({"x": 1}),
                        result: Some(json!({"x": 1})),
                    },
                ],
            ),
        ];
        assert!(validate_conversation(&messages).is_ok());
    }

    #[test]
    fn deserializes_from_wire_json() {
        let json = r#"{"id":"m1","role":"user","parts":[{"type":"text","text":"hi"}]}"#;
        let parsed: UIMessage = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.id, "m1");
        assert_eq!(parsed.role, Role::User);
    }
}

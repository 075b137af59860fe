//! Tool definitions and the display-tool registry (C3).
//!
//! A [`Tool`] pairs OpenAI function-calling metadata with an async handler.
//! The four tools registered by [`default_tools`] are "display tools": their
//! handler is the identity function, validating and echoing arguments back so
//! the client can render a form/chart/code block/card from them. An agent
//! never executes real side effects on the server — the UI is the executor.

use crate::error::Error;
use crate::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed async handler: takes validated arguments, returns the tool result.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// A tool definition usable in an OpenAI-compatible `tools` array.
///
/// Tools are immutable once built; cloning only bumps the handler's `Arc`
/// refcount, so a [`Tool`] can be shared across concurrent requests cheaply.
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    input_schema: Value,
    handler: ToolHandler,
}

impl Tool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    pub async fn execute(&self, arguments: Value) -> Result<Value> {
        (self.handler)(arguments).await
    }

    /// OpenAI function-calling entry for this tool, for the request's `tools` array.
    pub fn to_openai_format(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

/// Read-only, process-wide tool registry. Built once at startup by
/// [`default_tools`] and shared via [`crate::state::AppState`].
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<HashMap<String, Tool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Tool>) -> Self {
        let map = tools.into_iter().map(|t| (t.name.clone(), t)).collect();
        Self { tools: Arc::new(map) }
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    /// All registered tools in OpenAI function-calling format, for the `tools`
    /// field of an upstream request.
    pub fn to_openai_format(&self) -> Vec<Value> {
        self.tools.values().map(Tool::to_openai_format).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }
}

/// Identity handler: validates `args` is a JSON object, then returns it
/// unchanged as the tool result (§4.3 — display tools render client-side).
fn identity_handler(args: Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> {
    Box::pin(async move {
        if !args.is_object() {
            return Err(Error::tool_failure("tool arguments must be a JSON object"));
        }
        Ok(args)
    })
}

fn display_tool(name: &str, description: &str, schema: Value) -> Tool {
    Tool::new(name, description, schema, identity_handler)
}

/// Builds the four fixed display tools the proxy exposes to every agent,
/// unless an agent descriptor overrides its own tool set (§4.2).
pub fn default_tools() -> Vec<Tool> {
    vec![
        display_tool(
            "generateForm",
            "Render an interactive form with the given fields for the user to fill out.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "fields": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": {"type": "string"},
                                "label": {"type": "string"},
                                "kind": {"type": "string"}
                            },
                            "required": ["name", "label", "kind"]
                        }
                    }
                },
                "required": ["title", "fields"]
            }),
        ),
        display_tool(
            "generateChart",
            "Render a chart from labeled data series.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "chartType": {"type": "string", "enum": ["bar", "line", "pie"]},
                    "labels": {"type": "array", "items": {"type": "string"}},
                    "series": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": {"type": "string"},
                                "data": {"type": "array", "items": {"type": "number"}}
                            },
                            "required": ["name", "data"]
                        }
                    }
                },
                "required": ["chartType", "labels", "series"]
            }),
        ),
        display_tool(
            "generateCode",
            "Render a syntax-highlighted code block.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "language": {"type": "string"},
                    "code": {"type": "string"}
                },
                "required": ["language", "code"]
            }),
        ),
        display_tool(
            "generateCard",
            "Render a titled card with a body and an optional image.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "body": {"type": "string"},
                    "imageUrl": {"type": "string"}
                },
                "required": ["title", "body"]
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identity_handler_echoes_valid_object_args() {
        let tool = display_tool("generateCard", "x", serde_json::json!({}));
        let args = serde_json::json!({"title": "t", "body": "b"});
        let result = tool.execute(args.clone()).await.unwrap();
        assert_eq!(result, args);
    }

    #[tokio::test]
    async fn identity_handler_rejects_non_object_args() {
        let tool = display_tool("generateCard", "x", serde_json::json!({}));
        let err = tool.execute(serde_json::json!("not an object")).await.unwrap_err();
        assert!(matches!(err, Error::ToolFailure(_)));
    }

    #[test]
    fn default_tools_registers_all_four() {
        let registry = ToolRegistry::new(default_tools());
        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["generateCard", "generateChart", "generateCode", "generateForm"]);
    }

    #[test]
    fn openai_format_is_a_function_entry_per_tool() {
        let registry = ToolRegistry::new(default_tools());
        let formatted = registry.to_openai_format();
        assert_eq!(formatted.len(), 4);
        for entry in &formatted {
            assert_eq!(entry["type"], "function");
            assert!(entry["function"]["name"].is_string());
        }
    }

    #[test]
    fn unknown_tool_lookup_returns_none() {
        let registry = ToolRegistry::new(default_tools());
        assert!(registry.get("doesNotExist").is_none());
    }
}

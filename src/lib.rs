//! # Streaming chat proxy core
//!
//! This crate sits between an HTTP client (browser or SDK) and a remote,
//! OpenAI-compatible completion API. A client posts a conversation — a list
//! of structured messages, optionally naming a pre-built agent or a tool
//! whitelist — and receives a real-time event stream encoded as
//! Server-Sent Events.
//!
//! ## Request lifecycle
//!
//! 1. [`message`] validates the incoming `UIMessage` list (non-empty parts,
//!    well-formed tool invocations, unique tool-call ids).
//! 2. [`convert`] flattens it into the ordered [`convert::LLMMessage`] list
//!    the upstream client sends.
//! 3. [`handler`] resolves the request against the default chat path or a
//!    [`registry`] entry, then drives [`agent::run_chat_turn`].
//! 4. [`agent`] streams the upstream completion, projecting it into
//!    [`event::StreamEvent`]s and dispatching [`tools`] calls in between
//!    turns.
//! 5. [`sse`] frames every event onto the wire, enforcing the wall-clock
//!    timeout and the terminal-event guarantee regardless of how the
//!    producer exits.
//!
//! [`title`] is the non-streaming sibling endpoint: it reuses message
//! validation, conversion, and a single upstream turn, but never surfaces an
//! error to its caller — a missing title degrades gracefully.
//!
//! [`server`] assembles the axum router and binds a listener; [`config`]
//! loads the layered configuration that [`state::AppState`] is built from;
//! [`auth`] and [`logging`] are the two outermost middleware layers.

pub mod agent;
pub mod auth;
pub mod config;
pub mod convert;
pub mod error;
pub mod event;
pub mod handler;
pub mod health;
pub mod logging;
pub mod message;
mod openai;
pub mod registry;
pub mod retry;
pub mod server;
pub mod sse;
pub mod state;
pub mod title;
pub mod tools;
pub mod upstream;

pub use convert::{convert_messages, LLMMessage, ToolCallRef};
pub use error::{Error, Result};
pub use event::StreamEvent;
pub use message::{validate_conversation, MessagePart, Role, UIMessage};

/// Convenience re-exports for a typical composition root (see
/// `src/bin/server.rs`): configuration, shared state, logging, and the router.
pub mod prelude {
    pub use crate::config::{self, AppConfig};
    pub use crate::logging;
    pub use crate::registry::{default_agents, AgentRegistry};
    pub use crate::server::{router, WebServer};
    pub use crate::state::AppState;
    pub use crate::tools::{default_tools, ToolRegistry};
    pub use crate::upstream::UpstreamClient;
    pub use crate::{Error, Result, StreamEvent, UIMessage};
}

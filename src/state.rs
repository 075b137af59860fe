//! Shared application state (C10), handed to every request handler behind
//! an `Arc` so cloning it for a handler signature is a single refcount bump.
//!
//! Grounded on `openintent-web`'s `AppState`: a `#[derive(Clone)]` struct
//! wrapping the upstream client, the fixed registries, and config, shared
//! across every handler and kept outside of axum's per-request state.

use crate::config::AppConfig;
use crate::registry::AgentRegistry;
use crate::tools::ToolRegistry;
use crate::upstream::UpstreamClient;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Shared, read-mostly state wired once in `main` and cloned into every
/// handler via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub upstream: UpstreamClient,
    pub agents: AgentRegistry,
    pub tools: ToolRegistry,
    pub started_at: Instant,
    /// Cancelled once from `main`'s shutdown future (§5's third cancellation
    /// source) and raced against every in-flight turn in
    /// `handler::run_stream`. A clone of the same token, not a fresh one per
    /// request — cancelling it once fans out to every request in flight.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        upstream: UpstreamClient,
        agents: AgentRegistry,
        tools: ToolRegistry,
    ) -> Self {
        Self {
            config: Arc::new(config),
            upstream,
            agents,
            tools,
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

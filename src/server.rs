//! HTTP server and routing (C10).
//!
//! Grounded on `openintent-web`'s `WebServer`: a struct holding the bound
//! config and shared state, a `router()` that assembles routes and layers,
//! and a `start()` that binds a `TcpListener` and hands it to `axum::serve`.

use crate::auth;
use crate::health;
use crate::logging;
use crate::state::AppState;
use crate::title;
use axum::extract::State;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct WebServer {
    config: crate::config::ServerConfig,
    state: AppState,
}

impl WebServer {
    pub fn new(config: crate::config::ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Binds the configured address and serves until `shutdown` resolves.
    pub async fn start(&self, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> std::io::Result<()> {
        let addr = self.addr();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(%addr, "starting chat proxy server");
        axum::serve(listener, self.router()).with_graceful_shutdown(shutdown).await
    }
}

/// Builds the full router: business routes, then the auth layer (skipped for
/// `/health*` inside the middleware itself), then CORS, request-id
/// assignment, and request tracing as the outermost layers.
pub fn router(state: AppState) -> Router {
    let app_config = state.config.clone();

    Router::new()
        .route("/chat", post(crate::handler::chat))
        .route("/title/generate", post(title::generate))
        .route("/models", get(models))
        .route("/health", get(health::summary))
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .with_state(state)
        .layer(middleware::from_fn_with_state(app_config, auth::check))
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(logging::request_id))
        .layer(TraceLayer::new_for_http())
}

/// Model list is derived from configuration, not a live upstream query — the
/// proxy advertises the one configured default model plus whatever a
/// deployment names via agent descriptors (§6).
async fn models(State(state): State<AppState>) -> impl IntoResponse {
    let mut names = vec![state.config.upstream.default_model.clone()];
    for name in state.agents.names() {
        if let Some(descriptor) = state.agents.get(name) {
            if let Some(model) = &descriptor.model {
                if !names.contains(model) {
                    names.push(model.clone());
                }
            }
        }
    }

    let models: Vec<_> = names.into_iter().map(|id| json!({ "id": id, "displayName": id })).collect();
    Json(json!({ "models": models }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, AuthConfig, HealthConfig, LoggingConfig, ServerConfig, TitleConfig, UpstreamConfig};
    use crate::registry::{default_agents, AgentRegistry};
    use crate::tools::{default_tools, ToolRegistry};
    use crate::upstream::UpstreamClient;
    use tower::ServiceExt;

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

    #[tokio::test]
    async fn health_live_is_reachable_without_auth() {
        let app = router(test_state());
        let request = axum::http::Request::builder()
            .uri("/health/live")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn models_endpoint_lists_the_default_model() {
        let app = router(test_state());
        let request = axum::http::Request::builder()
            .uri("/models")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}

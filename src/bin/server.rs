//! Process entry point: load config, wire the composition root, serve until
//! a shutdown signal arrives.

use anyhow::{Context, Result};
use chatproxy_core::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let app_config = config::load().context("failed to load configuration")?;
    logging::init(&app_config.logging);

    let upstream_client = UpstreamClient::with_retry(
        app_config.upstream.base_url.clone(),
        app_config.upstream.api_key.clone(),
        app_config.upstream.connect_timeout(),
        app_config.upstream.retry_config(),
    )
    .context("failed to build upstream HTTP client")?;

    let agents = AgentRegistry::new(default_agents());
    let tools = ToolRegistry::new(default_tools());
    let server_config = app_config.server.clone();
    let app_state = AppState::new(app_config, upstream_client, agents, tools);

    // §5: the same token lives in `AppState` and is raced against every
    // in-flight turn in `handler::run_stream`; cancelling it here fans the
    // process shutdown signal out to every request still streaming.
    let shutdown_token = app_state.shutdown.clone();

    let web_server = WebServer::new(server_config, app_state);
    web_server
        .start(async move {
            shutdown_signal().await;
            shutdown_token.cancel();
        })
        .await
        .context("server exited with an error")?;

    Ok(())
}

/// Resolves once SIGINT (Ctrl-C) or, on Unix, SIGTERM arrives — used as
/// axum's graceful-shutdown future (§5 "explicit shutdown signal").
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
}

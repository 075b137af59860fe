//! Health endpoints (C14): `/health`, `/health/live`, `/health/ready`.
//!
//! Liveness never depends on anything external — it answers as soon as the
//! process can schedule a task. Readiness runs the configured `health.checks`
//! (§4.11); each is a cheap, bounded probe, never a real chat completion and
//! never a lookup against the agent registry (§4.13).

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::time::Duration;

/// Upper bound on a single readiness probe, regardless of `upstream.request_timeout_secs`.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

pub async fn ready(State(state): State<AppState>) -> Response {
    let (ok, checks) = run_checks(&state).await;
    let status = if ok { "ok" } else { "degraded" };
    let code = if ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(json!({ "status": status, "checks": checks }))).into_response()
}

pub async fn summary(State(state): State<AppState>) -> impl IntoResponse {
    let (ok, checks) = run_checks(&state).await;
    let status = if ok { "ok" } else { "degraded" };
    (StatusCode::OK, Json(json!({ "status": status, "checks": checks })))
}

/// Runs every check named in `health.checks`, returning whether all passed
/// alongside the per-check `"ok"`/`"fail"` map for the response body.
async fn run_checks(state: &AppState) -> (bool, serde_json::Map<String, serde_json::Value>) {
    let mut checks = serde_json::Map::new();
    let mut all_ok = true;

    for name in &state.config.health.checks {
        let ok = match name.as_str() {
            "upstream" => probe_upstream(state).await.is_ok(),
            _ => false,
        };
        all_ok &= ok;
        checks.insert(name.clone(), json!(if ok { "ok" } else { "fail" }));
    }

    (all_ok, checks)
}

/// Lightweight reachability check against `upstream.base_url` — never a real
/// chat completion, never wrapped in the §4.8 retry policy.
async fn probe_upstream(state: &AppState) -> Result<(), String> {
    state.upstream.check_reachable(PROBE_TIMEOUT).await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn live_always_reports_ok() {
        let response = live().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

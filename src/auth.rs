//! Auth middleware (C11).
//!
//! Three modes driven by `auth.mode` (§4.11): `off` (no-op), `api-key`
//! (bearer token or `X-API-Key` header checked against a configured list),
//! and `jwt` (bearer token verified as a JWT, gated behind the `jwt-auth`
//! feature). `/health*` routes are exempt in every mode — an orchestrator's
//! liveness probe shouldn't need credentials.

use crate::config::{AppConfig, AuthMode};
use crate::error::Error;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

const API_KEY_HEADER: &str = "x-api-key";

/// Axum middleware entry point: `Router::layer(middleware::from_fn_with_state(config, auth::check))`.
pub async fn check(
    State(config): State<Arc<AppConfig>>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path().starts_with("/health") {
        return next.run(request).await;
    }

    match &config.auth.mode {
        AuthMode::Off => next.run(request).await,
        AuthMode::ApiKey => match check_api_key(&config, &request) {
            Ok(()) => next.run(request).await,
            Err(err) => error_response(err),
        },
        AuthMode::Jwt => match check_jwt(&config, &request) {
            Ok(()) => next.run(request).await,
            Err(err) => error_response(err),
        },
    }
}

fn error_response(err: Error) -> Response {
    let status = err.http_status();
    let body = axum::Json(serde_json::json!({ "detail": err.to_string(), "code": err.code() }));
    (status, body).into_response()
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn check_api_key(config: &AppConfig, request: &Request) -> Result<(), Error> {
    let candidate = bearer_token(request).or_else(|| {
        request.headers().get(API_KEY_HEADER).and_then(|v| v.to_str().ok())
    });

    match candidate {
        Some(key) if config.auth.api_keys.iter().any(|k| k == key) => Ok(()),
        Some(_) => Err(Error::auth_failure("invalid API key")),
        None => Err(Error::auth_failure("missing credentials")),
    }
}

#[cfg(feature = "jwt-auth")]
fn check_jwt(config: &AppConfig, request: &Request) -> Result<(), Error> {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
    use std::collections::HashSet;
    use std::str::FromStr;

    let token = bearer_token(request).ok_or_else(|| Error::auth_failure("missing bearer token"))?;
    let secret = config
        .auth
        .jwt_secret
        .as_ref()
        .ok_or_else(|| Error::config("auth.mode is 'jwt' but auth.jwt_secret is not set"))?;

    let algorithm = Algorithm::from_str(&config.auth.jwt_algorithm)
        .map_err(|_| Error::config(format!("unrecognized auth.jwt_algorithm '{}'", config.auth.jwt_algorithm)))?;

    let mut validation = Validation::new(algorithm);
    if let Some(issuer) = &config.auth.jwt_issuer {
        validation.iss = Some(HashSet::from([issuer.clone()]));
    }
    if let Some(audience) = &config.auth.jwt_audience {
        validation.aud = Some(HashSet::from([audience.clone()]));
    }

    decode::<serde_json::Value>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|_| ())
        .map_err(|e| Error::auth_failure(format!("invalid JWT: {e}")))
}

#[cfg(not(feature = "jwt-auth"))]
fn check_jwt(_config: &AppConfig, _request: &Request) -> Result<(), Error> {
    Err(Error::config("auth.mode is 'jwt' but this build lacks the jwt-auth feature"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, HealthConfig, LoggingConfig, ServerConfig, TitleConfig, UpstreamConfig};

    fn config_with_keys(keys: Vec<String>) -> AppConfig {
        AppConfig {
            server: ServerConfig::default(),
            auth: AuthConfig { mode: AuthMode::ApiKey, api_keys: keys, ..AuthConfig::default() },
            upstream: UpstreamConfig::default(),
            logging: LoggingConfig::default(),
            title: TitleConfig::default(),
            health: HealthConfig::default(),
        }
    }

    fn request_with_header(name: &str, value: &str) -> Request {
        Request::builder()
            .uri("/chat")
            .header(name, value)
            .body(axum::body::Body::empty())
            .unwrap()
    }

    #[test]
    fn valid_bearer_key_passes() {
        let config = config_with_keys(vec!["secret123".into()]);
        let request = request_with_header("authorization", "Bearer secret123");
        assert!(check_api_key(&config, &request).is_ok());
    }

    #[test]
    fn valid_x_api_key_header_passes() {
        let config = config_with_keys(vec!["secret123".into()]);
        let request = request_with_header("x-api-key", "secret123");
        assert!(check_api_key(&config, &request).is_ok());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let config = config_with_keys(vec!["secret123".into()]);
        let request = request_with_header("authorization", "Bearer wrong");
        let err = check_api_key(&config, &request).unwrap_err();
        assert!(matches!(err, Error::AuthFailure(_)));
    }

    #[test]
    fn missing_credentials_is_rejected() {
        let config = config_with_keys(vec!["secret123".into()]);
        let request = Request::builder().uri("/chat").body(axum::body::Body::empty()).unwrap();
        let err = check_api_key(&config, &request).unwrap_err();
        assert!(matches!(err, Error::AuthFailure(_)));
    }
}

//! Layered configuration (C12).
//!
//! Precedence, highest to lowest (§4.11):
//!
//! 1. `CHATPROXY__`-prefixed environment variables, `__` as the nested-key delimiter
//!    (e.g. `CHATPROXY__UPSTREAM__BASE_URL`)
//! 2. `~/.chatproxy.env`, a `KEY=VALUE` file applied as process environment
//!    before step 1 is read, for secrets an operator doesn't want in argv or a
//!    repo-local file
//! 3. `./config.local.yaml` (gitignored machine overrides)
//! 4. `./config.yaml`, or the path named by `CHATPROXY_CONFIG`
//! 5. the defaults below
//!
//! Grounded on `config = { features = ["yaml"] }` as used for layered
//! YAML config in the wider example pack; `serde_yaml` backs the `yaml`
//! feature's deserialization.

use crate::error::Error;
use crate::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".into(), port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    Off,
    ApiKey,
    Jwt,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Signing algorithm for `mode: jwt` (§4.11). Only meaningful with the
    /// `jwt-auth` feature.
    #[serde(default = "default_jwt_algorithm")]
    pub jwt_algorithm: String,
    #[serde(default)]
    pub jwt_issuer: Option<String>,
    #[serde(default)]
    pub jwt_audience: Option<String>,
}

fn default_jwt_algorithm() -> String {
    "HS256".into()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Off,
            api_keys: Vec::new(),
            jwt_secret: None,
            jwt_algorithm: default_jwt_algorithm(),
            jwt_issuer: None,
            jwt_audience: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub default_model: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Max attempts for the initial upstream connection (§4.8); 1 disables retry.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_retries() -> u32 {
    3
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Retry policy for the initial upstream connection, derived from
    /// `retries` and the §4.8 backoff constants (base 1s, multiplier 2, ±20% jitter).
    pub fn retry_config(&self) -> crate::retry::RetryConfig {
        crate::retry::RetryConfig::new().with_max_attempts(self.retries.max(1))
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".into(),
            api_key: None,
            default_model: "gpt-4o".into(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            retries: default_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), json: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TitleConfig {
    #[serde(default = "default_title_max_length")]
    pub max_length: usize,
    #[serde(default = "default_title_timeout_secs")]
    pub timeout_secs: u64,
    /// Model the title agent targets (§4.7). Falls back to
    /// `upstream.default_model` when unset, rather than accepting one from
    /// the client — the title endpoint is not conversational input.
    #[serde(default)]
    pub model: Option<String>,
}

fn default_title_max_length() -> usize {
    50
}

fn default_title_timeout_secs() -> u64 {
    10
}

impl TitleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self { max_length: default_title_max_length(), timeout_secs: default_title_timeout_secs(), model: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Named checks run by `/health/ready` and `/health` (§4.11/§4.13).
    /// Currently only `"upstream"` is recognized; an unrecognized name is
    /// reported as a failing check rather than rejected at load time.
    #[serde(default = "default_health_checks")]
    pub checks: Vec<String>,
    /// Informational: how often an external prober is expected to poll.
    /// Not a self-polling interval — nothing in this process reads its own
    /// clock against this value.
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
}

fn default_health_checks() -> Vec<String> {
    vec!["upstream".to_string()]
}

fn default_health_interval_secs() -> u64 {
    30
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { checks: default_health_checks(), interval_secs: default_health_interval_secs() }
    }
}

/// Top-level, fully-resolved configuration for one process.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub title: TitleConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

/// Loads configuration from all five sources in precedence order and
/// validates it. Fails fast with a [`Error::Config`] on anything a deployment
/// would want to know about before binding a socket (§7 — config errors are
/// always fatal at startup, never degraded into a runtime fallback).
pub fn load() -> Result<AppConfig> {
    apply_home_env_file();

    let config_path =
        std::env::var("CHATPROXY_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());

    let builder = config::Config::builder()
        .set_default("upstream.base_url", "http://localhost:11434/v1")
        .map_err(config_err)?
        .set_default("upstream.default_model", "gpt-4o")
        .map_err(config_err)?
        .set_default("upstream.retries", 3)
        .map_err(config_err)?
        .set_default("server.host", "0.0.0.0")
        .map_err(config_err)?
        .set_default("server.port", 8080)
        .map_err(config_err)?
        .set_default("auth.mode", "off")
        .map_err(config_err)?
        .set_default("auth.jwt_algorithm", "HS256")
        .map_err(config_err)?
        .set_default("health.checks", vec!["upstream".to_string()])
        .map_err(config_err)?
        .set_default("health.interval_secs", 30)
        .map_err(config_err)?
        .add_source(config::File::with_name(&config_path).required(false))
        .add_source(config::File::with_name("config.local").required(false))
        .add_source(
            config::Environment::with_prefix("CHATPROXY")
                .separator("__")
                .try_parsing(true),
        );

    let raw = builder.build().map_err(config_err)?;
    let parsed: AppConfig = raw.try_deserialize().map_err(config_err)?;
    validate(&parsed)?;
    Ok(parsed)
}

fn config_err(err: impl std::fmt::Display) -> Error {
    Error::config(err.to_string())
}

/// Applies `~/.chatproxy.env` (if present) to the process environment before
/// the `config` crate reads `CHATPROXY__*` variables, so secrets can live
/// outside the repo without being duplicated into `config.local.yaml`.
fn apply_home_env_file() {
    let Some(home) = std::env::var_os("HOME") else { return };
    let path = Path::new(&home).join(".chatproxy.env");
    let Ok(contents) = std::fs::read_to_string(&path) else { return };

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            // An already-set variable (e.g. from the real shell environment)
            // takes precedence over this file, matching the documented order.
            if std::env::var_os(key.trim()).is_none() {
                std::env::set_var(key.trim(), value.trim());
            }
        }
    }
}

fn validate(config: &AppConfig) -> Result<()> {
    if config.auth.mode == AuthMode::ApiKey && config.auth.api_keys.is_empty() {
        return Err(Error::config("auth.mode is 'api-key' but auth.api_keys is empty"));
    }
    if config.auth.mode == AuthMode::Jwt && config.auth.jwt_secret.is_none() {
        return Err(Error::config("auth.mode is 'jwt' but auth.jwt_secret is not set"));
    }
    #[cfg(not(feature = "jwt-auth"))]
    if config.auth.mode == AuthMode::Jwt {
        return Err(Error::config(
            "auth.mode is 'jwt' but this build was compiled without the jwt-auth feature",
        ));
    }
    if config.upstream.base_url.trim().is_empty() {
        return Err(Error::config("upstream.base_url must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_satisfy_validation() {
        let config = AppConfig {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            upstream: UpstreamConfig::default(),
            logging: LoggingConfig::default(),
            title: TitleConfig::default(),
            health: HealthConfig::default(),
        };
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn auth_mode_deserializes_from_documented_kebab_case_value() {
        let mode: AuthMode = serde_json::from_str(r#""api-key""#).unwrap();
        assert_eq!(mode, AuthMode::ApiKey);
    }

    #[test]
    fn api_key_mode_without_keys_is_rejected() {
        let config = AppConfig {
            server: ServerConfig::default(),
            auth: AuthConfig { mode: AuthMode::ApiKey, ..AuthConfig::default() },
            upstream: UpstreamConfig::default(),
            logging: LoggingConfig::default(),
            title: TitleConfig::default(),
            health: HealthConfig::default(),
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn retry_config_derives_max_attempts_from_retries() {
        let mut upstream = UpstreamConfig::default();
        upstream.retries = 5;
        assert_eq!(upstream.retry_config().max_attempts, 5);
    }

    #[test]
    fn empty_base_url_is_rejected() {
        let mut upstream = UpstreamConfig::default();
        upstream.base_url = "   ".into();
        let config = AppConfig {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            upstream,
            logging: LoggingConfig::default(),
            title: TitleConfig::default(),
            health: HealthConfig::default(),
        };
        assert!(validate(&config).is_err());
    }
}

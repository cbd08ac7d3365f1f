use std::env;
use std::str::FromStr;
use std::time::Duration;

use chatdesk_client_core::auth::{
    AuthInputError, DEFAULT_CONTROL_BASE_URL, normalize_base_url, resolve_control_base_url,
};
use chatdesk_client_core::deferred_settings::DEFAULT_LINK_QUERY_PARAM;
use chatdesk_client_core::token_source::{DEFAULT_TOKEN_COOKIE_NAME, DEFAULT_TOKEN_QUERY_PARAM};
use chatdesk_control_client::{
    ControlClientConfig, DEFAULT_REQUEST_ATTEMPTS, DEFAULT_TIMEOUT_MS,
};
use thiserror::Error;

const DEFAULT_WORKSPACE_POLL_ATTEMPTS: u32 = 5;
const DEFAULT_WORKSPACE_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_TRIGGER_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_SIGN_IN_PATH: &str = "/login";
const DEFAULT_LOG_FILTER: &str = "info";
const MIN_TRIGGER_POLL_INTERVAL_MS: u64 = 1;

/// How the app makes freshly written shared state visible after the chat navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshStrategy {
    None,
    /// Invoke the post-navigation hook once, in process.
    #[default]
    Hook,
    /// Write a one-shot marker consumed on the next page mount.
    PersistedMarker,
}

impl RefreshStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Hook => "hook",
            Self::PersistedMarker => "persisted_marker",
        }
    }
}

impl FromStr for RefreshStrategy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "hook" => Ok(Self::Hook),
            "persisted_marker" | "marker" => Ok(Self::PersistedMarker),
            _ => Err(ConfigError::InvalidRefreshStrategy {
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid control base url: {source}")]
    InvalidBaseUrl { source: AuthInputError },
    #[error("invalid CHATDESK_REFRESH_STRATEGY value '{value}'")]
    InvalidRefreshStrategy { value: String },
}

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub control_base_url: String,
    pub control_base_url_source: &'static str,
    pub http_timeout_ms: u64,
    pub http_request_attempts: usize,
    pub workspace_poll_attempts: u32,
    pub workspace_poll_interval: Duration,
    pub trigger_poll_interval: Duration,
    pub sign_in_path: String,
    pub token_query_param: String,
    pub token_cookie_name: String,
    pub link_query_param: String,
    pub refresh_strategy: RefreshStrategy,
    pub log_filter: String,
}

impl BootstrapConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let (control_base_url, control_base_url_source) = resolve_control_base_url()
            .map_err(|source| ConfigError::InvalidBaseUrl { source })?;

        let http_timeout_ms = env::var("CHATDESK_HTTP_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        let http_request_attempts = env::var("CHATDESK_HTTP_REQUEST_ATTEMPTS")
            .ok()
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|attempts| *attempts > 0)
            .unwrap_or(DEFAULT_REQUEST_ATTEMPTS);

        let workspace_poll_attempts = env::var("CHATDESK_WORKSPACE_POLL_ATTEMPTS")
            .ok()
            .and_then(|value| value.trim().parse::<u32>().ok())
            .filter(|attempts| *attempts > 0)
            .unwrap_or(DEFAULT_WORKSPACE_POLL_ATTEMPTS);

        let workspace_poll_interval_ms = env::var("CHATDESK_WORKSPACE_POLL_INTERVAL_MS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_WORKSPACE_POLL_INTERVAL_MS);

        let trigger_poll_interval_ms = env::var("CHATDESK_TRIGGER_POLL_INTERVAL_MS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_TRIGGER_POLL_INTERVAL_MS)
            .max(MIN_TRIGGER_POLL_INTERVAL_MS);

        let sign_in_path = env_or("CHATDESK_SIGN_IN_PATH", DEFAULT_SIGN_IN_PATH);
        let token_query_param = env_or("CHATDESK_TOKEN_QUERY_PARAM", DEFAULT_TOKEN_QUERY_PARAM);
        let token_cookie_name = env_or("CHATDESK_TOKEN_COOKIE", DEFAULT_TOKEN_COOKIE_NAME);
        let link_query_param = env_or("CHATDESK_LINK_QUERY_PARAM", DEFAULT_LINK_QUERY_PARAM);

        let refresh_strategy = match env::var("CHATDESK_REFRESH_STRATEGY")
            .ok()
            .filter(|value| !value.trim().is_empty())
        {
            Some(value) => value.parse()?,
            None => RefreshStrategy::default(),
        };

        let log_filter = env_or("CHATDESK_LOG_FILTER", DEFAULT_LOG_FILTER);

        Ok(Self {
            control_base_url,
            control_base_url_source,
            http_timeout_ms,
            http_request_attempts,
            workspace_poll_attempts,
            workspace_poll_interval: Duration::from_millis(workspace_poll_interval_ms),
            trigger_poll_interval: Duration::from_millis(trigger_poll_interval_ms),
            sign_in_path,
            token_query_param,
            token_cookie_name,
            link_query_param,
            refresh_strategy,
            log_filter,
        })
    }

    /// Deterministic values with no real waiting between poll attempts.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            control_base_url: DEFAULT_CONTROL_BASE_URL.to_string(),
            control_base_url_source: "test",
            http_timeout_ms: 2_000,
            http_request_attempts: 1,
            workspace_poll_attempts: DEFAULT_WORKSPACE_POLL_ATTEMPTS,
            workspace_poll_interval: Duration::ZERO,
            trigger_poll_interval: Duration::from_millis(10),
            sign_in_path: DEFAULT_SIGN_IN_PATH.to_string(),
            token_query_param: DEFAULT_TOKEN_QUERY_PARAM.to_string(),
            token_cookie_name: DEFAULT_TOKEN_COOKIE_NAME.to_string(),
            link_query_param: DEFAULT_LINK_QUERY_PARAM.to_string(),
            refresh_strategy: RefreshStrategy::Hook,
            log_filter: "debug".to_string(),
        }
    }

    pub fn with_control_base_url(mut self, base_url: &str) -> Result<Self, ConfigError> {
        self.control_base_url =
            normalize_base_url(base_url).map_err(|source| ConfigError::InvalidBaseUrl { source })?;
        self.control_base_url_source = "override";
        Ok(self)
    }

    #[must_use]
    pub fn control_client_config(&self) -> ControlClientConfig {
        let mut config = ControlClientConfig::new(self.control_base_url.clone());
        config.timeout_ms = self.http_timeout_ms;
        config.request_attempts = self.http_request_attempts;
        config
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

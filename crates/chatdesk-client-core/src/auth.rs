use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTROL_BASE_URL: &str = "http://127.0.0.1:3000";
pub const ENV_CONTROL_BASE_URL: &str = "CHATDESK_CONTROL_BASE_URL";
pub const ENV_CONTROL_BASE_URL_LEGACY: &str = "CHATDESK_AUTH_BASE_URL";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthInputError {
    #[error("base url must not be empty")]
    EmptyBaseUrl,
    #[error("base url must use http:// or https:// and include a host")]
    InvalidBaseUrl,
    #[error("bearer token must not be empty")]
    EmptyBearerToken,
    #[error("session must carry both an access token and a refresh token")]
    IncompleteSession,
}

/// Opaque credential issued by the external identity provider.
///
/// Consumed at most once per bootstrap attempt. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn parse(raw: &str) -> Result<Self, AuthInputError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AuthInputError::EmptyBearerToken);
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BearerToken(<redacted, {} bytes>)", self.0.len())
    }
}

/// The application's own access/refresh pair plus the user it belongs to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeSession {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
}

impl NativeSession {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<Self, AuthInputError> {
        let access_token = access_token.into().trim().to_string();
        let refresh_token = refresh_token.into().trim().to_string();
        if access_token.is_empty() || refresh_token.is_empty() {
            return Err(AuthInputError::IncompleteSession);
        }
        Ok(Self {
            access_token,
            refresh_token,
            user_id: user_id.into().trim().to_string(),
        })
    }
}

impl fmt::Debug for NativeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeSession")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct AccessTokenClaims {
    sub: Option<String>,
}

/// Reads the `sub` claim out of a JWT-shaped access token without verifying it.
///
/// The backend already validated the token; this only recovers the user id when
/// the bridge response omits it.
#[must_use]
pub fn access_token_subject(access_token: &str) -> Option<String> {
    let mut segments = access_token.trim().split('.');
    let (_header, claims) = (segments.next()?, segments.next()?);
    segments.next()?;
    let bytes = URL_SAFE_NO_PAD.decode(claims.trim_end_matches('=')).ok()?;
    let claims = serde_json::from_slice::<AccessTokenClaims>(&bytes).ok()?;
    claims
        .sub
        .map(|sub| sub.trim().to_string())
        .filter(|sub| !sub.is_empty())
}

pub fn resolve_control_base_url() -> Result<(String, &'static str), AuthInputError> {
    if let Some(base_url) = env_non_empty(ENV_CONTROL_BASE_URL) {
        return normalize_base_url(&base_url).map(|normalized| (normalized, ENV_CONTROL_BASE_URL));
    }
    if let Some(base_url) = env_non_empty(ENV_CONTROL_BASE_URL_LEGACY) {
        return normalize_base_url(&base_url)
            .map(|normalized| (normalized, ENV_CONTROL_BASE_URL_LEGACY));
    }
    normalize_base_url(DEFAULT_CONTROL_BASE_URL).map(|normalized| (normalized, "default_local"))
}

pub fn normalize_base_url(raw: &str) -> Result<String, AuthInputError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AuthInputError::EmptyBaseUrl);
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(AuthInputError::InvalidBaseUrl);
    }
    let Some((_, remainder)) = trimmed.split_once("://") else {
        return Err(AuthInputError::InvalidBaseUrl);
    };
    if remainder.trim().is_empty() || remainder.starts_with('/') {
        return Err(AuthInputError::InvalidBaseUrl);
    }
    Ok(trimmed.to_string())
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
}

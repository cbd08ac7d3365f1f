use std::sync::RwLock;
use std::time::Duration;

use chatdesk_client_core::{BearerToken, NativeSession};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::form_urlencoded;
use uuid::Uuid;

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 2;
pub const CALLBACK_LINK_PARAM: &str = "v";

const MIN_TIMEOUT_MS: u64 = 250;

/// Paths of the backend routes this client talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEndpoints {
    pub authorization_init: String,
    pub authorization_callback: String,
    pub session_bridge: String,
    pub workspaces: String,
    pub profiles: String,
}

impl Default for ControlEndpoints {
    fn default() -> Self {
        Self {
            authorization_init: "/auth/external/init".to_string(),
            authorization_callback: "/auth/external/callback".to_string(),
            session_bridge: "/auth/bridge".to_string(),
            workspaces: "/workspaces".to_string(),
            profiles: "/profiles".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    /// Applies to read-only GET probes. Code exchange and bridging are sent once.
    pub request_attempts: usize,
    pub endpoints: ControlEndpoints,
}

impl ControlClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
            endpoints: ControlEndpoints::default(),
        }
    }
}

/// HTTP client for the auth bridge and the workspace/profile data routes.
///
/// Also holds the installed native session; data queries carry its access
/// token as a bearer credential.
#[derive(Debug)]
pub struct ControlClient {
    base_url: String,
    timeout: Duration,
    request_attempts: usize,
    endpoints: ControlEndpoints,
    session: RwLock<Option<NativeSession>>,
    http: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum ControlClientError {
    #[error("control_client_base_url_missing")]
    BaseUrlMissing,
    #[error("control_client_invalid_path")]
    InvalidPath,
    #[error("control_request_failed:{message}")]
    Request { message: String },
    #[error("control_read_failed:{message}")]
    Read { message: String },
    #[error("control_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("control_json_decode_failed:{message}")]
    Decode { message: String },
}

impl ControlClientError {
    /// HTTP status for `Http` errors.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizationInitResponse {
    #[serde(
        default,
        rename = "authorizationUrl",
        alias = "authUrl",
        alias = "authorization_url"
    )]
    pub authorization_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodeExchangeResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionBridgeRequest<'a> {
    #[serde(rename = "bearerToken")]
    pub bearer_token: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionBridgeResponse {
    #[serde(default)]
    pub session: Option<BridgedSession>,
    #[serde(default)]
    pub user: Option<BridgedUser>,
}

#[derive(Clone, Default, Deserialize)]
pub struct BridgedSession {
    #[serde(default, rename = "accessToken", alias = "access_token")]
    pub access_token: Option<String>,
    #[serde(default, rename = "refreshToken", alias = "refresh_token")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<BridgedUser>,
}

impl std::fmt::Debug for BridgedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgedSession")
            .field("access_token_present", &self.access_token.is_some())
            .field("refresh_token_present", &self.refresh_token.is_some())
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgedUser {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    #[serde(rename = "userId", alias = "user_id")]
    pub user_id: String,
    #[serde(default, rename = "isHome", alias = "is_home")]
    pub is_home: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(rename = "userId", alias = "user_id")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, rename = "hasOnboarded", alias = "has_onboarded")]
    pub has_onboarded: bool,
}

impl ControlClient {
    pub fn new(config: ControlClientConfig) -> Result<Self, ControlClientError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            timeout: Duration::from_millis(config.timeout_ms.max(MIN_TIMEOUT_MS)),
            request_attempts: config.request_attempts.max(1),
            endpoints: config.endpoints,
            session: RwLock::new(None),
            http: reqwest::Client::new(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    #[must_use]
    pub fn authorization_init_path(&self, return_to: &str) -> String {
        with_query(
            &self.endpoints.authorization_init,
            &[("redirect_uri", return_to.trim())],
        )
    }

    #[must_use]
    pub fn authorization_callback_path(&self, code: &str, link_param: Option<&str>) -> String {
        let mut pairs = vec![("code", code.trim())];
        if let Some(link_param) = link_param.map(str::trim).filter(|value| !value.is_empty()) {
            pairs.push((CALLBACK_LINK_PARAM, link_param));
        }
        with_query(&self.endpoints.authorization_callback, &pairs)
    }

    #[must_use]
    pub fn home_workspace_path(&self, user_id: &str) -> String {
        with_query(
            &self.endpoints.workspaces,
            &[("userId", user_id.trim()), ("isHome", "true")],
        )
    }

    #[must_use]
    pub fn workspaces_path(&self, user_id: &str) -> String {
        with_query(&self.endpoints.workspaces, &[("userId", user_id.trim())])
    }

    #[must_use]
    pub fn profile_path(&self, user_id: &str) -> String {
        with_query(&self.endpoints.profiles, &[("userId", user_id.trim())])
    }

    /// Replaces whatever session was installed before.
    pub fn install_session(&self, session: NativeSession) {
        let mut slot = self
            .session
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = Some(session);
    }

    #[must_use]
    pub fn current_session(&self) -> Option<NativeSession> {
        self.session
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn clear_session(&self) {
        let mut slot = self
            .session
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = None;
    }

    pub async fn init_authorization(
        &self,
        return_to: &str,
    ) -> Result<AuthorizationInitResponse, ControlClientError> {
        self.get_json(self.authorization_init_path(return_to).as_str())
            .await
    }

    /// Sent exactly once: authorization codes are single use.
    pub async fn exchange_code(
        &self,
        code: &str,
        link_param: Option<&str>,
    ) -> Result<CodeExchangeResponse, ControlClientError> {
        let path = self.authorization_callback_path(code, link_param);
        let response = self.send_once(self.http.get(self.require_endpoint(&path)?)).await?;
        decode_json_response(response).await
    }

    /// Sent exactly once; the backend may create the account on this call.
    pub async fn bridge_session(
        &self,
        token: &BearerToken,
    ) -> Result<SessionBridgeResponse, ControlClientError> {
        let url = self.require_endpoint(&self.endpoints.session_bridge)?;
        let request = self.http.post(url).json(&SessionBridgeRequest {
            bearer_token: token.as_str(),
        });
        let response = self.send_once(request).await?;
        decode_json_response(response).await
    }

    pub async fn home_workspace(
        &self,
        user_id: &str,
    ) -> Result<Option<Workspace>, ControlClientError> {
        let value = self
            .get_optional_json::<serde_json::Value>(self.home_workspace_path(user_id).as_str())
            .await?;
        let workspace = value.map(decode_zero_or_one::<Workspace>).transpose()?;
        Ok(workspace.flatten().filter(|workspace| workspace.is_home))
    }

    pub async fn workspaces(&self, user_id: &str) -> Result<Vec<Workspace>, ControlClientError> {
        let value = self
            .get_optional_json::<serde_json::Value>(self.workspaces_path(user_id).as_str())
            .await?;
        value.map_or_else(|| Ok(Vec::new()), decode_many)
    }

    pub async fn profile(&self, user_id: &str) -> Result<Option<Profile>, ControlClientError> {
        let value = self
            .get_optional_json::<serde_json::Value>(self.profile_path(user_id).as_str())
            .await?;
        Ok(value.map(decode_zero_or_one::<Profile>).transpose()?.flatten())
    }

    pub async fn get_json<T>(&self, path: &str) -> Result<T, ControlClientError>
    where
        T: DeserializeOwned,
    {
        let response = self.send_get(path).await?;
        decode_json_response(response).await
    }

    pub async fn get_optional_json<T>(&self, path: &str) -> Result<Option<T>, ControlClientError>
    where
        T: DeserializeOwned,
    {
        let response = self.send_get(path).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode_json_response(response).await.map(Some)
    }

    fn require_endpoint(&self, path: &str) -> Result<String, ControlClientError> {
        self.endpoint(path).ok_or(ControlClientError::InvalidPath)
    }

    fn decorate(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request
            .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
            .timeout(self.timeout);
        match self.current_session() {
            Some(session) => request.bearer_auth(session.access_token),
            None => request,
        }
    }

    async fn send_once(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ControlClientError> {
        self.decorate(request)
            .send()
            .await
            .map_err(|error| ControlClientError::Request {
                message: error.to_string(),
            })
    }

    async fn send_get(&self, path: &str) -> Result<reqwest::Response, ControlClientError> {
        let url = self.require_endpoint(path)?;
        let mut last_error: Option<String> = None;

        for attempt in 0..self.request_attempts {
            let request = self.decorate(self.http.get(url.as_str()));

            match request.send().await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    tracing::debug!(
                        target: "chatdesk.control",
                        attempt = attempt + 1,
                        error = %error,
                        "control GET attempt failed",
                    );
                    last_error = Some(error.to_string());
                    if attempt + 1 >= self.request_attempts {
                        break;
                    }
                }
            }
        }

        Err(ControlClientError::Request {
            message: last_error.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> ControlClientError {
    let body = non_empty_string(String::from_utf8_lossy(body).to_string())
        .unwrap_or_else(|| "<empty>".to_string());
    ControlClientError::Http { status, body }
}

/// Accepts `null`, an object, or an array and yields at most one record.
pub fn decode_zero_or_one<T>(value: serde_json::Value) -> Result<Option<T>, ControlClientError>
where
    T: DeserializeOwned,
{
    let value = match value {
        serde_json::Value::Null => return Ok(None),
        serde_json::Value::Array(items) => match items.into_iter().next() {
            Some(first) => first,
            None => return Ok(None),
        },
        other => other,
    };
    serde_json::from_value(value)
        .map(Some)
        .map_err(|error| ControlClientError::Decode {
            message: error.to_string(),
        })
}

fn decode_many<T>(value: serde_json::Value) -> Result<Vec<T>, ControlClientError>
where
    T: DeserializeOwned,
{
    let decoded = match value {
        serde_json::Value::Null => return Ok(Vec::new()),
        serde_json::Value::Array(items) => serde_json::from_value(serde_json::Value::Array(items)),
        other => serde_json::from_value(other).map(|one| vec![one]),
    };
    decoded.map_err(|error| ControlClientError::Decode {
        message: error.to_string(),
    })
}

fn with_query(path: &str, pairs: &[(&str, &str)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    let query = serializer.finish();
    if query.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{query}")
    }
}

fn normalize_base_url(base_url: &str) -> Result<String, ControlClientError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(ControlClientError::BaseUrlMissing);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, ControlClientError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| ControlClientError::Read {
            message: error.to_string(),
        })?;

    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| ControlClientError::Decode {
        message: error.to_string(),
    })
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use chatdesk_client_core::auth::access_token_subject;
use chatdesk_client_core::{BearerToken, NativeSession};
use chatdesk_control_client::{ControlClient, SessionBridgeResponse};

use crate::error::BootstrapError;

/// Backend side of the external sign-in: authorization URL, code exchange, bridging.
#[async_trait]
pub trait IdentityBridge: Send + Sync {
    async fn authorization_url(&self, return_to: &str) -> Result<String, BootstrapError>;

    async fn exchange_code(
        &self,
        code: &str,
        link_param: Option<&str>,
    ) -> Result<BearerToken, BootstrapError>;

    async fn bridge_session(&self, token: &BearerToken) -> Result<NativeSession, BootstrapError>;
}

#[derive(Debug, Clone)]
pub struct ControlIdentityBridge {
    client: Arc<ControlClient>,
}

impl ControlIdentityBridge {
    #[must_use]
    pub fn new(client: Arc<ControlClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IdentityBridge for ControlIdentityBridge {
    async fn authorization_url(&self, return_to: &str) -> Result<String, BootstrapError> {
        let response = self
            .client
            .init_authorization(return_to)
            .await
            .map_err(|error| BootstrapError::AuthorizationInit {
                message: error.to_string(),
            })?;
        response
            .authorization_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| BootstrapError::AuthorizationInit {
                message: response
                    .error
                    .unwrap_or_else(|| "authorization url missing".to_string()),
            })
    }

    async fn exchange_code(
        &self,
        code: &str,
        link_param: Option<&str>,
    ) -> Result<BearerToken, BootstrapError> {
        let response = self
            .client
            .exchange_code(code, link_param)
            .await
            .map_err(|error| BootstrapError::Exchange {
                message: error.to_string(),
            })?;
        let token = response.token.unwrap_or_default();
        BearerToken::parse(&token).map_err(|_| BootstrapError::Exchange {
            message: response
                .error
                .unwrap_or_else(|| "callback response missing token".to_string()),
        })
    }

    async fn bridge_session(&self, token: &BearerToken) -> Result<NativeSession, BootstrapError> {
        let response =
            self.client
                .bridge_session(token)
                .await
                .map_err(|error| BootstrapError::Bridge {
                    message: error.to_string(),
                })?;
        let session = native_session_from_response(response)?;
        tracing::info!(
            target: "chatdesk.bootstrap",
            user_id = %session.user_id,
            "bridged external identity into native session",
        );
        Ok(session)
    }
}

/// Builds the native session from a bridge response.
///
/// The user id comes from `user.id`, then `session.user.id`, then the access
/// token's `sub` claim.
pub fn native_session_from_response(
    response: SessionBridgeResponse,
) -> Result<NativeSession, BootstrapError> {
    let Some(session) = response.session else {
        return Err(BootstrapError::InvalidSession {
            message: "bridge response missing session".to_string(),
        });
    };
    let access_token = non_blank(session.access_token);
    let refresh_token = non_blank(session.refresh_token);
    let (Some(access_token), Some(refresh_token)) = (access_token, refresh_token) else {
        return Err(BootstrapError::InvalidSession {
            message: "bridge response missing access or refresh token".to_string(),
        });
    };

    let user_id = response
        .user
        .map(|user| user.id)
        .and_then(|id| non_blank(Some(id)))
        .or_else(|| session.user.map(|user| user.id).and_then(|id| non_blank(Some(id))))
        .or_else(|| access_token_subject(&access_token))
        .ok_or_else(|| BootstrapError::InvalidSession {
            message: "bridge response missing user id".to_string(),
        })?;

    NativeSession::new(access_token, refresh_token, user_id).map_err(|error| {
        BootstrapError::InvalidSession {
            message: error.to_string(),
        }
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

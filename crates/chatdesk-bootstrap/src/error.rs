use chatdesk_client_core::StorageError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("bootstrap_exchange_failed:{message}")]
    Exchange { message: String },
    #[error("bootstrap_bridge_failed:{message}")]
    Bridge { message: String },
    #[error("bootstrap_invalid_session:{message}")]
    InvalidSession { message: String },
    #[error("bootstrap_no_profile:{user_id}")]
    NoProfile { user_id: String },
    #[error("bootstrap_workspace_timeout:{user_id}:{attempts}")]
    WorkspaceTimeout { user_id: String, attempts: u32 },
    #[error("bootstrap_authorization_init_failed:{message}")]
    AuthorizationInit { message: String },
    #[error("bootstrap_profile_load_failed:{message}")]
    Profile { message: String },
    #[error("bootstrap_storage_failed:{0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapErrorKind {
    Exchange,
    Bridge,
    InvalidSession,
    NoProfile,
    WorkspaceTimeout,
    AuthorizationInit,
    Profile,
    Storage,
}

impl BootstrapErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exchange => "exchange",
            Self::Bridge => "bridge",
            Self::InvalidSession => "invalid_session",
            Self::NoProfile => "no_profile",
            Self::WorkspaceTimeout => "workspace_timeout",
            Self::AuthorizationInit => "authorization_init",
            Self::Profile => "profile",
            Self::Storage => "storage",
        }
    }

    /// Fatal kinds halt the bootstrap cycle until it is explicitly reset.
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::NoProfile | Self::WorkspaceTimeout)
    }

    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::Exchange | Self::AuthorizationInit => "Sign-in failed",
            Self::Bridge | Self::InvalidSession | Self::Storage => "Authentication error",
            Self::NoProfile | Self::Profile => "Profile unavailable",
            Self::WorkspaceTimeout => "Workspace creation failed",
        }
    }

    #[must_use]
    pub fn user_message(self) -> &'static str {
        match self {
            Self::Exchange => "We couldn't complete sign-in with your identity provider. Please try again.",
            Self::AuthorizationInit => "We couldn't start sign-in right now. Please try again in a moment.",
            Self::Bridge => "We couldn't verify your sign-in. Please sign in again.",
            Self::InvalidSession => "Your sign-in response was incomplete. Please sign in again.",
            Self::Storage => "We couldn't save your sign-in on this device. Please sign in again.",
            Self::NoProfile => "Your account profile could not be found. Please contact support.",
            Self::Profile => "We couldn't load your profile. Please sign in again.",
            Self::WorkspaceTimeout => "We couldn't set up your workspace. Please try signing in again.",
        }
    }
}

impl BootstrapError {
    #[must_use]
    pub fn kind(&self) -> BootstrapErrorKind {
        match self {
            Self::Exchange { .. } => BootstrapErrorKind::Exchange,
            Self::Bridge { .. } => BootstrapErrorKind::Bridge,
            Self::InvalidSession { .. } => BootstrapErrorKind::InvalidSession,
            Self::NoProfile { .. } => BootstrapErrorKind::NoProfile,
            Self::WorkspaceTimeout { .. } => BootstrapErrorKind::WorkspaceTimeout,
            Self::AuthorizationInit { .. } => BootstrapErrorKind::AuthorizationInit,
            Self::Profile { .. } => BootstrapErrorKind::Profile,
            Self::Storage(_) => BootstrapErrorKind::Storage,
        }
    }

    /// Toast text for the failure category; never includes internal detail.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_messages_never_echo_internal_detail() {
        let errors = [
            BootstrapError::Exchange {
                message: "control_http_400 Bad Request:invalid_grant".to_string(),
            },
            BootstrapError::Bridge {
                message: "control_http_500 Internal Server Error:<empty>".to_string(),
            },
            BootstrapError::WorkspaceTimeout {
                user_id: "user-1".to_string(),
                attempts: 5,
            },
            BootstrapError::Storage(StorageError::Poisoned),
        ];
        for error in errors {
            let message = error.user_message();
            assert!(!message.contains("control_"), "{message}");
            assert!(!message.contains("user-1"), "{message}");
            assert!(!message.is_empty());
        }
    }

    #[test]
    fn only_provisioning_defects_are_fatal() {
        assert!(BootstrapErrorKind::NoProfile.is_fatal());
        assert!(BootstrapErrorKind::WorkspaceTimeout.is_fatal());
        assert!(!BootstrapErrorKind::Bridge.is_fatal());
        assert!(!BootstrapErrorKind::Exchange.is_fatal());
    }

    #[test]
    fn kind_serializes_as_snake_case() {
        let encoded = serde_json::to_string(&BootstrapErrorKind::WorkspaceTimeout).expect("json");
        assert_eq!(encoded, "\"workspace_timeout\"");
        assert_eq!(
            BootstrapError::NoProfile {
                user_id: "u-1".to_string()
            }
            .to_string(),
            "bootstrap_no_profile:u-1"
        );
    }
}

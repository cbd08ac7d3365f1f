//! Seams between the bootstrap state machine and its host.

use std::time::Duration;

use async_trait::async_trait;
use chatdesk_client_core::NativeSession;
use chatdesk_control_client::{ControlClient, ControlClientError, Profile, Workspace};
use serde::Serialize;
use tokio::sync::RwLock;

/// The client's auth subsystem. At most one native session is installed.
#[async_trait]
pub trait AuthSubsystem: Send + Sync {
    /// Supersedes any previously installed session.
    async fn install_session(&self, session: NativeSession);
    async fn current_session(&self) -> Option<NativeSession>;
    async fn clear_session(&self);
}

#[derive(Debug, Default)]
pub struct InMemoryAuthSubsystem {
    session: RwLock<Option<NativeSession>>,
}

impl InMemoryAuthSubsystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_session(session: NativeSession) -> Self {
        Self {
            session: RwLock::new(Some(session)),
        }
    }
}

#[async_trait]
impl AuthSubsystem for InMemoryAuthSubsystem {
    async fn install_session(&self, session: NativeSession) {
        *self.session.write().await = Some(session);
    }

    async fn current_session(&self) -> Option<NativeSession> {
        self.session.read().await.clone()
    }

    async fn clear_session(&self) {
        *self.session.write().await = None;
    }
}

#[async_trait]
impl AuthSubsystem for ControlClient {
    async fn install_session(&self, session: NativeSession) {
        ControlClient::install_session(self, session);
    }

    async fn current_session(&self) -> Option<NativeSession> {
        ControlClient::current_session(self)
    }

    async fn clear_session(&self) {
        ControlClient::clear_session(self);
    }
}

/// Read-only lookups against the user's data.
#[async_trait]
pub trait WorkspaceDirectory: Send + Sync {
    async fn home_workspace(&self, user_id: &str) -> Result<Option<Workspace>, ControlClientError>;
    async fn workspaces(&self, user_id: &str) -> Result<Vec<Workspace>, ControlClientError>;
    async fn profile(&self, user_id: &str) -> Result<Option<Profile>, ControlClientError>;
}

#[async_trait]
impl WorkspaceDirectory for ControlClient {
    async fn home_workspace(&self, user_id: &str) -> Result<Option<Workspace>, ControlClientError> {
        ControlClient::home_workspace(self, user_id).await
    }

    async fn workspaces(&self, user_id: &str) -> Result<Vec<Workspace>, ControlClientError> {
        ControlClient::workspaces(self, user_id).await
    }

    async fn profile(&self, user_id: &str) -> Result<Option<Profile>, ControlClientError> {
        ControlClient::profile(self, user_id).await
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);

    /// Lets other ready tasks run once; used after writing shared state.
    async fn settle(&self) {
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A user-facing toast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

impl Notice {
    #[must_use]
    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            message: message.into(),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info => tracing::info!(
                target: "chatdesk.bootstrap",
                title = %notice.title,
                message = %notice.message,
                "notice",
            ),
            NoticeLevel::Error => tracing::warn!(
                target: "chatdesk.bootstrap",
                title = %notice.title,
                message = %notice.message,
                "notice",
            ),
        }
    }
}

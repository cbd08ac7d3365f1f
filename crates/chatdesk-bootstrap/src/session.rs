use std::sync::Arc;

use chatdesk_client_core::NativeSession;
use chatdesk_control_client::Profile;

use crate::error::BootstrapError;
use crate::platform::{AuthSubsystem, WorkspaceDirectory};
use crate::state::SharedState;

/// Installs a native session and loads the profile it belongs to.
#[derive(Clone)]
pub struct SessionRestorer {
    auth: Arc<dyn AuthSubsystem>,
    directory: Arc<dyn WorkspaceDirectory>,
    state: SharedState,
}

impl SessionRestorer {
    #[must_use]
    pub fn new(
        auth: Arc<dyn AuthSubsystem>,
        directory: Arc<dyn WorkspaceDirectory>,
        state: SharedState,
    ) -> Self {
        Self {
            auth,
            directory,
            state,
        }
    }

    pub async fn restore(&self, session: NativeSession) -> Result<Profile, BootstrapError> {
        let user_id = session.user_id.clone();
        self.auth.install_session(session).await;
        tracing::debug!(
            target: "chatdesk.bootstrap",
            user_id = %user_id,
            "installed native session",
        );
        self.load_profile(&user_id).await
    }

    /// A missing profile is `NoProfile`; transport failures are `Profile`.
    pub async fn load_profile(&self, user_id: &str) -> Result<Profile, BootstrapError> {
        let profile = self
            .directory
            .profile(user_id)
            .await
            .map_err(|error| BootstrapError::Profile {
                message: error.to_string(),
            })?
            .ok_or_else(|| BootstrapError::NoProfile {
                user_id: user_id.to_string(),
            })?;
        self.state.set_profile(profile.clone());
        Ok(profile)
    }
}

use std::sync::Arc;
use std::time::Duration;

use chatdesk_control_client::Workspace;

use crate::platform::{Sleeper, WorkspaceDirectory};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1_000);

/// Waits out server-side provisioning of the user's home workspace.
///
/// Bounded: after `max_attempts` misses the caller gets `None` and must treat it
/// as fatal. A transport error on one probe counts as a miss.
#[derive(Clone)]
pub struct WorkspaceBootstrapPoller {
    directory: Arc<dyn WorkspaceDirectory>,
    sleeper: Arc<dyn Sleeper>,
    max_attempts: u32,
    interval: Duration,
}

impl WorkspaceBootstrapPoller {
    #[must_use]
    pub fn new(directory: Arc<dyn WorkspaceDirectory>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            directory,
            sleeper,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, max_attempts: u32, interval: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn wait_for_home_workspace(&self, user_id: &str) -> Option<Workspace> {
        for attempt in 1..=self.max_attempts {
            match self.directory.home_workspace(user_id).await {
                Ok(Some(workspace)) => {
                    tracing::info!(
                        target: "chatdesk.bootstrap",
                        user_id = %user_id,
                        workspace_id = %workspace.id,
                        attempt,
                        "home workspace found",
                    );
                    return Some(workspace);
                }
                Ok(None) => {
                    tracing::debug!(
                        target: "chatdesk.bootstrap",
                        user_id = %user_id,
                        attempt,
                        "home workspace not provisioned yet",
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        target: "chatdesk.bootstrap",
                        user_id = %user_id,
                        attempt,
                        error = %error,
                        "home workspace probe failed",
                    );
                }
            }
            if attempt < self.max_attempts {
                self.sleeper.sleep(self.interval).await;
            }
        }

        tracing::warn!(
            target: "chatdesk.bootstrap",
            user_id = %user_id,
            attempts = self.max_attempts,
            "home workspace never appeared",
        );
        None
    }
}

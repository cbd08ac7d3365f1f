use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chatdesk_control_client::{ControlClientError, Profile, Workspace};

use crate::platform::{Sleeper, WorkspaceDirectory};

pub fn workspace(id: &str, user_id: &str, is_home: bool) -> Workspace {
    Workspace {
        id: id.to_string(),
        user_id: user_id.to_string(),
        is_home,
        name: None,
    }
}

/// Home workspace shows up on a chosen probe; profiles exist for chosen users.
#[derive(Debug, Default)]
pub struct FakeDirectory {
    home_on_attempt: Option<u32>,
    failing_attempts: BTreeSet<u32>,
    profiles: BTreeSet<String>,
    extra_workspaces: Vec<Workspace>,
    home_calls: AtomicU32,
    profile_calls: AtomicU32,
    fail_profiles: AtomicBool,
    fail_workspaces: AtomicBool,
}

impl FakeDirectory {
    pub fn with_home_on_attempt(mut self, attempt: u32) -> Self {
        self.home_on_attempt = Some(attempt);
        self
    }

    pub fn with_failing_attempt(mut self, attempt: u32) -> Self {
        self.failing_attempts.insert(attempt);
        self
    }

    pub fn with_profile(mut self, user_id: &str) -> Self {
        self.profiles.insert(user_id.to_string());
        self
    }

    pub fn with_extra_workspace(mut self, workspace: Workspace) -> Self {
        self.extra_workspaces.push(workspace);
        self
    }

    pub fn fail_profiles(&self) {
        self.fail_profiles.store(true, Ordering::SeqCst);
    }

    pub fn fail_workspaces(&self) {
        self.fail_workspaces.store(true, Ordering::SeqCst);
    }

    pub fn home_calls(&self) -> u32 {
        self.home_calls.load(Ordering::SeqCst)
    }

    pub fn profile_calls(&self) -> u32 {
        self.profile_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkspaceDirectory for FakeDirectory {
    async fn home_workspace(&self, user_id: &str) -> Result<Option<Workspace>, ControlClientError> {
        let attempt = self.home_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_attempts.contains(&attempt) {
            return Err(ControlClientError::Request {
                message: "connection reset".to_string(),
            });
        }
        Ok(self
            .home_on_attempt
            .filter(|ready| attempt >= *ready)
            .map(|_| workspace("ws-1", user_id, true)))
    }

    async fn workspaces(&self, user_id: &str) -> Result<Vec<Workspace>, ControlClientError> {
        if self.fail_workspaces.load(Ordering::SeqCst) {
            return Err(ControlClientError::Request {
                message: "connection reset".to_string(),
            });
        }
        let mut list = vec![workspace("ws-1", user_id, true)];
        list.extend(self.extra_workspaces.iter().cloned());
        Ok(list)
    }

    async fn profile(&self, user_id: &str) -> Result<Option<Profile>, ControlClientError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_profiles.load(Ordering::SeqCst) {
            return Err(ControlClientError::Request {
                message: "connection reset".to_string(),
            });
        }
        Ok(self.profiles.contains(user_id).then(|| Profile {
            id: format!("profile-{user_id}"),
            user_id: user_id.to_string(),
            username: None,
            has_onboarded: true,
        }))
    }
}

/// Records requested sleeps instead of waiting.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
    settles: AtomicU32,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .map(|sleeps| sleeps.clone())
            .unwrap_or_default()
    }

    pub fn settles(&self) -> u32 {
        self.settles.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        tokio::task::yield_now().await;
    }

    async fn settle(&self) {
        self.settles.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }
}

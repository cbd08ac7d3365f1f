use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chatdesk_client_core::DeferredSettings;
use chatdesk_control_client::{Profile, Workspace};
use serde::Serialize;

use crate::error::BootstrapErrorKind;

pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o";
pub const DEFAULT_CHAT_PROMPT: &str = "You are a helpful AI assistant.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatSettings {
    pub model: String,
    pub prompt: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_CHAT_MODEL.to_string(),
            prompt: DEFAULT_CHAT_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthErrorNotice {
    pub kind: BootstrapErrorKind,
    pub message: String,
}

#[derive(Debug, Default)]
struct StateInner {
    profile: Option<Profile>,
    workspaces: Vec<Workspace>,
    selected_workspace: Option<Workspace>,
    chat_settings: ChatSettings,
    auth_error: Option<AuthErrorNotice>,
}

/// Process-wide user/workspace state read by the rest of the app.
///
/// Only the bootstrap components write it. Locks are never held across an await.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<StateInner>>,
}

impl SharedState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&StateInner) -> T) -> T {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut StateInner) -> T) -> T {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    #[must_use]
    pub fn profile(&self) -> Option<Profile> {
        self.read(|state| state.profile.clone())
    }

    pub fn set_profile(&self, profile: Profile) {
        self.write(|state| state.profile = Some(profile));
    }

    #[must_use]
    pub fn workspaces(&self) -> Vec<Workspace> {
        self.read(|state| state.workspaces.clone())
    }

    pub fn set_workspaces(&self, workspaces: Vec<Workspace>) {
        self.write(|state| state.workspaces = workspaces);
    }

    #[must_use]
    pub fn selected_workspace(&self) -> Option<Workspace> {
        self.read(|state| state.selected_workspace.clone())
    }

    pub fn select_workspace(&self, workspace: Workspace) {
        self.write(|state| state.selected_workspace = Some(workspace));
    }

    #[must_use]
    pub fn chat_settings(&self) -> ChatSettings {
        self.read(|state| state.chat_settings.clone())
    }

    /// Overlays whatever the link carried onto the current chat settings.
    pub fn apply_deferred_settings(&self, settings: &DeferredSettings) {
        self.write(|state| {
            if let Some(model) = &settings.model {
                state.chat_settings.model.clone_from(model);
            }
            if let Some(prompt) = &settings.prompt {
                state.chat_settings.prompt.clone_from(prompt);
            }
        });
    }

    #[must_use]
    pub fn auth_error(&self) -> Option<AuthErrorNotice> {
        self.read(|state| state.auth_error.clone())
    }

    pub fn set_auth_error(&self, kind: BootstrapErrorKind, message: impl Into<String>) {
        let notice = AuthErrorNotice {
            kind,
            message: message.into(),
        };
        self.write(|state| state.auth_error = Some(notice));
    }

    pub fn clear_auth_error(&self) {
        self.write(|state| state.auth_error = None);
    }

    /// Drops everything tied to the signed-in user; chat settings survive.
    pub fn clear_user_data(&self) {
        self.write(|state| {
            state.profile = None;
            state.workspaces.clear();
            state.selected_workspace = None;
        });
    }
}

/// In-memory guards for one bootstrap cycle. Never persisted.
#[derive(Debug, Default)]
pub struct BootstrapFlags {
    in_flight: AtomicBool,
    authenticated: AtomicBool,
    redirecting: AtomicBool,
    halted: AtomicBool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlagsSnapshot {
    pub is_authenticated: bool,
    pub is_redirecting: bool,
    pub is_halted: bool,
    pub auth_error: Option<AuthErrorNotice>,
}

/// Clears the in-flight flag when dropped.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    flags: &'a BootstrapFlags,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flags.in_flight.store(false, Ordering::Release);
    }
}

impl BootstrapFlags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the handler; `None` while another invocation holds it.
    pub fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard { flags: self })
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claims the single navigation of this cycle.
    pub fn try_begin_redirect(&self) -> bool {
        self.redirecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[must_use]
    pub fn is_redirecting(&self) -> bool {
        self.redirecting.load(Ordering::Acquire)
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::Release);
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Back to a fresh cycle. The in-flight claim is left to its guard.
    pub fn reset(&self) {
        self.authenticated.store(false, Ordering::Release);
        self.redirecting.store(false, Ordering::Release);
        self.halted.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn snapshot(&self, auth_error: Option<AuthErrorNotice>) -> FlagsSnapshot {
        FlagsSnapshot {
            is_authenticated: self.is_authenticated(),
            is_redirecting: self.is_redirecting(),
            is_halted: self.is_halted(),
            auth_error,
        }
    }
}

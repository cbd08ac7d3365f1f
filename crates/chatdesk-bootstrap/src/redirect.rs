use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chatdesk_client_core::{ClientStore, DeferredSettings, Page, StorageError, StorageKey};
use chatdesk_control_client::Workspace;
use url::form_urlencoded;

use crate::config::RefreshStrategy;
use crate::platform::Sleeper;
use crate::state::{BootstrapFlags, SharedState};

const REFRESH_MARKER_VALUE: &str = "true";

/// Runs once after the chat navigation, in process.
pub trait PostNavigationHook: Send + Sync {
    fn after_navigation(&self, page: &dyn Page);
}

/// Reloads the page the first time it runs.
#[derive(Debug, Default)]
pub struct ReloadOnceHook {
    fired: AtomicBool,
}

impl ReloadOnceHook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl PostNavigationHook for ReloadOnceHook {
    fn after_navigation(&self, page: &dyn Page) {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            page.reload();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectOutcome {
    Navigated { workspace_id: String, path: String },
    /// Another invocation already owns this cycle's navigation.
    AlreadyRedirecting,
}

/// Performs the single terminal navigation into a workspace.
#[derive(Clone)]
pub struct RedirectCoordinator {
    page: Arc<dyn Page>,
    store: Arc<dyn ClientStore>,
    state: SharedState,
    sleeper: Arc<dyn Sleeper>,
    flags: Arc<BootstrapFlags>,
    refresh: RefreshStrategy,
    hook: Arc<dyn PostNavigationHook>,
}

impl RedirectCoordinator {
    #[must_use]
    pub fn new(
        page: Arc<dyn Page>,
        store: Arc<dyn ClientStore>,
        state: SharedState,
        sleeper: Arc<dyn Sleeper>,
        flags: Arc<BootstrapFlags>,
        refresh: RefreshStrategy,
    ) -> Self {
        Self {
            page,
            store,
            state,
            sleeper,
            flags,
            refresh,
            hook: Arc::new(ReloadOnceHook::new()),
        }
    }

    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn PostNavigationHook>) -> Self {
        self.hook = hook;
        self
    }

    /// `/{workspace}/chat`, plus `defaultModel` / `defaultPrompt` when the link carried them.
    #[must_use]
    pub fn chat_path(workspace_id: &str, settings: &DeferredSettings) -> String {
        let path = format!("/{}/chat", workspace_id.trim());
        let params = settings.redirect_params();
        if params.is_empty() {
            return path;
        }
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &params {
            serializer.append_pair(key, value);
        }
        format!("{path}?{}", serializer.finish())
    }

    pub async fn redirect(&self, target: Workspace, settings: &DeferredSettings) -> RedirectOutcome {
        if !self.flags.try_begin_redirect() {
            return RedirectOutcome::AlreadyRedirecting;
        }

        if self.state.selected_workspace().as_ref() != Some(&target) {
            self.state.select_workspace(target.clone());
        }
        self.sleeper.settle().await;
        let workspace = match self.state.selected_workspace() {
            Some(observed) if observed == target => observed,
            observed => {
                tracing::warn!(
                    target: "chatdesk.bootstrap",
                    expected = %target.id,
                    observed = ?observed.as_ref().map(|workspace| workspace.id.as_str()),
                    "selected workspace read-back mismatch; rewriting",
                );
                self.state.select_workspace(target.clone());
                target
            }
        };

        if !settings.is_empty() {
            self.state.apply_deferred_settings(settings);
        }

        let path = Self::chat_path(&workspace.id, settings);
        tracing::info!(
            target: "chatdesk.bootstrap",
            workspace_id = %workspace.id,
            refresh = self.refresh.as_str(),
            "navigating to workspace chat",
        );
        self.page.navigate(&path);

        match self.refresh {
            RefreshStrategy::None => {}
            RefreshStrategy::Hook => self.hook.after_navigation(self.page.as_ref()),
            RefreshStrategy::PersistedMarker => {
                if let Err(error) = self
                    .store
                    .set(StorageKey::NeedsSecondRefresh, REFRESH_MARKER_VALUE)
                {
                    tracing::warn!(
                        target: "chatdesk.bootstrap",
                        error = %error,
                        "failed to persist second refresh marker",
                    );
                }
            }
        }

        RedirectOutcome::Navigated {
            workspace_id: workspace.id,
            path,
        }
    }
}

/// Consumes the one-shot refresh marker left by a previous navigation.
///
/// Returns `true` when the marker was present and the page was reloaded.
pub fn consume_refresh_marker(
    store: &dyn ClientStore,
    page: &dyn Page,
) -> Result<bool, StorageError> {
    if store.take(StorageKey::NeedsSecondRefresh)?.is_none() {
        return Ok(false);
    }
    tracing::debug!(target: "chatdesk.bootstrap", "consuming second refresh marker");
    page.reload();
    Ok(true)
}

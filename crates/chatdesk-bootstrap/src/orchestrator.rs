use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chatdesk_client_core::{
    BearerToken, ClientStore, NativeSession, Page, PageLocation, StorageError, StorageKey,
    TokenSourceResolver, decode_deferred_settings,
};
use chatdesk_control_client::{ControlClient, Workspace};
use serde::Serialize;

use crate::bridge::{ControlIdentityBridge, IdentityBridge};
use crate::config::{BootstrapConfig, RefreshStrategy};
use crate::error::{BootstrapError, BootstrapErrorKind};
use crate::platform::{
    AuthSubsystem, Notice, Notifier, Sleeper, TokioSleeper, TracingNotifier, WorkspaceDirectory,
};
use crate::poller::WorkspaceBootstrapPoller;
use crate::redirect::{
    PostNavigationHook, RedirectCoordinator, RedirectOutcome, consume_refresh_marker,
};
use crate::session::SessionRestorer;
use crate::state::{BootstrapFlags, FlagsSnapshot, SharedState};

const CODE_QUERY_PARAM: &str = "code";

/// Events that re-run the bootstrap handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Mount,
    UrlChanged,
    StorageChanged {
        key: String,
        new_value: Option<String>,
    },
    PollTick,
}

impl Trigger {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mount => "mount",
            Self::UrlChanged => "url_changed",
            Self::StorageChanged { .. } => "storage_changed",
            Self::PollTick => "poll_tick",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapPhase {
    Idle,
    ResolvingCode,
    ResolvingToken,
    Bridging,
    Restoring,
    PollingWorkspace,
    Redirecting,
    Done,
    AwaitingExternalRedirect,
    Failed,
}

impl BootstrapPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ResolvingCode => "resolving_code",
            Self::ResolvingToken => "resolving_token",
            Self::Bridging => "bridging",
            Self::Restoring => "restoring",
            Self::PollingWorkspace => "polling_workspace",
            Self::Redirecting => "redirecting",
            Self::Done => "done",
            Self::AwaitingExternalRedirect => "awaiting_external_redirect",
            Self::Failed => "failed",
        }
    }

    /// The page is settled or leaving; nothing further runs this cycle.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::AwaitingExternalRedirect)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BootstrapOutcome {
    /// Filtered out, or the cycle already finished.
    Ignored,
    /// Another invocation holds the handler.
    Busy,
    /// A one-shot refresh marker was consumed.
    Reloaded,
    /// No credential on a public route.
    SignedOut,
    AlreadyInWorkspace,
    AwaitingExternalRedirect {
        authorization_url: String,
    },
    Redirected {
        workspace_id: String,
        path: String,
    },
    Failed {
        kind: BootstrapErrorKind,
        message: String,
    },
}

/// Everything the orchestrator talks to.
#[derive(Clone)]
pub struct BootstrapDeps {
    pub page: Arc<dyn Page>,
    pub store: Arc<dyn ClientStore>,
    pub auth: Arc<dyn AuthSubsystem>,
    pub directory: Arc<dyn WorkspaceDirectory>,
    pub bridge: Arc<dyn IdentityBridge>,
    pub sleeper: Arc<dyn Sleeper>,
    pub notifier: Arc<dyn Notifier>,
    pub state: SharedState,
}

impl BootstrapDeps {
    /// Wires the control client in as bridge, directory and auth subsystem.
    #[must_use]
    pub fn with_control_client(
        client: Arc<ControlClient>,
        page: Arc<dyn Page>,
        store: Arc<dyn ClientStore>,
    ) -> Self {
        Self {
            page,
            store,
            auth: client.clone(),
            directory: client.clone(),
            bridge: Arc::new(ControlIdentityBridge::new(client)),
            sleeper: Arc::new(TokioSleeper),
            notifier: Arc::new(TracingNotifier),
            state: SharedState::new(),
        }
    }
}

enum Interrupt {
    /// `reset_cycle` ran while this invocation was suspended.
    Superseded,
    Failed(BootstrapError),
}

impl From<BootstrapError> for Interrupt {
    fn from(error: BootstrapError) -> Self {
        Self::Failed(error)
    }
}

impl From<StorageError> for Interrupt {
    fn from(error: StorageError) -> Self {
        Self::Failed(BootstrapError::Storage(error))
    }
}

/// Reconciles URL code, stored token, live session and link settings into one
/// navigation.
///
/// `handle` may be called concurrently from independent triggers. Guards are
/// checked first and claimed before the first suspension point, so overlapping
/// calls return `Busy` or `Ignored` without side effects.
pub struct BootstrapOrchestrator {
    page: Arc<dyn Page>,
    store: Arc<dyn ClientStore>,
    auth: Arc<dyn AuthSubsystem>,
    directory: Arc<dyn WorkspaceDirectory>,
    bridge: Arc<dyn IdentityBridge>,
    notifier: Arc<dyn Notifier>,
    state: SharedState,
    flags: Arc<BootstrapFlags>,
    tokens: TokenSourceResolver,
    restorer: SessionRestorer,
    poller: WorkspaceBootstrapPoller,
    redirect: RedirectCoordinator,
    sign_in_path: String,
    link_query_param: String,
    refresh: RefreshStrategy,
    phase: Mutex<BootstrapPhase>,
    cycle: AtomicU64,
    pending_link: Mutex<Option<String>>,
    /// Token currently being bridged and restored.
    attempted_token: Mutex<Option<BearerToken>>,
    /// Tokens whose bridge or restore failed. Never bridged again automatically.
    rejected_tokens: Mutex<Vec<BearerToken>>,
}

impl BootstrapOrchestrator {
    #[must_use]
    pub fn new(config: &BootstrapConfig, deps: BootstrapDeps) -> Self {
        let flags = Arc::new(BootstrapFlags::new());
        let restorer =
            SessionRestorer::new(deps.auth.clone(), deps.directory.clone(), deps.state.clone());
        let poller = WorkspaceBootstrapPoller::new(deps.directory.clone(), deps.sleeper.clone())
            .with_policy(config.workspace_poll_attempts, config.workspace_poll_interval);
        let redirect = RedirectCoordinator::new(
            deps.page.clone(),
            deps.store.clone(),
            deps.state.clone(),
            deps.sleeper.clone(),
            flags.clone(),
            config.refresh_strategy,
        );
        Self {
            page: deps.page,
            store: deps.store,
            auth: deps.auth,
            directory: deps.directory,
            bridge: deps.bridge,
            notifier: deps.notifier,
            state: deps.state,
            flags,
            tokens: TokenSourceResolver::new(
                config.token_query_param.clone(),
                config.token_cookie_name.clone(),
            ),
            restorer,
            poller,
            redirect,
            sign_in_path: config.sign_in_path.clone(),
            link_query_param: config.link_query_param.clone(),
            refresh: config.refresh_strategy,
            phase: Mutex::new(BootstrapPhase::Idle),
            cycle: AtomicU64::new(0),
            pending_link: Mutex::new(None),
            attempted_token: Mutex::new(None),
            rejected_tokens: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_post_navigation_hook(mut self, hook: Arc<dyn PostNavigationHook>) -> Self {
        self.redirect = self.redirect.with_hook(hook);
        self
    }

    #[must_use]
    pub fn phase(&self) -> BootstrapPhase {
        *lock(&self.phase)
    }

    #[must_use]
    pub fn flags(&self) -> FlagsSnapshot {
        self.flags.snapshot(self.state.auth_error())
    }

    #[must_use]
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// True once periodic triggers can stop. A failed cycle waits for the user
    /// to re-attempt (a new code, a new token from another tab, `reset_cycle`).
    #[must_use]
    pub fn is_settled(&self) -> bool {
        let phase = self.phase();
        phase.is_terminal() || phase == BootstrapPhase::Failed || self.flags.is_halted()
    }

    /// Starts a fresh cycle. Results of invocations still in flight are dropped.
    pub fn reset_cycle(&self) {
        self.cycle.fetch_add(1, Ordering::AcqRel);
        self.flags.reset();
        *lock(&self.pending_link) = None;
        *lock(&self.attempted_token) = None;
        lock(&self.rejected_tokens).clear();
        self.set_phase(BootstrapPhase::Idle);
    }

    pub async fn handle(&self, trigger: Trigger) -> BootstrapOutcome {
        if !self.accepts(&trigger) || self.cycle_closed() {
            return BootstrapOutcome::Ignored;
        }
        let Some(_in_flight) = self.flags.try_begin() else {
            return BootstrapOutcome::Busy;
        };
        if self.cycle_closed() {
            return BootstrapOutcome::Ignored;
        }

        let cycle = self.cycle.load(Ordering::Acquire);
        tracing::debug!(
            target: "chatdesk.bootstrap",
            trigger = trigger.as_str(),
            phase = self.phase().as_str(),
            "bootstrap trigger",
        );
        match self.run(&trigger, cycle).await {
            Ok(outcome) => outcome,
            Err(Interrupt::Superseded) => {
                tracing::debug!(
                    target: "chatdesk.bootstrap",
                    trigger = trigger.as_str(),
                    "dropping result of superseded bootstrap cycle",
                );
                BootstrapOutcome::Ignored
            }
            Err(Interrupt::Failed(error)) => self.fail(&error, cycle).await,
        }
    }

    fn accepts(&self, trigger: &Trigger) -> bool {
        match trigger {
            Trigger::StorageChanged { key, new_value } => {
                StorageKey::from_storage_name(key) == Some(StorageKey::BearerToken)
                    && new_value
                        .as_deref()
                        .is_some_and(|value| !value.trim().is_empty() && !self.is_rejected(value))
            }
            Trigger::PollTick => !self.is_settled(),
            Trigger::Mount | Trigger::UrlChanged => true,
        }
    }

    fn cycle_closed(&self) -> bool {
        self.flags.is_redirecting() || self.flags.is_halted() || self.phase().is_terminal()
    }

    async fn run(&self, trigger: &Trigger, cycle: u64) -> Result<BootstrapOutcome, Interrupt> {
        if *trigger == Trigger::Mount
            && self.refresh == RefreshStrategy::PersistedMarker
            && consume_refresh_marker(self.store.as_ref(), self.page.as_ref())?
        {
            return Ok(BootstrapOutcome::Reloaded);
        }

        let location = self.page.location();
        if let Some(code) = location.query(CODE_QUERY_PARAM).map(str::to_string) {
            return self.complete_code_exchange(&code, cycle).await;
        }

        if let Some(session) = self.auth.current_session().await {
            self.ensure_current(cycle)?;
            return self.resume_session(&session, &location, cycle).await;
        }

        let previous = self.phase();
        self.set_phase(BootstrapPhase::ResolvingToken);
        match self.tokens.resolve(self.page.as_ref(), self.store.as_ref())? {
            Some(resolved) if self.is_rejected(resolved.token.as_str()) => {
                // The resolver may have copied it back from the cookie or URL.
                self.store.remove(StorageKey::BearerToken)?;
                self.set_phase(previous);
                tracing::debug!(
                    target: "chatdesk.bootstrap",
                    source = resolved.source.as_str(),
                    "skipping bearer token that already failed to bridge",
                );
                Ok(BootstrapOutcome::Ignored)
            }
            Some(resolved) => {
                tracing::debug!(
                    target: "chatdesk.bootstrap",
                    source = resolved.source.as_str(),
                    "bearer token resolved",
                );
                self.authenticate(resolved.token, cycle).await
            }
            None if location.is_protected(&self.sign_in_path) => {
                self.begin_external_authorization(&location, cycle).await
            }
            None => {
                self.set_phase(previous);
                Ok(BootstrapOutcome::SignedOut)
            }
        }
    }

    async fn complete_code_exchange(
        &self,
        code: &str,
        cycle: u64,
    ) -> Result<BootstrapOutcome, Interrupt> {
        self.set_phase(BootstrapPhase::ResolvingCode);
        let link = self.take_pending_link()?;
        let token = self.bridge.exchange_code(code, link.as_deref()).await?;
        self.ensure_current(cycle)?;

        self.store.set(StorageKey::BearerToken, token.as_str())?;
        let locale = self.store.take(StorageKey::ReturnLocale)?;
        self.page
            .replace_location(&locale.map_or_else(|| "/".to_string(), |locale| format!("/{locale}")));
        *lock(&self.pending_link) = link;

        self.authenticate(token, cycle).await
    }

    async fn resume_session(
        &self,
        session: &NativeSession,
        location: &PageLocation,
        cycle: u64,
    ) -> Result<BootstrapOutcome, Interrupt> {
        self.flags.set_authenticated(true);
        if self.state.profile().is_none() {
            self.set_phase(BootstrapPhase::Restoring);
            self.restorer.load_profile(&session.user_id).await?;
            self.ensure_current(cycle)?;
        }

        if location.is_workspace_chat() {
            self.set_phase(BootstrapPhase::Done);
            return Ok(BootstrapOutcome::AlreadyInWorkspace);
        }

        let target = self
            .state
            .selected_workspace()
            .or_else(|| self.state.workspaces().into_iter().next());
        match target {
            Some(workspace) => self.navigate_to(workspace, cycle).await,
            None => self.resolve_workspace(&session.user_id, cycle).await,
        }
    }

    async fn authenticate(
        &self,
        token: BearerToken,
        cycle: u64,
    ) -> Result<BootstrapOutcome, Interrupt> {
        self.set_phase(BootstrapPhase::Bridging);
        *lock(&self.attempted_token) = Some(token.clone());
        let session = self.bridge.bridge_session(&token).await?;
        self.ensure_current(cycle)?;

        self.set_phase(BootstrapPhase::Restoring);
        let user_id = session.user_id.clone();
        match self.restorer.restore(session).await {
            Ok(_) => {}
            Err(BootstrapError::NoProfile { .. }) => {
                tracing::debug!(
                    target: "chatdesk.bootstrap",
                    user_id = %user_id,
                    "profile missing after restore; loading directly",
                );
                self.restorer.load_profile(&user_id).await?;
            }
            Err(error) => return Err(error.into()),
        }
        self.ensure_current(cycle)?;

        self.flags.set_authenticated(true);
        self.state.clear_auth_error();
        *lock(&self.attempted_token) = None;
        lock(&self.rejected_tokens).clear();
        self.resolve_workspace(&user_id, cycle).await
    }

    async fn resolve_workspace(
        &self,
        user_id: &str,
        cycle: u64,
    ) -> Result<BootstrapOutcome, Interrupt> {
        self.set_phase(BootstrapPhase::PollingWorkspace);
        let Some(home) = self.poller.wait_for_home_workspace(user_id).await else {
            return Err(BootstrapError::WorkspaceTimeout {
                user_id: user_id.to_string(),
                attempts: self.poller.max_attempts(),
            }
            .into());
        };
        self.ensure_current(cycle)?;

        let mut workspaces = match self.directory.workspaces(user_id).await {
            Ok(workspaces) => workspaces,
            Err(error) => {
                tracing::warn!(
                    target: "chatdesk.bootstrap",
                    user_id = %user_id,
                    error = %error,
                    "workspace list unavailable; continuing with home workspace only",
                );
                Vec::new()
            }
        };
        self.ensure_current(cycle)?;
        if !workspaces.iter().any(|workspace| workspace.id == home.id) {
            workspaces.insert(0, home.clone());
        }
        self.state.set_workspaces(workspaces);
        self.state.select_workspace(home.clone());

        self.navigate_to(home, cycle).await
    }

    async fn navigate_to(
        &self,
        workspace: Workspace,
        cycle: u64,
    ) -> Result<BootstrapOutcome, Interrupt> {
        self.ensure_current(cycle)?;
        self.set_phase(BootstrapPhase::Redirecting);
        let settings = self
            .take_pending_link()?
            .map(|raw| decode_deferred_settings(&raw))
            .unwrap_or_default();

        match self.redirect.redirect(workspace, &settings).await {
            RedirectOutcome::Navigated { workspace_id, path } => {
                self.set_phase(BootstrapPhase::Done);
                Ok(BootstrapOutcome::Redirected { workspace_id, path })
            }
            RedirectOutcome::AlreadyRedirecting => Ok(BootstrapOutcome::Ignored),
        }
    }

    async fn begin_external_authorization(
        &self,
        location: &PageLocation,
        cycle: u64,
    ) -> Result<BootstrapOutcome, Interrupt> {
        if let Some(locale) = location.locale() {
            self.store.set(StorageKey::ReturnLocale, locale)?;
        }
        if let Some(link) = location.query(&self.link_query_param) {
            self.store.set(StorageKey::PendingLinkParam, link)?;
        }

        let return_to = location.origin().unwrap_or("/");
        let authorization_url = self.bridge.authorization_url(return_to).await?;
        self.ensure_current(cycle)?;

        tracing::info!(
            target: "chatdesk.bootstrap",
            "no credential on protected route; leaving for external sign-in",
        );
        self.set_phase(BootstrapPhase::AwaitingExternalRedirect);
        self.page.assign_external(&authorization_url);
        Ok(BootstrapOutcome::AwaitingExternalRedirect { authorization_url })
    }

    async fn fail(&self, error: &BootstrapError, cycle: u64) -> BootstrapOutcome {
        if !self.is_current(cycle) {
            return BootstrapOutcome::Ignored;
        }
        let attempted = lock(&self.attempted_token).take();
        if let Some(token) = attempted {
            lock(&self.rejected_tokens).push(token);
        }
        let kind = error.kind();
        tracing::warn!(
            target: "chatdesk.bootstrap",
            kind = kind.as_str(),
            error = %error,
            "bootstrap failed",
        );

        if let Err(storage_error) = self.store.remove(StorageKey::BearerToken) {
            tracing::warn!(
                target: "chatdesk.bootstrap",
                error = %storage_error,
                "failed to clear persisted bearer token",
            );
        }
        self.auth.clear_session().await;
        self.state.clear_user_data();
        self.state.set_auth_error(kind, kind.user_message());
        self.flags.set_authenticated(false);
        if kind.is_fatal() {
            self.flags.halt();
        }

        self.notifier
            .notify(Notice::error(kind.title(), kind.user_message()));
        self.set_phase(BootstrapPhase::Failed);
        self.page.navigate(&self.sign_in_target());

        BootstrapOutcome::Failed {
            kind,
            message: kind.user_message().to_string(),
        }
    }

    fn sign_in_target(&self) -> String {
        let sign_in = format!("/{}", self.sign_in_path.trim().trim_matches('/'));
        match self.page.location().locale() {
            Some(locale) => format!("/{locale}{sign_in}"),
            None => sign_in,
        }
    }

    /// Link parameter for this cycle: carried over from the code exchange, then
    /// persisted before the external round trip, then the current URL.
    fn take_pending_link(&self) -> Result<Option<String>, StorageError> {
        if let Some(link) = lock(&self.pending_link).take() {
            return Ok(Some(link));
        }
        if let Some(link) = self
            .store
            .take(StorageKey::PendingLinkParam)?
            .filter(|link| !link.trim().is_empty())
        {
            return Ok(Some(link));
        }
        Ok(self
            .page
            .location()
            .query(&self.link_query_param)
            .map(str::to_string))
    }

    fn is_rejected(&self, raw: &str) -> bool {
        lock(&self.rejected_tokens)
            .iter()
            .any(|token| token.as_str() == raw.trim())
    }

    fn is_current(&self, cycle: u64) -> bool {
        self.cycle.load(Ordering::Acquire) == cycle
    }

    fn ensure_current(&self, cycle: u64) -> Result<(), Interrupt> {
        if self.is_current(cycle) {
            Ok(())
        } else {
            Err(Interrupt::Superseded)
        }
    }

    fn set_phase(&self, next: BootstrapPhase) {
        let mut phase = lock(&self.phase);
        if *phase != next {
            tracing::debug!(
                target: "chatdesk.bootstrap",
                from = phase.as_str(),
                to = next.as_str(),
                "bootstrap phase",
            );
            *phase = next;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::InMemoryAuthSubsystem;
    use crate::testing::{FakeDirectory, RecordingSleeper, workspace};
    use async_trait::async_trait;
    use chatdesk_client_core::token_source::DEFAULT_TOKEN_COOKIE_NAME;
    use chatdesk_client_core::{
        DeferredSettings, HeadlessPage, MemoryStore, PageEvent, encode_deferred_settings,
    };
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct FakeBridge {
        exchanges: AtomicU32,
        bridges: AtomicU32,
        link_params: Mutex<Vec<Option<String>>>,
        fail_bridge: bool,
    }

    #[async_trait]
    impl IdentityBridge for FakeBridge {
        async fn authorization_url(&self, return_to: &str) -> Result<String, BootstrapError> {
            Ok(format!("https://id.example.com/authorize?return={return_to}"))
        }

        async fn exchange_code(
            &self,
            _code: &str,
            link_param: Option<&str>,
        ) -> Result<BearerToken, BootstrapError> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            lock(&self.link_params).push(link_param.map(str::to_string));
            tokio::task::yield_now().await;
            Ok(BearerToken::parse("tok1").expect("token"))
        }

        async fn bridge_session(
            &self,
            _token: &BearerToken,
        ) -> Result<NativeSession, BootstrapError> {
            self.bridges.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail_bridge {
                return Err(BootstrapError::Bridge {
                    message: "control_http_500 Internal Server Error:<empty>".to_string(),
                });
            }
            Ok(NativeSession::new("access", "refresh", "user-1").expect("session"))
        }
    }

    struct Harness {
        page: Arc<HeadlessPage>,
        store: Arc<MemoryStore>,
        auth: Arc<InMemoryAuthSubsystem>,
        directory: Arc<FakeDirectory>,
        bridge: Arc<FakeBridge>,
        orchestrator: BootstrapOrchestrator,
    }

    fn harness(url: &str, directory: FakeDirectory, bridge: FakeBridge) -> Harness {
        harness_with(url, directory, bridge, BootstrapConfig::for_tests())
    }

    fn harness_with(
        url: &str,
        directory: FakeDirectory,
        bridge: FakeBridge,
        config: BootstrapConfig,
    ) -> Harness {
        harness_on(HeadlessPage::new(url), directory, bridge, config)
    }

    fn harness_on(
        page: HeadlessPage,
        directory: FakeDirectory,
        bridge: FakeBridge,
        config: BootstrapConfig,
    ) -> Harness {
        let page = Arc::new(page);
        let store = Arc::new(MemoryStore::new());
        let auth = Arc::new(InMemoryAuthSubsystem::new());
        let directory = Arc::new(directory);
        let bridge = Arc::new(bridge);
        let orchestrator = BootstrapOrchestrator::new(
            &config,
            BootstrapDeps {
                page: page.clone(),
                store: store.clone(),
                auth: auth.clone(),
                directory: directory.clone(),
                bridge: bridge.clone(),
                sleeper: Arc::new(RecordingSleeper::default()),
                notifier: Arc::new(TracingNotifier),
                state: SharedState::new(),
            },
        );
        Harness {
            page,
            store,
            auth,
            directory,
            bridge,
            orchestrator,
        }
    }

    fn ready_directory() -> FakeDirectory {
        FakeDirectory::default()
            .with_home_on_attempt(1)
            .with_profile("user-1")
    }

    #[tokio::test]
    async fn code_in_url_runs_the_full_chain() {
        let h = harness(
            "https://chat.example.com/?code=abc123",
            ready_directory(),
            FakeBridge::default(),
        );
        h.store
            .set(StorageKey::ReturnLocale, "pt-BR")
            .expect("locale");

        let outcome = h.orchestrator.handle(Trigger::Mount).await;

        assert_eq!(
            outcome,
            BootstrapOutcome::Redirected {
                workspace_id: "ws-1".to_string(),
                path: "/ws-1/chat".to_string(),
            }
        );
        assert_eq!(h.orchestrator.phase(), BootstrapPhase::Done);
        assert_eq!(
            h.store.get(StorageKey::BearerToken).expect("get"),
            Some("tok1".to_string())
        );
        assert_eq!(h.store.get(StorageKey::ReturnLocale).expect("get"), None);
        assert_eq!(
            h.page.events()[0],
            PageEvent::Replaced("/pt-BR".to_string())
        );
        assert!(h.auth.current_session().await.is_some());
        assert!(h.orchestrator.flags().is_authenticated);
    }

    #[tokio::test]
    async fn overlapping_triggers_exchange_and_navigate_once() {
        let h = harness(
            "https://chat.example.com/?code=abc123",
            ready_directory(),
            FakeBridge::default(),
        );

        let (first, second, third) = tokio::join!(
            h.orchestrator.handle(Trigger::Mount),
            h.orchestrator.handle(Trigger::PollTick),
            h.orchestrator.handle(Trigger::UrlChanged),
        );

        assert!(matches!(first, BootstrapOutcome::Redirected { .. }));
        assert_eq!(second, BootstrapOutcome::Busy);
        assert_eq!(third, BootstrapOutcome::Busy);
        assert_eq!(h.bridge.exchanges.load(Ordering::SeqCst), 1);
        assert_eq!(h.bridge.bridges.load(Ordering::SeqCst), 1);
        assert_eq!(h.page.navigations(), vec!["/ws-1/chat".to_string()]);

        assert_eq!(
            h.orchestrator.handle(Trigger::Mount).await,
            BootstrapOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn storage_triggers_only_count_for_a_new_bearer_token() {
        let h = harness("https://chat.example.com/login", ready_directory(), FakeBridge::default());

        let unrelated = Trigger::StorageChanged {
            key: "theme".to_string(),
            new_value: Some("dark".to_string()),
        };
        assert_eq!(h.orchestrator.handle(unrelated).await, BootstrapOutcome::Ignored);

        let removed = Trigger::StorageChanged {
            key: StorageKey::BearerToken.as_str().to_string(),
            new_value: None,
        };
        assert_eq!(h.orchestrator.handle(removed).await, BootstrapOutcome::Ignored);

        assert_eq!(
            h.orchestrator.handle(Trigger::PollTick).await,
            BootstrapOutcome::SignedOut
        );

        h.store.set(StorageKey::BearerToken, "tok-other-tab").expect("set");
        let written = Trigger::StorageChanged {
            key: StorageKey::BearerToken.as_str().to_string(),
            new_value: Some("tok-other-tab".to_string()),
        };
        assert!(matches!(
            h.orchestrator.handle(written).await,
            BootstrapOutcome::Redirected { .. }
        ));
    }

    #[tokio::test]
    async fn protected_route_without_credential_leaves_for_sign_in() {
        let v = encode_deferred_settings(&DeferredSettings {
            model: Some("gpt-4o".to_string()),
            prompt: None,
        });
        let h = harness(
            &format!("https://chat.example.com/en?v={v}"),
            ready_directory(),
            FakeBridge::default(),
        );

        let outcome = h.orchestrator.handle(Trigger::Mount).await;

        assert_eq!(
            outcome,
            BootstrapOutcome::AwaitingExternalRedirect {
                authorization_url: "https://id.example.com/authorize?return=https://chat.example.com"
                    .to_string(),
            }
        );
        assert_eq!(h.orchestrator.phase(), BootstrapPhase::AwaitingExternalRedirect);
        assert!(h.orchestrator.is_settled());
        assert_eq!(
            h.store.get(StorageKey::ReturnLocale).expect("get"),
            Some("en".to_string())
        );
        assert_eq!(
            h.store.get(StorageKey::PendingLinkParam).expect("get"),
            Some(v)
        );
        assert!(h.auth.current_session().await.is_none());
        assert!(h.orchestrator.flags().auth_error.is_none());
    }

    #[tokio::test]
    async fn link_param_survives_the_round_trip_once() {
        let v = encode_deferred_settings(&DeferredSettings {
            model: Some("claude-3-5-sonnet".to_string()),
            prompt: Some("Be brief".to_string()),
        });
        let h = harness(
            "https://chat.example.com/?code=abc123",
            ready_directory(),
            FakeBridge::default(),
        );
        h.store
            .set(StorageKey::PendingLinkParam, &v)
            .expect("pending link");

        let outcome = h.orchestrator.handle(Trigger::Mount).await;

        assert_eq!(
            outcome,
            BootstrapOutcome::Redirected {
                workspace_id: "ws-1".to_string(),
                path: "/ws-1/chat?defaultModel=claude-3-5-sonnet&defaultPrompt=Be+brief"
                    .to_string(),
            }
        );
        assert_eq!(lock(&h.bridge.link_params).clone(), vec![Some(v)]);
        assert_eq!(h.store.get(StorageKey::PendingLinkParam).expect("get"), None);
        assert_eq!(h.orchestrator.state().chat_settings().prompt, "Be brief");
    }

    #[tokio::test]
    async fn malformed_link_param_still_redirects() {
        let h = harness(
            "https://chat.example.com/en?token=tok1&v=%%%not-base64",
            ready_directory(),
            FakeBridge::default(),
        );

        let outcome = h.orchestrator.handle(Trigger::Mount).await;

        assert_eq!(
            outcome,
            BootstrapOutcome::Redirected {
                workspace_id: "ws-1".to_string(),
                path: "/ws-1/chat".to_string(),
            }
        );
        assert_eq!(
            h.orchestrator.state().chat_settings(),
            crate::state::ChatSettings::default()
        );
    }

    #[tokio::test]
    async fn bridge_failure_clears_token_and_routes_to_sign_in() {
        let h = harness(
            "https://chat.example.com/en",
            ready_directory(),
            FakeBridge {
                fail_bridge: true,
                ..FakeBridge::default()
            },
        );
        h.store.set(StorageKey::BearerToken, "tok-stale").expect("set");

        let outcome = h.orchestrator.handle(Trigger::Mount).await;

        assert!(matches!(
            outcome,
            BootstrapOutcome::Failed {
                kind: BootstrapErrorKind::Bridge,
                ..
            }
        ));
        assert_eq!(h.store.get(StorageKey::BearerToken).expect("get"), None);
        assert_eq!(h.page.navigations(), vec!["/en/login".to_string()]);
        assert_eq!(h.orchestrator.phase(), BootstrapPhase::Failed);
        let flags = h.orchestrator.flags();
        assert!(!flags.is_authenticated);
        assert!(!flags.is_halted);
        assert_eq!(
            flags.auth_error.map(|notice| notice.kind),
            Some(BootstrapErrorKind::Bridge)
        );

        assert!(h.orchestrator.is_settled());
        assert_eq!(
            h.orchestrator.handle(Trigger::PollTick).await,
            BootstrapOutcome::Ignored
        );
        assert_eq!(
            h.orchestrator.handle(Trigger::UrlChanged).await,
            BootstrapOutcome::SignedOut
        );
        assert_eq!(h.orchestrator.phase(), BootstrapPhase::Failed);
        assert_eq!(h.bridge.bridges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_cookie_token_is_not_bridged_again() {
        let h = harness_on(
            HeadlessPage::new("https://chat.example.com/en")
                .with_cookie(DEFAULT_TOKEN_COOKIE_NAME, "tok-cookie"),
            ready_directory(),
            FakeBridge {
                fail_bridge: true,
                ..FakeBridge::default()
            },
            BootstrapConfig::for_tests(),
        );

        assert!(matches!(
            h.orchestrator.handle(Trigger::Mount).await,
            BootstrapOutcome::Failed {
                kind: BootstrapErrorKind::Bridge,
                ..
            }
        ));
        assert!(h.orchestrator.is_settled());

        let same_token = Trigger::StorageChanged {
            key: StorageKey::BearerToken.as_str().to_string(),
            new_value: Some("tok-cookie".to_string()),
        };
        for trigger in [
            Trigger::PollTick,
            Trigger::PollTick,
            Trigger::Mount,
            Trigger::UrlChanged,
            same_token,
        ] {
            assert_eq!(
                h.orchestrator.handle(trigger).await,
                BootstrapOutcome::Ignored
            );
        }
        assert_eq!(h.bridge.bridges.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.get(StorageKey::BearerToken).expect("get"), None);
        assert_eq!(h.page.navigations(), vec!["/en/login".to_string()]);
        assert_eq!(h.orchestrator.phase(), BootstrapPhase::Failed);

        // A different token written by another tab is a fresh attempt.
        h.store.set(StorageKey::BearerToken, "tok-fresh").expect("set");
        let fresh = Trigger::StorageChanged {
            key: StorageKey::BearerToken.as_str().to_string(),
            new_value: Some("tok-fresh".to_string()),
        };
        assert!(matches!(
            h.orchestrator.handle(fresh).await,
            BootstrapOutcome::Failed { .. }
        ));
        assert_eq!(h.bridge.bridges.load(Ordering::SeqCst), 2);

        // Both dead tokens stay rejected until the cycle is reset.
        assert_eq!(
            h.orchestrator.handle(Trigger::UrlChanged).await,
            BootstrapOutcome::Ignored
        );
        assert_eq!(h.bridge.bridges.load(Ordering::SeqCst), 2);

        h.orchestrator.reset_cycle();
        assert!(matches!(
            h.orchestrator.handle(Trigger::Mount).await,
            BootstrapOutcome::Failed { .. }
        ));
        assert_eq!(h.bridge.bridges.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn missing_profile_gets_one_direct_reload_then_fails() {
        let h = harness(
            "https://chat.example.com/?token=tok1",
            FakeDirectory::default().with_home_on_attempt(1),
            FakeBridge::default(),
        );

        let outcome = h.orchestrator.handle(Trigger::Mount).await;

        assert!(matches!(
            outcome,
            BootstrapOutcome::Failed {
                kind: BootstrapErrorKind::NoProfile,
                ..
            }
        ));
        assert_eq!(h.directory.profile_calls(), 2);
        assert!(h.orchestrator.flags().is_halted);
        assert!(h.auth.current_session().await.is_none());
        assert_eq!(
            h.orchestrator.handle(Trigger::PollTick).await,
            BootstrapOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn workspace_timeout_halts_the_cycle() {
        let h = harness(
            "https://chat.example.com/?token=tok1",
            FakeDirectory::default().with_profile("user-1"),
            FakeBridge::default(),
        );

        let outcome = h.orchestrator.handle(Trigger::Mount).await;

        assert!(matches!(
            outcome,
            BootstrapOutcome::Failed {
                kind: BootstrapErrorKind::WorkspaceTimeout,
                ..
            }
        ));
        assert_eq!(h.directory.home_calls(), 5);
        assert!(h.orchestrator.is_settled());
        assert_eq!(h.page.navigations(), vec!["/login".to_string()]);
    }

    #[tokio::test]
    async fn existing_session_without_profile_loads_it_and_redirects() {
        let h = harness("https://chat.example.com/en", ready_directory(), FakeBridge::default());
        h.auth
            .install_session(NativeSession::new("a", "r", "user-1").expect("session"))
            .await;

        let outcome = h.orchestrator.handle(Trigger::Mount).await;

        assert!(matches!(outcome, BootstrapOutcome::Redirected { .. }));
        assert_eq!(h.bridge.bridges.load(Ordering::SeqCst), 0);
        assert!(h.orchestrator.state().profile().is_some());
    }

    #[tokio::test]
    async fn existing_session_with_profile_uses_loaded_workspace() {
        let h = harness(
            "https://chat.example.com/en",
            ready_directory().with_extra_workspace(workspace("ws-2", "user-1", false)),
            FakeBridge::default(),
        );
        h.auth
            .install_session(NativeSession::new("a", "r", "user-1").expect("session"))
            .await;
        h.orchestrator.state().set_profile(chatdesk_control_client::Profile {
            id: "profile-user-1".to_string(),
            user_id: "user-1".to_string(),
            username: None,
            has_onboarded: true,
        });
        h.orchestrator
            .state()
            .set_workspaces(vec![workspace("ws-2", "user-1", false)]);

        let outcome = h.orchestrator.handle(Trigger::Mount).await;

        assert_eq!(
            outcome,
            BootstrapOutcome::Redirected {
                workspace_id: "ws-2".to_string(),
                path: "/ws-2/chat".to_string(),
            }
        );
        assert_eq!(h.directory.home_calls(), 0);
    }

    #[tokio::test]
    async fn session_on_chat_route_is_already_done() {
        let h = harness("https://chat.example.com/ws-1/chat", ready_directory(), FakeBridge::default());
        h.auth
            .install_session(NativeSession::new("a", "r", "user-1").expect("session"))
            .await;

        assert_eq!(
            h.orchestrator.handle(Trigger::Mount).await,
            BootstrapOutcome::AlreadyInWorkspace
        );
        assert!(h.page.navigations().is_empty());
        assert!(h.orchestrator.is_settled());
    }

    #[tokio::test]
    async fn workspace_list_failure_degrades_to_home_only() {
        let directory = ready_directory();
        directory.fail_workspaces();
        let h = harness("https://chat.example.com/?token=tok1", directory, FakeBridge::default());

        let outcome = h.orchestrator.handle(Trigger::Mount).await;

        assert!(matches!(outcome, BootstrapOutcome::Redirected { .. }));
        let workspaces = h.orchestrator.state().workspaces();
        assert_eq!(workspaces.len(), 1);
        assert_eq!(workspaces[0].id, "ws-1");
    }

    #[tokio::test]
    async fn marker_strategy_reloads_on_mount_once() {
        let mut config = BootstrapConfig::for_tests();
        config.refresh_strategy = RefreshStrategy::PersistedMarker;
        let h = harness_with(
            "https://chat.example.com/ws-1/chat",
            ready_directory(),
            FakeBridge::default(),
            config,
        );
        h.store
            .set(StorageKey::NeedsSecondRefresh, "true")
            .expect("marker");

        assert_eq!(
            h.orchestrator.handle(Trigger::Mount).await,
            BootstrapOutcome::Reloaded
        );
        assert_eq!(h.store.get(StorageKey::NeedsSecondRefresh).expect("get"), None);
        assert_eq!(h.page.events(), vec![PageEvent::Reloaded]);
    }

    #[tokio::test]
    async fn reset_cycle_allows_a_second_navigation() {
        let h = harness("https://chat.example.com/?token=tok1", ready_directory(), FakeBridge::default());
        assert!(matches!(
            h.orchestrator.handle(Trigger::Mount).await,
            BootstrapOutcome::Redirected { .. }
        ));

        h.orchestrator.reset_cycle();
        assert_eq!(h.orchestrator.phase(), BootstrapPhase::Idle);
        h.page.navigate("/en");

        assert!(matches!(
            h.orchestrator.handle(Trigger::UrlChanged).await,
            BootstrapOutcome::Redirected { .. }
        ));
        assert_eq!(h.page.navigations().len(), 3);
    }
}

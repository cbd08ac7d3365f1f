//! Authentication and session bootstrap for the chat client.
//!
//! Turns whatever credential the page carries (an authorization code, a stored
//! bearer token, a live session) into an installed native session and one
//! navigation into the user's home workspace.

pub mod bridge;
pub mod config;
pub mod driver;
pub mod error;
pub mod orchestrator;
pub mod platform;
pub mod poller;
pub mod redirect;
pub mod session;
pub mod state;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use bridge::{ControlIdentityBridge, IdentityBridge, native_session_from_response};
pub use config::{BootstrapConfig, ConfigError, RefreshStrategy};
pub use driver::{BootstrapDriver, DriverReport};
pub use error::{BootstrapError, BootstrapErrorKind};
pub use orchestrator::{
    BootstrapDeps, BootstrapOrchestrator, BootstrapOutcome, BootstrapPhase, Trigger,
};
pub use platform::{
    AuthSubsystem, InMemoryAuthSubsystem, Notice, NoticeLevel, Notifier, Sleeper, TokioSleeper,
    TracingNotifier, WorkspaceDirectory,
};
pub use poller::WorkspaceBootstrapPoller;
pub use redirect::{
    PostNavigationHook, RedirectCoordinator, RedirectOutcome, ReloadOnceHook,
    consume_refresh_marker,
};
pub use session::SessionRestorer;
pub use state::{AuthErrorNotice, BootstrapFlags, ChatSettings, FlagsSnapshot, SharedState};
pub use telemetry::init_tracing;

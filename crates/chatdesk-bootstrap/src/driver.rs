use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

use crate::orchestrator::{BootstrapOrchestrator, BootstrapOutcome, BootstrapPhase, Trigger};

const MIN_TICK: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverReport {
    pub phase: BootstrapPhase,
    /// Last outcome other than `Ignored` / `Busy`.
    pub last_outcome: Option<BootstrapOutcome>,
    pub dispatched: usize,
    /// The deadline fired before the orchestrator settled.
    pub timed_out: bool,
}

/// Fans mount, host events and the periodic tick into the orchestrator.
///
/// Each trigger runs as its own task so a slow bridge call never delays the
/// next event; the orchestrator's guards decide which one does the work.
pub struct BootstrapDriver {
    orchestrator: Arc<BootstrapOrchestrator>,
    tick: Duration,
    deadline: Option<Duration>,
}

impl BootstrapDriver {
    #[must_use]
    pub fn new(orchestrator: Arc<BootstrapOrchestrator>, tick: Duration) -> Self {
        Self {
            orchestrator,
            tick: tick.max(MIN_TICK),
            deadline: None,
        }
    }

    /// Stops after `limit` even when the orchestrator never settles, e.g. on a
    /// public route with no credential. In-flight triggers are aborted.
    #[must_use]
    pub fn with_deadline(mut self, limit: Duration) -> Self {
        self.deadline = Some(limit);
        self
    }

    /// Runs until the orchestrator settles or the deadline fires. Dispatches
    /// `Mount` first.
    pub async fn run(self, mut triggers: mpsc::Receiver<Trigger>) -> DriverReport {
        let mut tasks = JoinSet::new();
        let mut report = DriverReport {
            phase: self.orchestrator.phase(),
            last_outcome: None,
            dispatched: 0,
            timed_out: false,
        };
        let deadline = self.deadline.map(|limit| Instant::now() + limit);
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expired);
        self.dispatch(&mut tasks, Trigger::Mount, &mut report);

        let mut ticker = tokio::time::interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut triggers_open = true;

        while !self.orchestrator.is_settled() {
            tokio::select! {
                Some(joined) = tasks.join_next() => record(&mut report, joined),
                trigger = triggers.recv(), if triggers_open => match trigger {
                    Some(trigger) => self.dispatch(&mut tasks, trigger, &mut report),
                    None => triggers_open = false,
                },
                _ = ticker.tick() => self.dispatch(&mut tasks, Trigger::PollTick, &mut report),
                () = &mut expired => {
                    report.timed_out = true;
                    break;
                }
            }
        }

        if report.timed_out {
            tasks.shutdown().await;
        } else {
            while let Some(joined) = tasks.join_next().await {
                record(&mut report, joined);
            }
        }
        report.phase = self.orchestrator.phase();
        tracing::debug!(
            target: "chatdesk.bootstrap",
            phase = report.phase.as_str(),
            dispatched = report.dispatched,
            timed_out = report.timed_out,
            "bootstrap driver stopped",
        );
        report
    }

    fn dispatch(
        &self,
        tasks: &mut JoinSet<BootstrapOutcome>,
        trigger: Trigger,
        report: &mut DriverReport,
    ) {
        report.dispatched += 1;
        let orchestrator = self.orchestrator.clone();
        tasks.spawn(async move { orchestrator.handle(trigger).await });
    }
}

fn record(report: &mut DriverReport, joined: Result<BootstrapOutcome, JoinError>) {
    match joined {
        Ok(BootstrapOutcome::Ignored | BootstrapOutcome::Busy) => {}
        Ok(outcome) => report.last_outcome = Some(outcome),
        Err(error) => {
            tracing::warn!(
                target: "chatdesk.bootstrap",
                error = %error,
                "bootstrap trigger task failed",
            );
        }
    }
}

//! The single background worker driving ingestion cycles.
//!
//! ```text
//!   Running ──stop()──▶ Stopping ──worker exits──▶ Stopped
//!      └──────────── fatal error ─────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use sundew_shared::{AccountGroup, Result, SundewError};

use crate::ingest::{AccountOutcome, IngestionCycle, SkipReason};

/// Lifecycle of the scheduler worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Stopping,
    Stopped,
}

/// Outcome of one account within a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountReport {
    pub group: String,
    pub account: String,
    pub outcome: AccountOutcome,
}

/// Everything one pass over all groups did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub accounts: Vec<AccountReport>,
    /// The pass ended early because stop was requested.
    pub cancelled: bool,
}

impl CycleReport {
    pub fn saved_items(&self) -> usize {
        self.accounts
            .iter()
            .map(|r| match r.outcome {
                AccountOutcome::Saved { items, .. } => items,
                _ => 0,
            })
            .sum()
    }

    pub fn skipped(&self) -> usize {
        self.accounts
            .iter()
            .filter(|r| {
                matches!(
                    r.outcome,
                    AccountOutcome::Skipped { .. } | AccountOutcome::SaveFailed { .. }
                )
            })
            .count()
    }
}

/// Walks every group and account in configured order, once per interval.
pub struct Scheduler {
    groups: Vec<AccountGroup>,
    cycle: Arc<IngestionCycle>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(groups: Vec<AccountGroup>, cycle: Arc<IngestionCycle>, interval: Duration) -> Self {
        Self {
            groups,
            cycle,
            interval,
        }
    }

    /// One full pass. Stops early (not an error) when `cancel` fires between
    /// accounts; returns `Err` only for fatal errors.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        for group in &self.groups {
            for account in &group.accounts {
                if cancel.is_cancelled() {
                    info!("stop requested, ending cycle early");
                    report.cancelled = true;
                    return Ok(report);
                }

                let outcome = match self.cycle.run_account(group, account, cancel).await {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_fatal() => {
                        error!(group = %group.name, account = %account, error = %e, "fatal error");
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(group = %group.name, account = %account, error = %e, "account failed");
                        AccountOutcome::Skipped {
                            reason: SkipReason::Error(e.to_string()),
                        }
                    }
                };

                report.accounts.push(AccountReport {
                    group: group.name.clone(),
                    account: account.clone(),
                    outcome,
                });
            }
        }
        Ok(report)
    }

    /// Spawn the worker. It runs until stopped or until a fatal error.
    pub fn start(self) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let state = Arc::new(watch::channel(SchedulerState::Running).0);

        let worker_cancel = cancel.clone();
        let worker_state = state.clone();
        let join = tokio::spawn(async move {
            let _exit = WorkerExit {
                cancel: worker_cancel.clone(),
                state: worker_state,
            };
            self.run_loop(&worker_cancel).await
        });

        SchedulerHandle {
            cancel,
            state,
            join,
        }
    }

    async fn run_loop(&self, cancel: &CancellationToken) -> Result<()> {
        info!(
            groups = self.groups.len(),
            interval_secs = self.interval.as_secs(),
            "scheduler started"
        );

        loop {
            let cycle_id = Uuid::now_v7();
            let report = self
                .run_cycle(cancel)
                .instrument(info_span!("cycle", %cycle_id))
                .await?;
            info!(
                %cycle_id,
                accounts = report.accounts.len(),
                saved_items = report.saved_items(),
                skipped = report.skipped(),
                "cycle complete"
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("scheduler stopped");
        Ok(())
    }
}

/// Publishes `Stopped` and fires the token however the worker ends,
/// panics included, so the foreground never waits on a dead worker.
struct WorkerExit {
    cancel: CancellationToken,
    state: Arc<watch::Sender<SchedulerState>>,
}

impl Drop for WorkerExit {
    fn drop(&mut self) {
        self.state.send_replace(SchedulerState::Stopped);
        self.cancel.cancel();
    }
}

/// Foreground handle to a running [`Scheduler`].
pub struct SchedulerHandle {
    cancel: CancellationToken,
    state: Arc<watch::Sender<SchedulerState>>,
    join: JoinHandle<Result<()>>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Token cancelled on stop request or when the worker exits.
    pub fn stop_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request Stopping and wait for the worker to finish its current account.
    /// Returns the worker's fatal error, if it died of one.
    pub async fn stop(self) -> Result<()> {
        self.state.send_if_modified(|s| {
            if *s == SchedulerState::Running {
                *s = SchedulerState::Stopping;
                true
            } else {
                false
            }
        });
        self.cancel.cancel();

        match self.join.await {
            Ok(result) => result,
            Err(e) => {
                self.state.send_replace(SchedulerState::Stopped);
                Err(SundewError::Worker(e.to_string()))
            }
        }
    }
}

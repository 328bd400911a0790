//! The chassis shared by every controller.
//!
//! [`CtrlState`] carries what all controller kinds have in common: the repo
//! reference, the provider info learned at startup, the branch roster, the
//! active flag, and the event counter driving bounded-history restarts.
//!
//! Activity failures never terminate a controller loop. The helpers here log
//! them and report absence; recovery is the retry policy plus whatever
//! signals arrive next.

use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use crate::io::retry::{RetryConfig, with_retry};
use crate::io::{IoResult, Registry};
use crate::types::{ProviderInfo, Repo};

/// Steps charged to the event counter per executed activity.
const ACTIVITY_STEPS: u64 = 10;

/// Steps charged per received signal.
const SIGNAL_STEPS: u64 = 1;

/// State common to all controller kinds.
#[derive(Debug)]
pub struct CtrlState {
    /// Controller kind, for logging ("repo_ctrl", "branch_ctrl", ...).
    pub kind: &'static str,

    pub repo: Repo,

    /// Provider-side info; refreshed at startup, absent until then.
    pub info: Option<ProviderInfo>,

    /// Roster of non-default branch names.
    pub branches: Vec<String>,

    /// Flips false exactly once; terminal.
    pub active: bool,

    /// Monotonic event counter; drives bounded-history restarts.
    pub counter: u64,
}

impl CtrlState {
    pub fn new(kind: &'static str, repo: Repo) -> Self {
        CtrlState {
            kind,
            repo,
            info: None,
            branches: Vec::new(),
            active: true,
            counter: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Marks the controller inactive; terminal.
    pub fn set_done(&mut self) {
        self.active = false;
    }

    /// Marks the controller inactive and logs the termination.
    pub fn terminate(&mut self) {
        self.set_done();
        info!(kind = self.kind, repo = %self.repo.id, "controller terminated");
    }

    /// Charges one received signal to the event counter.
    pub fn count_signal(&mut self) {
        self.counter += SIGNAL_STEPS;
    }

    /// Whether the event counter has reached the restart threshold.
    pub fn needs_restart(&self, threshold: u64) -> bool {
        self.counter >= threshold
    }

    /// Resets the event counter after a bounded-history restart.
    pub fn reset_counter(&mut self) {
        self.counter = 0;
    }

    /// Adds a branch to the roster.
    ///
    /// Idempotent; empty names and the default branch are never rostered.
    pub fn add_branch(&mut self, branch: &str) {
        if branch.is_empty() || branch == self.repo.default_branch {
            return;
        }
        if !self.branches.iter().any(|b| b == branch) {
            self.branches.push(branch.to_string());
        }
    }

    /// Removes a branch from the roster; no-op when absent.
    pub fn remove_branch(&mut self, branch: &str) {
        self.branches.retain(|b| b != branch);
    }

    /// Runs a provider activity, logging the outcome and charging the event
    /// counter. Failures are absorbed: the caller gets `None` and the loop
    /// stays alive.
    pub async fn run_activity<T>(
        &mut self,
        action: &'static str,
        fut: impl Future<Output = IoResult<T>>,
    ) -> Option<T> {
        match fut.await {
            Ok(value) => {
                self.counter += ACTIVITY_STEPS;
                Some(value)
            }
            Err(err) => {
                warn!(
                    kind = self.kind,
                    repo = %self.repo.id,
                    action,
                    error = %err,
                    "activity failed"
                );
                None
            }
        }
    }

    /// Refreshes provider info, with retry on transient failures.
    pub async fn refresh_info(&mut self, registry: &Arc<Registry>, retry: RetryConfig) {
        let Ok(io) = registry.repo_io(&self.repo).inspect_err(|err| {
            warn!(kind = self.kind, repo = %self.repo.id, error = %err, "no repo capability");
        }) else {
            return;
        };

        let ctrl_id = self.repo.id.clone();
        let fetched = self
            .run_activity(
                "get_provider_info",
                with_retry(retry, "get_provider_info", || io.get_provider_info(&ctrl_id)),
            )
            .await;

        if let Some(info) = fetched {
            self.info = Some(info);
        }
    }

    /// Refreshes the branch roster from the provider, excluding the default
    /// branch. Requires provider info; fetches it first when missing.
    pub async fn refresh_branches(&mut self, registry: &Arc<Registry>, retry: RetryConfig) {
        if self.info.is_none() {
            self.refresh_info(registry, retry).await;
        }
        let Some(info) = self.info.clone() else {
            return;
        };

        let Ok(io) = registry.repo_io(&self.repo) else {
            return;
        };

        let fetched = self
            .run_activity(
                "get_all_branches",
                with_retry(retry, "get_all_branches", || io.get_all_branches(&info)),
            )
            .await;

        if let Some(branches) = fetched {
            self.branches.clear();
            for branch in &branches {
                self.add_branch(branch);
            }
        }
    }
}

//! Merge-admission controller for one (repo, branch) pair.
//!
//! Holds two queues: `priority` drains completely before `primary` is
//! touched. Signals land in an inbox task that serially applies queue
//! mutations; a separate admission loop pops whatever is admissible and hands
//! it to the configured [`PrProcessor`]. The two halves share state under a
//! mutex that is never held across an await, so signals keep landing while a
//! PR is being processed.
//!
//! A PR that keeps failing is not re-enqueued forever: after
//! `max_process_attempts` failures it moves to the dead list, which survives
//! in the snapshot for operator inspection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::hub::Hub;
use super::signal::QueueSignal;
use super::snapshot::{self, QueueSnapshot, SCHEMA_VERSION};
use crate::config::Config;
use crate::queue::Queue;
use crate::types::{PrNumber, PullRequestDescriptor, Repo, RepoUuid};

/// A failed processing attempt for a queued pull request.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct ProcessError {
    pub reason: String,
}

impl ProcessError {
    pub fn new(reason: impl Into<String>) -> Self {
        ProcessError {
            reason: reason.into(),
        }
    }
}

/// Consumes pull requests admitted by a queue controller.
///
/// The controller owns ordering and retry accounting; implementations own
/// what "process" means (merge, run checks, hand off to CI).
#[async_trait]
pub trait PrProcessor: Send + Sync {
    async fn process(
        &self,
        repo: &Repo,
        branch: &str,
        pr: &PullRequestDescriptor,
    ) -> Result<(), ProcessError>;
}

/// Processor that logs each admitted pull request and succeeds.
pub struct NoopProcessor;

#[async_trait]
impl PrProcessor for NoopProcessor {
    async fn process(
        &self,
        repo: &Repo,
        branch: &str,
        pr: &PullRequestDescriptor,
    ) -> Result<(), ProcessError> {
        info!(repo = %repo.id, branch, pr = %pr.number, "admitted pull request");
        Ok(())
    }
}

/// Mutable state of one queue controller instance.
#[derive(Debug, Default)]
struct QueueState {
    priority: Queue,
    primary: Queue,

    /// Failed processing attempts per PR number.
    attempts: HashMap<u64, u32>,

    /// PRs that exhausted their attempts.
    dead: Vec<PullRequestDescriptor>,

    /// Event counter driving bounded-history restarts.
    counter: u64,
}

impl QueueState {
    /// Pops the next admissible PR: priority queue first, primary only when
    /// the priority queue is empty.
    fn pop_next(&mut self) -> Option<PullRequestDescriptor> {
        self.priority.pop().or_else(|| self.primary.pop())
    }

    /// Promotes a PR within whichever queue currently holds it.
    fn promote(&mut self, number: PrNumber) {
        if self.priority.contains(number) {
            self.priority.promote(number);
        } else {
            self.primary.promote(number);
        }
    }

    /// Demotes a PR within whichever queue currently holds it.
    fn demote(&mut self, number: PrNumber) {
        if self.priority.contains(number) {
            self.priority.demote(number);
        } else {
            self.primary.demote(number);
        }
    }

    fn snapshot(&self) -> QueueSnapshot {
        let mut attempts: Vec<(u64, u32)> =
            self.attempts.iter().map(|(n, c)| (*n, *c)).collect();
        attempts.sort_by_key(|(n, _)| *n);

        QueueSnapshot {
            schema_version: SCHEMA_VERSION,
            taken_at: Utc::now(),
            priority: self.priority.serialize(),
            primary: self.primary.serialize(),
            attempts,
            dead: self.dead.clone(),
        }
    }

    /// Rebuilds state from a snapshot; the event counter starts over.
    fn restore(&mut self, snap: QueueSnapshot) {
        self.priority = Queue::deserialize(snap.priority);
        self.primary = Queue::deserialize(snap.primary);
        self.attempts = snap.attempts.into_iter().collect();
        self.dead = snap.dead;
        self.counter = 0;
    }
}

/// Runs one queue controller instance until shutdown.
pub async fn run(
    hub: Arc<Hub>,
    repo: Repo,
    branch: String,
    rx: mpsc::UnboundedReceiver<QueueSignal>,
) {
    let config = hub.config().clone();
    let path = snapshot::snapshot_path(&config.snapshots_dir(), repo.id.as_str(), &branch);

    let state = Arc::new(Mutex::new(QueueState::default()));
    match snapshot::load(&path).await {
        Ok(Some(snap)) => {
            let mut s = state.lock().await;
            s.restore(snap);
            info!(
                repo = %repo.id,
                branch = %branch,
                priority = s.priority.len(),
                primary = s.primary.len(),
                "queue controller resumed from snapshot"
            );
        }
        Ok(None) => {}
        Err(err) => {
            // A corrupt snapshot must not wedge the controller; start empty.
            warn!(repo = %repo.id, branch = %branch, error = %err, "ignoring unreadable queue snapshot");
        }
    }

    info!(repo = %repo.id, branch = %branch, "queue controller started");

    let available = Arc::new(Notify::new());
    let done = CancellationToken::new();
    let shutdown = hub.shutdown_token().clone();

    let mutator = tokio::spawn(apply_signals(
        rx,
        state.clone(),
        available.clone(),
        done.clone(),
        shutdown.clone(),
        repo.id.clone(),
        branch.clone(),
    ));

    loop {
        // Drain everything currently admissible before waiting again.
        loop {
            let Some(pr) = state.lock().await.pop_next() else {
                break;
            };
            process_one(&hub, &repo, &branch, pr, &state, &config).await;
            maybe_restart(&state, &config, &path, &repo.id, &branch).await;
        }

        tokio::select! {
            _ = available.notified() => {}
            _ = done.cancelled() => break,
            _ = shutdown.cancelled() => break,
        }
    }

    // The mutator has observed the same condition; join it so the final
    // snapshot sees a quiesced state.
    let _ = mutator.await;

    let snap = state.lock().await.snapshot();
    if let Err(err) = snapshot::save(&path, &snap).await {
        error!(repo = %repo.id, branch = %branch, error = %err, "failed to write final queue snapshot");
    }

    info!(repo = %repo.id, branch = %branch, "queue controller stopped");
}

/// Serially applies inbox signals to the shared state.
async fn apply_signals(
    mut rx: mpsc::UnboundedReceiver<QueueSignal>,
    state: Arc<Mutex<QueueState>>,
    available: Arc<Notify>,
    done: CancellationToken,
    shutdown: CancellationToken,
    ctrl_id: RepoUuid,
    branch: String,
) {
    loop {
        let signal = tokio::select! {
            _ = shutdown.cancelled() => break,
            signal = rx.recv() => match signal {
                Some(signal) => signal,
                // Inbox sender gone: the hub is being torn down.
                None => break,
            },
        };

        let mut s = state.lock().await;
        s.counter += 1;

        match signal {
            QueueSignal::Add(pr) => {
                info!(repo = %ctrl_id, branch = %branch, pr = %pr.number, "queued");
                s.primary.push(pr);
                available.notify_one();
            }
            QueueSignal::AddPriority(pr) => {
                info!(repo = %ctrl_id, branch = %branch, pr = %pr.number, "queued with priority");
                s.priority.push(pr);
                available.notify_one();
            }
            QueueSignal::Promote(pr) => s.promote(pr.number),
            QueueSignal::Demote(pr) => s.demote(pr.number),
            QueueSignal::Shutdown => break,
        }
    }

    done.cancel();
}

/// Hands one popped PR to the processor and applies retry accounting.
async fn process_one(
    hub: &Arc<Hub>,
    repo: &Repo,
    branch: &str,
    pr: PullRequestDescriptor,
    state: &Arc<Mutex<QueueState>>,
    config: &Arc<Config>,
) {
    let outcome = hub.processor().process(repo, branch, &pr).await;

    let mut s = state.lock().await;
    s.counter += 1;

    match outcome {
        Ok(()) => {
            s.attempts.remove(&pr.number.0);
            info!(repo = %repo.id, branch, pr = %pr.number, "pull request processed");
        }
        Err(err) => {
            let attempts = s.attempts.entry(pr.number.0).or_insert(0);
            *attempts += 1;
            let attempts = *attempts;

            if attempts >= config.max_process_attempts {
                warn!(
                    repo = %repo.id,
                    branch,
                    pr = %pr.number,
                    attempts,
                    error = %err,
                    "dead-lettering pull request"
                );
                s.attempts.remove(&pr.number.0);
                s.dead.push(pr);
            } else {
                warn!(
                    repo = %repo.id,
                    branch,
                    pr = %pr.number,
                    attempts,
                    error = %err,
                    "processing failed, re-queueing"
                );
                s.primary.push(pr);
            }
        }
    }
}

/// Performs a bounded-history restart when the event counter crosses the
/// threshold: serialize and reset the counter in one lock acquisition, then
/// persist. The inbox and key are untouched, so from the outside nothing
/// happened.
///
/// The in-memory state stays the live truth throughout. The inbox task may
/// queue more PRs while the file write is in flight; rebuilding from the
/// snapshot afterwards would silently drop them.
async fn maybe_restart(
    state: &Arc<Mutex<QueueState>>,
    config: &Arc<Config>,
    path: &std::path::Path,
    ctrl_id: &RepoUuid,
    branch: &str,
) {
    let snap = {
        let mut s = state.lock().await;
        if s.counter < config.restart_threshold {
            return;
        }
        s.counter = 0;
        s.snapshot()
    };

    if let Err(err) = snapshot::save(path, &snap).await {
        error!(repo = %ctrl_id, branch, error = %err, "failed to persist restart snapshot");
        return;
    }

    info!(repo = %ctrl_id, branch, "queue controller history compacted");
}

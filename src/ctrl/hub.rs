//! Keyed controller dispatch: start-if-absent, signal-always.
//!
//! The [`Hub`] maps deterministic controller keys to inbox senders. Signaling
//! a key that has no live instance starts one; signaling an instance whose
//! task has exited (e.g., a branch controller that terminated on branch
//! deletion) replaces it with a fresh one and delivers the signal there.
//! Either way the caller gets fire-and-forget semantics: dispatch never
//! blocks on the target's loop, and a forwarding failure is logged rather
//! than propagated.
//!
//! The hub also carries everything a controller needs at creation time: the
//! capability [`Registry`], the [`Config`], the PR processor for merge
//! queues, and the process-wide shutdown token.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::queue::PrProcessor;
use super::signal::{BranchSignal, QueueSignal, RepoSignal, TrunkSignal};
use super::{branch, queue, repo as repo_ctrl, trunk};
use crate::config::Config;
use crate::io::Registry;
use crate::types::{Repo, RepoUuid};

/// Key of a branch-scoped controller instance.
type BranchKey = (RepoUuid, String);

/// The controller registry for one process.
pub struct Hub {
    registry: Arc<Registry>,
    config: Arc<Config>,
    processor: Arc<dyn PrProcessor>,
    shutdown: CancellationToken,

    repos: Mutex<HashMap<RepoUuid, mpsc::UnboundedSender<RepoSignal>>>,
    trunks: Mutex<HashMap<RepoUuid, mpsc::UnboundedSender<TrunkSignal>>>,
    branches: Mutex<HashMap<BranchKey, mpsc::UnboundedSender<BranchSignal>>>,
    queues: Mutex<HashMap<BranchKey, mpsc::UnboundedSender<QueueSignal>>>,
}

impl Hub {
    /// Creates a hub with the given capabilities and configuration.
    pub fn new(
        registry: Arc<Registry>,
        config: Arc<Config>,
        processor: Arc<dyn PrProcessor>,
    ) -> Arc<Self> {
        Arc::new(Hub {
            registry,
            config,
            processor,
            shutdown: CancellationToken::new(),
            repos: Mutex::new(HashMap::new()),
            trunks: Mutex::new(HashMap::new()),
            branches: Mutex::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
        })
    }

    /// The capability registry controllers resolve providers from.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The shared runtime configuration.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// The processor merge queues hand popped PRs to.
    pub fn processor(&self) -> &Arc<dyn PrProcessor> {
        &self.processor
    }

    /// The process-wide shutdown token.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Requests shutdown of every controller this hub started.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Signals the per-repo dispatcher, starting it if absent.
    pub fn signal_repo(self: &Arc<Self>, repo: &Repo, signal: RepoSignal) {
        let hub = self.clone();
        let repo_for_start = repo.clone();
        signal_with_start(
            &self.repos,
            repo.id.clone(),
            signal,
            move |rx| tokio::spawn(repo_ctrl::run(hub, repo_for_start, rx)),
            "repo_ctrl",
        );
    }

    /// Signals the default-branch controller, starting it if absent.
    pub fn signal_trunk(self: &Arc<Self>, repo: &Repo, signal: TrunkSignal) {
        let hub = self.clone();
        let repo_for_start = repo.clone();
        signal_with_start(
            &self.trunks,
            repo.id.clone(),
            signal,
            move |rx| tokio::spawn(trunk::run(hub, repo_for_start, rx)),
            "trunk_ctrl",
        );
    }

    /// Signals the controller for a branch, starting it if absent.
    ///
    /// Traffic addressed to the default branch is routed to the trunk
    /// controller instead; signals the trunk has no counterpart for are
    /// dropped with a warning.
    pub fn signal_branch(self: &Arc<Self>, repo: &Repo, branch: &str, signal: BranchSignal) {
        if branch == repo.default_branch {
            match signal {
                BranchSignal::Push(push) => self.signal_trunk(repo, TrunkSignal::Push(push)),
                BranchSignal::CreateOrDelete(ev) => {
                    self.signal_trunk(repo, TrunkSignal::CreateOrDelete(ev));
                }
                BranchSignal::Shutdown => self.signal_trunk(repo, TrunkSignal::Shutdown),
                other => {
                    warn!(repo = %repo.id, branch, signal = ?other, "dropping signal addressed to trunk");
                }
            }
            return;
        }

        let hub = self.clone();
        let repo_for_start = repo.clone();
        let branch_for_start = branch.to_string();
        signal_with_start(
            &self.branches,
            (repo.id.clone(), branch.to_string()),
            signal,
            move |rx| tokio::spawn(branch::run(hub, repo_for_start, branch_for_start, rx)),
            "branch_ctrl",
        );
    }

    /// Signals the merge-queue controller for a branch, starting it if absent.
    pub fn signal_queue(self: &Arc<Self>, repo: &Repo, branch: &str, signal: QueueSignal) {
        let hub = self.clone();
        let repo_for_start = repo.clone();
        let branch_for_start = branch.to_string();
        signal_with_start(
            &self.queues,
            (repo.id.clone(), branch.to_string()),
            signal,
            move |rx| tokio::spawn(queue::run(hub, repo_for_start, branch_for_start, rx)),
            "queue_ctrl",
        );
    }

    /// Number of live branch controller inboxes, for introspection.
    pub fn branch_ctrl_count(&self) -> usize {
        self.branches
            .lock()
            .expect("branch map lock")
            .values()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

/// Delivers `signal` to the instance under `key`, starting or replacing the
/// instance as needed.
///
/// An inbox whose receiver is gone means the previous instance exited; a new
/// instance under the same key picks up from there, which is exactly the
/// signal-with-start contract.
fn signal_with_start<K, S, F, H>(
    map: &Mutex<HashMap<K, mpsc::UnboundedSender<S>>>,
    key: K,
    signal: S,
    start: F,
    kind: &'static str,
) where
    K: std::hash::Hash + Eq + Clone + std::fmt::Debug,
    F: FnOnce(mpsc::UnboundedReceiver<S>) -> H,
{
    let mut map = map.lock().expect("controller map lock");
    let mut signal = signal;

    if let Some(tx) = map.get(&key)
        && !tx.is_closed()
    {
        match tx.send(signal) {
            Ok(()) => return,
            // Lost the race with the instance exiting; restart below.
            Err(mpsc::error::SendError(returned)) => signal = returned,
        }
    }

    debug!(?key, kind, "starting controller instance");

    let (tx, rx) = mpsc::unbounded_channel();
    let _ = start(rx);

    if tx.send(signal).is_err() {
        // Only possible if the new task exited immediately.
        warn!(?key, kind, "failed to deliver signal to fresh instance");
    }

    map.insert(key, tx);
}

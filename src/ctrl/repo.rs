//! Per-repo dispatcher.
//!
//! The entry point for everything the webhook layer receives about one
//! repository. It owns no branch state of its own; its job is addressing:
//! work out which branch a signal concerns and forward it, letting the hub
//! start the target controller when none is live.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use super::base::CtrlState;
use super::hub::Hub;
use super::signal::{BranchSignal, RepoSignal, TrunkSignal};
use crate::types::{CreateOrDeleteEvent, PullRequestEvent, PushEvent, Repo};

/// Runs the dispatcher for one repository until shutdown.
pub async fn run(hub: Arc<Hub>, repo: Repo, mut rx: mpsc::UnboundedReceiver<RepoSignal>) {
    let registry = hub.registry().clone();
    let config = hub.config().clone();
    let shutdown = hub.shutdown_token().clone();

    let mut state = CtrlState::new("repo_ctrl", repo.clone());
    state.refresh_info(&registry, config.retry).await;

    info!(repo = %repo.id, "repo controller started");

    while state.is_active() {
        let signal = tokio::select! {
            _ = shutdown.cancelled() => break,
            signal = rx.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };

        state.count_signal();

        match signal {
            RepoSignal::Push(push) => on_push(&hub, &repo, push),
            RepoSignal::CreateOrDelete(ev) => on_create_or_delete(&hub, &repo, ev),
            RepoSignal::PullRequest(ev) => on_pull_request(&hub, &repo, ev),
            RepoSignal::Shutdown => state.terminate(),
        }

        if state.needs_restart(config.restart_threshold) {
            info!(repo = %repo.id, "compacting controller history");
            state.reset_counter();
        }
    }

    info!(repo = %repo.id, "repo controller stopped");
}

/// A push goes to the controller of the pushed branch; the hub routes
/// default-branch pushes to the trunk controller.
fn on_push(hub: &Arc<Hub>, repo: &Repo, push: PushEvent) {
    let branch = push.branch().to_string();
    hub.signal_branch(repo, &branch, BranchSignal::Push(push));
}

/// Branch lifecycle events go to the trunk (roster) and, for non-default
/// branches, to the branch controller itself. Tag events are dropped here.
fn on_create_or_delete(hub: &Arc<Hub>, repo: &Repo, ev: CreateOrDeleteEvent) {
    if !ev.for_branch() {
        return;
    }

    let branch = ev.r#ref.clone();
    hub.signal_trunk(repo, TrunkSignal::CreateOrDelete(ev.clone()));

    // The trunk already received the event above; routing it through
    // signal_branch again would deliver it twice.
    if branch != repo.default_branch {
        hub.signal_branch(repo, &branch, BranchSignal::CreateOrDelete(ev));
    }
}

/// PR events concern the PR's head branch.
fn on_pull_request(hub: &Arc<Hub>, repo: &Repo, ev: PullRequestEvent) {
    let branch = ev.head_branch.clone();
    hub.signal_branch(repo, &branch, BranchSignal::PullRequest(ev));
}

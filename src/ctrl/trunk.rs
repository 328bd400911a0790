//! Default-branch controller.
//!
//! Owns the roster of active branches for its repository. When trunk
//! advances, every rostered branch gets a rebase request carrying the new
//! trunk head; branch create/delete events keep the roster current between
//! the full refreshes done at startup.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::base::CtrlState;
use super::hub::Hub;
use super::signal::{BranchSignal, TrunkSignal};
use crate::types::{CreateOrDeleteEvent, PushEvent, Repo};

/// Runs the trunk controller for one repository until shutdown.
pub async fn run(hub: Arc<Hub>, repo: Repo, mut rx: mpsc::UnboundedReceiver<TrunkSignal>) {
    let registry = hub.registry().clone();
    let config = hub.config().clone();
    let shutdown = hub.shutdown_token().clone();

    let mut state = CtrlState::new("trunk_ctrl", repo.clone());
    state.refresh_branches(&registry, config.retry).await;

    info!(
        repo = %repo.id,
        branches = state.branches.len(),
        "trunk controller started"
    );

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
            TrunkSignal::Push(push) => fan_out_rebase(&hub, &state, push),
            TrunkSignal::CreateOrDelete(ev) => on_create_or_delete(&mut state, ev),
            TrunkSignal::Shutdown => state.terminate(),
        }

        if state.needs_restart(config.restart_threshold) {
            info!(repo = %repo.id, "compacting controller history");
            state.reset_counter();
        }
    }

    info!(repo = %repo.id, "trunk controller stopped");
}

/// Trunk advanced: every rostered branch must rebase onto the new head.
fn fan_out_rebase(hub: &Arc<Hub>, state: &CtrlState, push: PushEvent) {
    let pushed = push.branch().to_string();

    info!(
        repo = %state.repo.id,
        after = %push.after.short(),
        fanout = state.branches.len(),
        "trunk advanced, requesting rebases"
    );

    for branch in &state.branches {
        // The roster never holds the default branch, but a stale roster
        // entry matching the pushed ref must not rebase onto itself.
        if *branch == pushed {
            continue;
        }
        hub.signal_branch(&state.repo, branch, BranchSignal::Rebase(push.clone()));
    }
}

/// Keeps the roster in step with branch creations and deletions.
fn on_create_or_delete(state: &mut CtrlState, ev: CreateOrDeleteEvent) {
    if !ev.for_branch() {
        return;
    }

    if ev.is_created {
        debug!(repo = %state.repo.id, branch = %ev.r#ref, "rostering branch");
        state.add_branch(&ev.r#ref);
    } else {
        debug!(repo = %state.repo.id, branch = %ev.r#ref, "unrostering branch");
        state.remove_branch(&ev.r#ref);
    }
}

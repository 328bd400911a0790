//! Per-branch controller.
//!
//! One instance per (repo, non-default branch). Reacts to pushes with change
//! analysis and an early warning when the line delta crosses the repo's
//! threshold, rebases the branch when trunk moves, tracks the branch's pull
//! request, and warns when the branch goes quiet for too long.
//!
//! The staleness timer lives in its own task owning the [`Interval`]; the
//! controller loop keeps only the [`IntervalHandle`], so a push can reset the
//! timer without touching the waiting task.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::base::CtrlState;
use super::hub::Hub;
use super::signal::{BranchSignal, QueueSignal};
use crate::config::Config;
use crate::git::session::GitSession;
use crate::git::{GitError, GitResult};
use crate::interval::{Interval, IntervalHandle, Tick};
use crate::io::{LinesExceedMessage, MergeConflictMessage, Registry, StaleBranchMessage};
use crate::types::{
    Commit, CreateOrDeleteEvent, PrNumber, PullRequestAction, PullRequestDescriptor,
    PullRequestEvent, PushEvent, Repo, Sha,
};

/// Label that enqueues a branch's PR on the primary merge queue.
const MERGE_LABEL: &str = "qmerge";

/// Label that enqueues a branch's PR on the priority merge queue.
const PRIORITY_MERGE_LABEL: &str = "priority-qmerge";

/// State a branch controller keeps beyond the common chassis.
#[derive(Debug, Default)]
struct BranchState {
    /// Head commit of the most recent push.
    last_commit: Option<Commit>,

    /// The pull request currently open from this branch, if any.
    pr: Option<PullRequestDescriptor>,
}

/// Runs one branch controller instance until the branch is deleted or the
/// process shuts down.
pub async fn run(
    hub: Arc<Hub>,
    repo: Repo,
    branch: String,
    mut rx: mpsc::UnboundedReceiver<BranchSignal>,
) {
    let registry = hub.registry().clone();
    let config = hub.config().clone();
    let shutdown = hub.shutdown_token().clone();

    let mut state = CtrlState::new("branch_ctrl", repo.clone());
    state.refresh_info(&registry, config.retry).await;

    let mut extra = BranchState::default();

    let (interval, stale) = Interval::new(repo.stale_duration);
    let (repo_name, repo_owner) = state
        .info
        .as_ref()
        .map(|info| (info.name.clone(), info.owner.clone()))
        .unwrap_or_default();
    let stale_task = tokio::spawn(stale_loop(
        interval,
        registry.clone(),
        repo.clone(),
        StaleBranchMessage {
            provider: repo.provider,
            repo_name,
            repo_owner,
            branch: branch.clone(),
        },
    ));

    info!(repo = %repo.id, branch = %branch, "branch controller started");

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
            BranchSignal::Push(push) => {
                on_push(&mut state, &mut extra, &registry, &config, &stale, &branch, push).await;
            }
            BranchSignal::Rebase(push) => {
                on_rebase(&mut state, &registry, &config, &branch, push).await;
            }
            BranchSignal::CreateOrDelete(ev) => {
                on_create_or_delete(&mut state, &stale, &branch, ev);
            }
            BranchSignal::PullRequest(ev) => {
                on_pull_request(&hub, &mut extra, &repo, &stale, &branch, ev);
            }
            BranchSignal::Shutdown => state.terminate(),
        }

        if state.needs_restart(config.restart_threshold) {
            // Branch state is already bounded; compaction is just the counter.
            info!(repo = %repo.id, branch = %branch, "compacting controller history");
            state.reset_counter();
        }
    }

    stale.cancel();
    let _ = stale_task.await;

    info!(repo = %repo.id, branch = %branch, "branch controller stopped");
}

/// Waits out the staleness interval and warns each time it elapses without a
/// push having restarted it.
async fn stale_loop(
    mut interval: Interval,
    registry: Arc<Registry>,
    repo: Repo,
    msg: StaleBranchMessage,
) {
    loop {
        match interval.next().await {
            Tick::Canceled => break,
            Tick::Elapsed => {
                let Ok(io) = registry.message_io(&repo) else {
                    warn!(repo = %repo.id, branch = %msg.branch, "no message capability for stale warning");
                    continue;
                };
                if let Err(err) = io.send_stale_branch(msg.clone()).await {
                    warn!(repo = %repo.id, branch = %msg.branch, error = %err, "stale warning failed");
                } else {
                    info!(repo = %repo.id, branch = %msg.branch, "stale branch warning sent");
                }
            }
        }
    }
}

/// Push handling: record the head commit, measure the change surface, warn
/// when it crosses the threshold. Every push resets the staleness timer,
/// whatever the analysis says.
async fn on_push(
    state: &mut CtrlState,
    extra: &mut BranchState,
    registry: &Arc<Registry>,
    config: &Arc<Config>,
    stale: &IntervalHandle,
    branch: &str,
    push: PushEvent,
) {
    extra.last_commit = push.latest_commit().cloned();
    stale.restart();

    let Ok(io) = registry.repo_io(&state.repo) else {
        warn!(repo = %state.repo.id, branch, "no repo capability for change detection");
        return;
    };

    let installation_id = state
        .info
        .as_ref()
        .map(|info| info.installation_id)
        .unwrap_or(push.installation_id);

    let changes = state
        .run_activity("detect_changes", {
            let retry = config.retry;
            let io = io.clone();
            let owner = push.repo_owner.clone();
            let name = push.repo_name.clone();
            let default_branch = state.repo.default_branch.clone();
            let target = branch.to_string();
            async move {
                crate::io::retry::with_retry(retry, "detect_changes", || {
                    io.detect_changes(installation_id, &owner, &name, &default_branch, &target)
                })
                .await
            }
        })
        .await;

    let Some(changes) = changes else {
        return;
    };

    if changes.delta <= state.repo.threshold {
        return;
    }

    info!(
        repo = %state.repo.id,
        branch,
        delta = changes.delta,
        threshold = state.repo.threshold,
        "change surface exceeds threshold"
    );

    let Ok(messages) = registry.message_io(&state.repo) else {
        warn!(repo = %state.repo.id, branch, "no message capability for threshold warning");
        return;
    };

    let msg = LinesExceedMessage {
        repo_name: push.repo_name.clone(),
        branch: branch.to_string(),
        threshold: state.repo.threshold,
        delta: changes.delta,
        compare_url: changes.compare_url.clone(),
        user: push.user.clone(),
    };
    if let Err(err) = messages.send_lines_exceed(msg).await {
        warn!(repo = %state.repo.id, branch, error = %err, "threshold warning failed");
    }
}

/// Rebases this branch onto the trunk head carried by a trunk push.
///
/// The whole session (clone through cleanup) runs under one wall-clock
/// budget. A conflict aborts the push and warns the author; everything else
/// is logged and left for the next trunk push to retry.
async fn on_rebase(
    state: &mut CtrlState,
    registry: &Arc<Registry>,
    config: &Arc<Config>,
    branch: &str,
    push: PushEvent,
) {
    if state.info.is_none() {
        state.refresh_info(registry, config.retry).await;
    }
    let Some(info) = state.info.clone() else {
        warn!(repo = %state.repo.id, branch, "no provider info, skipping rebase");
        return;
    };

    let Ok(io) = registry.repo_io(&state.repo) else {
        warn!(repo = %state.repo.id, branch, "no repo capability for rebase");
        return;
    };

    // The URL embeds a token; it bypasses the logged activity helper and is
    // never printed.
    let url = match io.tokenized_clone_url(&info).await {
        Ok(url) => url,
        Err(err) => {
            warn!(repo = %state.repo.id, branch, error = %err, "could not obtain clone url");
            return;
        }
    };

    let clones_dir = config.clones_dir();
    let flow = rebase_flow(
        &clones_dir,
        &url,
        branch,
        &state.repo.default_branch,
        &push.after,
    );

    match tokio::time::timeout(config.session_timeout, flow).await {
        Ok(Ok(())) => {
            info!(repo = %state.repo.id, branch, onto = %push.after.short(), "branch rebased onto trunk");
        }
        Ok(Err(GitError::Rebase(rebase))) => {
            warn!(
                repo = %state.repo.id,
                branch,
                sha = %rebase.sha,
                in_progress = rebase.in_progress,
                "rebase stopped, notifying"
            );
            let Ok(messages) = registry.message_io(&state.repo) else {
                return;
            };
            let msg = MergeConflictMessage {
                repo_name: push.repo_name.clone(),
                branch: branch.to_string(),
                sha: (rebase.sha != "unknown").then(|| Sha::new(rebase.sha.clone())),
                user: push.user.clone(),
            };
            if let Err(err) = messages.send_merge_conflict(msg).await {
                warn!(repo = %state.repo.id, branch, error = %err, "conflict warning failed");
            }
        }
        Ok(Err(err)) => {
            warn!(repo = %state.repo.id, branch, error = %err, "rebase flow failed");
        }
        Err(_) => {
            warn!(
                repo = %state.repo.id,
                branch,
                budget_secs = config.session_timeout.as_secs(),
                "rebase session timed out"
            );
        }
    }
}

/// clone -> fetch trunk -> rebase -> force push, with the clone removed on
/// every exit path.
async fn rebase_flow(
    clones_dir: &std::path::Path,
    url: &str,
    branch: &str,
    default_branch: &str,
    after: &Sha,
) -> GitResult<()> {
    let session = GitSession::clone_branch(clones_dir, url, branch, default_branch).await?;

    let result = async {
        session.fetch_trunk().await?;
        session.rebase_onto(after).await?;
        session.push(true).await
    }
    .await;

    if let Err(err) = session.remove().await {
        warn!(branch, error = %err, "failed to remove rebase clone");
    }

    result
}

/// Branch deletion terminates the controller; creation is just logged since
/// the instance's existence is the creation.
fn on_create_or_delete(
    state: &mut CtrlState,
    stale: &IntervalHandle,
    branch: &str,
    ev: CreateOrDeleteEvent,
) {
    if !ev.for_branch() {
        return;
    }

    if ev.is_created {
        info!(repo = %state.repo.id, branch, "branch created");
        stale.restart();
    } else {
        info!(repo = %state.repo.id, branch, "branch deleted");
        stale.cancel();
        state.terminate();
    }
}

/// Tracks the branch's pull request and reacts to the merge labels.
fn on_pull_request(
    hub: &Arc<Hub>,
    extra: &mut BranchState,
    repo: &Repo,
    stale: &IntervalHandle,
    branch: &str,
    ev: PullRequestEvent,
) {
    let descriptor = PullRequestDescriptor {
        number: PrNumber(ev.number),
        head_branch: ev.head_branch.clone(),
        base_branch: ev.base_branch.clone(),
    };

    match ev.action {
        PullRequestAction::Opened | PullRequestAction::Reopened => {
            info!(repo = %repo.id, branch, pr = %descriptor.number, "pull request open");
            extra.pr = Some(descriptor);
            stale.restart();
        }
        PullRequestAction::Closed => {
            info!(repo = %repo.id, branch, pr = %descriptor.number, "pull request closed");
            extra.pr = None;
        }
        PullRequestAction::Labeled => match ev.label.as_deref() {
            Some(MERGE_LABEL) => {
                hub.signal_queue(repo, &ev.base_branch, QueueSignal::Add(descriptor));
            }
            Some(PRIORITY_MERGE_LABEL) => {
                hub.signal_queue(repo, &ev.base_branch, QueueSignal::AddPriority(descriptor));
            }
            _ => {}
        },
        PullRequestAction::Other => {}
    }
}

//! Per-controller signal types.
//!
//! Controllers receive these over `tokio::sync::mpsc` inboxes, one inbox per
//! instance. Delivery is buffered: a signal sent while the instance is busy
//! waits its turn, it is never dropped.
//!
//! Every enum carries an explicit `Shutdown` variant; the original dispatch
//! loops had no terminal condition, which left idle controllers running
//! forever.

use serde::{Deserialize, Serialize};

use crate::types::{CreateOrDeleteEvent, PullRequestDescriptor, PullRequestEvent, PushEvent};

/// Signals accepted by the per-repo dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RepoSignal {
    Push(PushEvent),
    CreateOrDelete(CreateOrDeleteEvent),
    PullRequest(PullRequestEvent),
    Shutdown,
}

/// Signals accepted by the default-branch controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrunkSignal {
    /// A push landed on the default branch.
    Push(PushEvent),
    CreateOrDelete(CreateOrDeleteEvent),
    Shutdown,
}

/// Signals accepted by a branch controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BranchSignal {
    /// A push landed on this branch.
    Push(PushEvent),

    /// Trunk moved; rebase this branch onto the carried `after` SHA.
    Rebase(PushEvent),

    CreateOrDelete(CreateOrDeleteEvent),
    PullRequest(PullRequestEvent),
    Shutdown,
}

/// Signals accepted by a merge-queue controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueSignal {
    /// Append to the primary queue.
    Add(PullRequestDescriptor),

    /// Append to the priority queue.
    AddPriority(PullRequestDescriptor),

    /// Move one position toward the head of its queue.
    Promote(PullRequestDescriptor),

    /// Move one position toward the tail of its queue.
    Demote(PullRequestDescriptor),

    Shutdown,
}

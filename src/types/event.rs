//! Inbound signal payloads.
//!
//! These are the JSON payloads delivered to the controllers by the provider's
//! webhook layer. Producers are trusted internal activities; malformed
//! payloads are not modeled here.

use serde::{Deserialize, Serialize};

use super::ids::Sha;
use super::repo::{Commit, UserIdentity};

/// Extracts a branch name from a fully qualified ref.
///
/// `refs/heads/feature-x` becomes `feature-x`; anything that is not a head ref
/// is returned unchanged.
pub fn branch_name_from_ref(git_ref: &str) -> &str {
    git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref)
}

/// A push to a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    /// The pushed ref, e.g. `refs/heads/feature-x`.
    pub branch_ref: String,

    /// Head SHA before the push.
    pub before: Sha,

    /// Head SHA after the push.
    pub after: Sha,

    pub repo_name: String,
    pub repo_owner: String,

    /// The repository's controller id (matches [`crate::types::Repo::id`]).
    pub ctrl_id: String,

    pub installation_id: i64,
    pub provider_id: String,

    /// Commits contained in the push, oldest first.
    pub commits: Vec<Commit>,

    /// Provider-side login of the pusher.
    pub author: String,

    /// The pusher's linked notification identity, when one exists.
    #[serde(default)]
    pub user: Option<UserIdentity>,
}

impl PushEvent {
    /// The branch name the push landed on.
    pub fn branch(&self) -> &str {
        branch_name_from_ref(&self.branch_ref)
    }

    /// The most recent commit in the push, if any.
    pub fn latest_commit(&self) -> Option<&Commit> {
        self.commits.last()
    }
}

/// A branch or tag being created or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrDeleteEvent {
    /// True for creation, false for deletion.
    pub is_created: bool,

    /// The short ref name (branch or tag name, not fully qualified).
    pub r#ref: String,

    /// `"branch"` or `"tag"`.
    pub ref_type: String,
}

impl CreateOrDeleteEvent {
    /// Whether this event concerns a branch (as opposed to a tag).
    pub fn for_branch(&self) -> bool {
        self.ref_type == "branch"
    }
}

/// Actions on a pull request that the branch controller reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    Opened,
    Closed,
    Reopened,
    Labeled,
    /// Anything else the provider sends; an extension point, not an error.
    #[serde(other)]
    Other,
}

/// A pull request event against a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub action: PullRequestAction,
    pub number: u64,
    pub head_branch: String,
    pub base_branch: String,

    /// Label name, set when `action` is `Labeled`.
    #[serde(default)]
    pub label: Option<String>,
}

//! The repository aggregate and provider-facing data.
//!
//! [`Repo`] is read-mostly from the controllers' perspective: it is passed in
//! at start/signal time and never mutated by the core. Everything the
//! controllers learn at runtime lives in their own state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{PrNumber, RepoUuid, Sha};

/// The VCS provider hosting a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoProvider {
    Github,
}

/// The notification provider configured for a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageProvider {
    Slack,
}

/// A repository under orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repo {
    /// Stable id under which all controllers for this repo are keyed.
    pub id: RepoUuid,

    /// The VCS provider hosting the repository.
    pub provider: RepoProvider,

    /// Provider-side identifier (e.g., the GitHub repository id).
    pub provider_id: String,

    /// The default (trunk) branch name, e.g. "main".
    pub default_branch: String,

    /// Line-delta threshold above which a push triggers an early warning.
    pub threshold: i64,

    /// The notification provider for warnings.
    pub message_provider: MessageProvider,

    /// How long a branch may go without a push before it is considered stale.
    #[serde(with = "stale_duration_secs")]
    pub stale_duration: Duration,
}

/// serde helper: stale duration as whole seconds.
mod stale_duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Provider-specific repository information, refreshed via `RepoIo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Repository name (without owner).
    pub name: String,

    /// Repository owner (user or organization).
    pub owner: String,

    /// The default branch as the provider reports it.
    pub default_branch: String,

    /// Provider-side repository id.
    pub provider_id: String,

    /// App installation id used for authenticated calls.
    pub installation_id: i64,
}

/// A single commit as carried in push payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: Sha,
    pub message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

/// A pull request attached to a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestDescriptor {
    pub number: PrNumber,
    pub head_branch: String,
    pub base_branch: String,
}

/// The change surface of a branch relative to trunk.
///
/// Produced by the provider's compare endpoint; `delta` is the total number of
/// changed lines and is what gets compared against [`Repo::threshold`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changes {
    pub added: i64,
    pub removed: i64,
    pub modified: Vec<String>,
    pub delta: i64,
    pub compare_url: String,
}

/// A pushing user's linked notification identity, when one exists.
///
/// Warnings are addressed to the user directly when present, otherwise to the
/// repository's configured channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Provider-side login of the pushing user.
    pub login: String,

    /// The user's id on the message provider (e.g., Slack member id).
    pub message_user_id: String,
}

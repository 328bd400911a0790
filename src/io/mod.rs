//! Provider capabilities and the capability registry.
//!
//! Controllers never talk to a VCS or chat provider directly; they go through
//! the [`RepoIo`] and [`MessageIo`] traits, resolved per provider from an
//! explicitly constructed [`Registry`] that is injected at controller
//! creation. Concrete provider clients (GitHub REST, Slack web API) live
//! outside this crate; tests use recording fakes.

pub mod retry;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{
    Changes, MessageProvider, ProviderInfo, Repo, RepoProvider, RepoUuid, Sha, UserIdentity,
};

/// Errors surfaced by provider capabilities.
///
/// Controllers treat every variant the same way: log and continue. The split
/// exists so retry policy can distinguish transient failures from permanent
/// ones.
#[derive(Debug, Error)]
pub enum IoError {
    /// Transient provider failure; eligible for retry.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Permanent provider failure; retrying will not help.
    #[error("permanent provider error: {0}")]
    Permanent(String),

    /// No capability registered for the requested provider.
    #[error("no capability registered for provider {0:?}")]
    UnknownProvider(String),
}

impl IoError {
    /// Whether this error is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, IoError::Transient(_))
    }
}

/// Result type for capability calls.
pub type IoResult<T> = Result<T, IoError>;

/// Repository capability for a VCS provider.
#[async_trait]
pub trait RepoIo: Send + Sync {
    /// Fetches provider-side information for a repository.
    async fn get_provider_info(&self, ctrl_id: &RepoUuid) -> IoResult<ProviderInfo>;

    /// Lists every branch of the repository.
    async fn get_all_branches(&self, info: &ProviderInfo) -> IoResult<Vec<String>>;

    /// Compares a target branch against the default branch and reports the
    /// change surface.
    async fn detect_changes(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        default_branch: &str,
        target_branch: &str,
    ) -> IoResult<Changes>;

    /// Returns a clone URL with an embedded access token.
    ///
    /// The returned URL contains a secret: callers must never log it or pass
    /// it through the logged activity helpers.
    async fn tokenized_clone_url(&self, info: &ProviderInfo) -> IoResult<String>;
}

/// A lines-exceeded warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinesExceedMessage {
    pub repo_name: String,
    pub branch: String,
    pub threshold: i64,
    pub delta: i64,
    pub compare_url: String,
    /// Present when the warning is addressed to a user rather than the
    /// repository channel.
    pub user: Option<UserIdentity>,
}

impl LinesExceedMessage {
    /// True when the warning goes to the repository channel.
    pub fn is_channel(&self) -> bool {
        self.user.is_none()
    }
}

/// A merge-conflict warning emitted when a rebase cannot complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflictMessage {
    pub repo_name: String,
    pub branch: String,
    /// SHA of the commit the rebase stopped on, when known.
    pub sha: Option<Sha>,
    pub user: Option<UserIdentity>,
}

/// A stale-branch warning emitted by the staleness loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleBranchMessage {
    /// The VCS provider hosting the branch.
    pub provider: RepoProvider,
    pub repo_name: String,
    pub repo_owner: String,
    pub branch: String,
}

/// Notification capability for a message provider.
///
/// Fire-and-forget from the controllers' perspective; a failed send is logged
/// and never retried inline.
#[async_trait]
pub trait MessageIo: Send + Sync {
    async fn send_lines_exceed(&self, msg: LinesExceedMessage) -> IoResult<()>;

    async fn send_merge_conflict(&self, msg: MergeConflictMessage) -> IoResult<()>;

    async fn send_stale_branch(&self, msg: StaleBranchMessage) -> IoResult<()>;
}

/// Maps providers to capability implementations.
///
/// Built once at startup and shared by every controller; replaces the hidden
/// global registry the controllers would otherwise reach for.
#[derive(Default)]
pub struct Registry {
    repos: HashMap<RepoProvider, Arc<dyn RepoIo>>,
    messages: HashMap<MessageProvider, Arc<dyn MessageIo>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers a repository capability for a provider.
    pub fn with_repo_io(mut self, provider: RepoProvider, io: Arc<dyn RepoIo>) -> Self {
        self.repos.insert(provider, io);
        self
    }

    /// Registers a message capability for a provider.
    pub fn with_message_io(mut self, provider: MessageProvider, io: Arc<dyn MessageIo>) -> Self {
        self.messages.insert(provider, io);
        self
    }

    /// Resolves the repository capability for the given repo.
    pub fn repo_io(&self, repo: &Repo) -> IoResult<Arc<dyn RepoIo>> {
        self.repos
            .get(&repo.provider)
            .cloned()
            .ok_or_else(|| IoError::UnknownProvider(format!("{:?}", repo.provider)))
    }

    /// Resolves the message capability for the given repo.
    pub fn message_io(&self, repo: &Repo) -> IoResult<Arc<dyn MessageIo>> {
        self.messages
            .get(&repo.message_provider)
            .cloned()
            .ok_or_else(|| IoError::UnknownProvider(format!("{:?}", repo.message_provider)))
    }
}
